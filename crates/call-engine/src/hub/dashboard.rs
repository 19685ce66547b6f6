//! Dashboard broadcast hub
//!
//! Fans widgets out to every viewer. Overflow policy: a viewer whose buffer is
//! full is closed and unregistered on the spot, so one slow client never holds
//! back the broadcaster or the other viewers.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::sink::{ConnectionId, FanOutReport, OutboundSink, SinkRegistry};
use crate::aggregator::Widget;
use crate::identity::Identity;

/// Delivery counts for one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Viewers closed because they were full or already gone
    pub dropped: usize,
}

pub struct DashboardBroadcastHub {
    viewers: SinkRegistry<ConnectionId>,
    identities: DashMap<ConnectionId, Identity>,
}

impl DashboardBroadcastHub {
    pub fn new() -> Self {
        Self {
            viewers: SinkRegistry::new(),
            identities: DashMap::new(),
        }
    }

    pub fn register(&self, identity: Identity, sink: Arc<dyn OutboundSink>) -> ConnectionId {
        let id = sink.connection_id();
        debug!(connection = %id, user_id = %identity.user_id, role = %identity.role, "Dashboard viewer registered");
        self.identities.insert(id, identity);
        self.viewers.insert(id, sink);
        id
    }

    pub fn unregister(&self, id: ConnectionId) -> bool {
        self.identities.remove(&id);
        match self.viewers.remove(&id) {
            Some(sink) => {
                sink.close();
                debug!(connection = %id, "Dashboard viewer unregistered");
                true
            }
            None => false,
        }
    }

    /// Send the same payload to every viewer
    pub fn broadcast(&self, payload: &str) -> BroadcastReport {
        let report = self.viewers.fan_out(payload);
        self.settle(report)
    }

    /// Send a widget, scoped per viewer identity
    pub fn broadcast_widget(&self, widget: &Widget) -> BroadcastReport {
        let full_frame = match serde_json::to_string(widget) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "Failed to encode widget");
                return BroadcastReport::default();
            }
        };
        let report = self.viewers.fan_out_with(|id| {
            let identity = self.identities.get(id)?;
            if identity.is_unrestricted() {
                return Some(full_frame.clone());
            }
            serde_json::to_string(widget.scoped_to(&identity).as_ref()).ok()
        });
        self.settle(report)
    }

    fn settle(&self, report: FanOutReport<ConnectionId>) -> BroadcastReport {
        for id in &report.full {
            warn!(connection = %id, "Dashboard viewer too slow; dropping connection");
            self.unregister(*id);
        }
        for id in &report.closed {
            self.unregister(*id);
        }
        BroadcastReport {
            delivered: report.delivered,
            dropped: report.full.len() + report.closed.len(),
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn close_all(&self) {
        for id in self.viewers.keys() {
            self.unregister(id);
        }
    }
}

impl Default for DashboardBroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::sink::ChannelSink;
    use crate::identity::Role;

    fn viewer() -> Identity {
        Identity::new("viewer", Role::Viewer)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_viewer() {
        let hub = DashboardBroadcastHub::new();
        let (a, mut rx_a) = ChannelSink::channel(4);
        let (b, mut rx_b) = ChannelSink::channel(4);
        hub.register(viewer(), a);
        hub.register(viewer(), b);

        let report = hub.broadcast("{\"tick\":1}");
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
        assert_eq!(rx_a.next().await.as_deref(), Some("{\"tick\":1}"));
        assert_eq!(rx_b.next().await.as_deref(), Some("{\"tick\":1}"));
    }

    #[tokio::test]
    async fn test_full_viewer_is_dropped_without_stalling_others() {
        let hub = DashboardBroadcastHub::new();
        let (slow, mut slow_rx) = ChannelSink::channel(1);
        let (fast, mut fast_rx) = ChannelSink::channel(8);
        hub.register(viewer(), slow.clone());
        hub.register(viewer(), fast);

        assert_eq!(hub.broadcast("1").delivered, 2);
        // The slow viewer never reads; its single slot is still taken
        let report = hub.broadcast("2");
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(hub.viewer_count(), 1);
        assert!(slow.is_closed());

        // Queued frames are still flushed before the slow socket closes
        assert_eq!(slow_rx.next().await.as_deref(), Some("1"));
        assert_eq!(slow_rx.next().await, None);
        assert_eq!(fast_rx.next().await.as_deref(), Some("1"));
        assert_eq!(fast_rx.next().await.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_closed_viewer_is_unregistered() {
        let hub = DashboardBroadcastHub::new();
        let (sink, rx) = ChannelSink::channel(4);
        hub.register(viewer(), sink);
        drop(rx);
        let report = hub.broadcast("x");
        assert_eq!(report.dropped, 1);
        assert_eq!(hub.viewer_count(), 0);
    }
}
