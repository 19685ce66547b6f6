//! Bounded outbound sinks shared by both hubs
//!
//! A connection is represented to the hubs only through [`OutboundSink`]: a
//! non-blocking `try_send` onto a bounded buffer plus `close`. The socket side owns
//! the matching [`SinkReceiver`] and a single writer task ([`pump`]) drains it, so
//! writes to one connection are serialized and a slow peer only ever fills its own
//! buffer.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Identity of one physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The outbound buffer is full; the frame was not queued
    Full,
    /// The connection is closed or gone
    Closed,
}

/// Send capability the hubs need from a connection
pub trait OutboundSink: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    /// Queue a frame without waiting
    fn try_send(&self, frame: String) -> SendOutcome;

    /// Ask the writer to flush what is queued and close the connection
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// [`OutboundSink`] over a bounded tokio channel
pub struct ChannelSink {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl ChannelSink {
    /// Create a sink with room for `capacity` frames and its receiving half
    pub fn channel(capacity: usize) -> (Arc<Self>, SinkReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        let sink = Arc::new(Self {
            id: ConnectionId::new(),
            tx,
            closed: closed.clone(),
        });
        (sink, SinkReceiver { rx, closed })
    }
}

impl OutboundSink for ChannelSink {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn try_send(&self, frame: String) -> SendOutcome {
        if self.closed.is_cancelled() {
            return SendOutcome::Closed;
        }
        match self.tx.try_send(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => SendOutcome::Full,
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Receiving half of a [`ChannelSink`]
pub struct SinkReceiver {
    rx: mpsc::Receiver<String>,
    closed: CancellationToken,
}

impl SinkReceiver {
    /// Next frame to write, or `None` once the sink is closed and drained
    pub async fn next(&mut self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(frame) => return Some(frame),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }
        tokio::select! {
            biased;
            frame = self.rx.recv() => frame,
            _ = self.closed.cancelled() => self.rx.try_recv().ok(),
        }
    }

    /// Token cancelled when the sink is closed
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Why a writer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// The sink was closed and every queued frame was written
    Drained,
    /// Writing to the peer failed
    WriteFailed,
    /// A single write exceeded the deadline
    TimedOut,
}

/// Drain `receiver` into `out`, one frame at a time with a per-write deadline
pub async fn pump<S, M, F>(
    mut receiver: SinkReceiver,
    mut out: S,
    write_timeout: Duration,
    wrap: F,
) -> WriterExit
where
    S: Sink<M> + Unpin,
    F: Fn(String) -> M,
{
    let exit = loop {
        let Some(frame) = receiver.next().await else {
            break WriterExit::Drained;
        };
        match tokio::time::timeout(write_timeout, out.send(wrap(frame))).await {
            Ok(Ok(())) => trace!("Frame written"),
            Ok(Err(_)) => break WriterExit::WriteFailed,
            Err(_) => {
                warn!(timeout_ms = write_timeout.as_millis() as u64, "Outbound write timed out");
                break WriterExit::TimedOut;
            }
        }
    };
    receiver.closed.cancel();
    let _ = tokio::time::timeout(write_timeout, out.close()).await;
    debug!(?exit, "Writer finished");
    exit
}

/// Keys whose sinks could not take a frame during a fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutReport<K> {
    pub delivered: usize,
    pub full: Vec<K>,
    pub closed: Vec<K>,
}

impl<K> Default for FanOutReport<K> {
    fn default() -> Self {
        Self {
            delivered: 0,
            full: Vec::new(),
            closed: Vec::new(),
        }
    }
}

/// Concurrent map of keys to sinks
pub struct SinkRegistry<K: Eq + Hash + Clone> {
    sinks: DashMap<K, Arc<dyn OutboundSink>>,
}

impl<K: Eq + Hash + Clone> SinkRegistry<K> {
    pub fn new() -> Self {
        Self { sinks: DashMap::new() }
    }

    /// Bind `key` to `sink`, returning the sink it replaced
    pub fn insert(&self, key: K, sink: Arc<dyn OutboundSink>) -> Option<Arc<dyn OutboundSink>> {
        self.sinks.insert(key, sink)
    }

    pub fn remove(&self, key: &K) -> Option<Arc<dyn OutboundSink>> {
        self.sinks.remove(key).map(|(_, sink)| sink)
    }

    /// Remove `key` only while it is still bound to `connection`
    pub fn remove_if_connection(&self, key: &K, connection: ConnectionId) -> bool {
        self.sinks
            .remove_if(key, |_, sink| sink.connection_id() == connection)
            .is_some()
    }

    pub fn get(&self, key: &K) -> Option<Arc<dyn OutboundSink>> {
        self.sinks.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.sinks.contains_key(key)
    }

    /// Send to one key; a missing key reads as closed
    pub fn send(&self, key: &K, frame: String) -> SendOutcome {
        match self.get(key) {
            Some(sink) => sink.try_send(frame),
            None => SendOutcome::Closed,
        }
    }

    /// Offer each sink the frame `render` builds for its key; `None` skips the key
    ///
    /// Sinks are snapshotted first so no map shard is held while sending. Nothing
    /// is removed here; the caller applies its overflow policy to the report.
    pub fn fan_out_with<F>(&self, mut render: F) -> FanOutReport<K>
    where
        F: FnMut(&K) -> Option<String>,
    {
        let targets: Vec<(K, Arc<dyn OutboundSink>)> = self
            .sinks
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut report = FanOutReport::default();
        for (key, sink) in targets {
            let Some(frame) = render(&key) else {
                continue;
            };
            match sink.try_send(frame) {
                SendOutcome::Queued => report.delivered += 1,
                SendOutcome::Full => report.full.push(key),
                SendOutcome::Closed => report.closed.push(key),
            }
        }
        report
    }

    /// Offer the same frame to every sink
    pub fn fan_out(&self, frame: &str) -> FanOutReport<K> {
        self.fan_out_with(|_| Some(frame.to_string()))
    }

    pub fn keys(&self) -> Vec<K> {
        self.sinks.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Remove every binding, returning the sinks
    pub fn drain(&self) -> Vec<Arc<dyn OutboundSink>> {
        let keys = self.keys();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }
}

impl<K: Eq + Hash + Clone> Default for SinkRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
