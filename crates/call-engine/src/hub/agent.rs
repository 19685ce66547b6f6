//! Agent connection hub
//!
//! Tracks which connection currently speaks for each agent. A connection is either
//! dedicated to one agent (`/ws/agent/{id}`) or shared by many simulated agents
//! (`/ws/agents`), where every payload names its agent. Directives are addressed by
//! agent id and land on whichever connection that agent is bound to.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::sink::{ConnectionId, OutboundSink, SendOutcome, SinkRegistry};
use crate::ingestion::{EventIngestion, IngestOutcome};
use crate::protocol::{InboundMessage, IngestError, OutboundMessage};

/// How a connection is addressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionMode {
    /// One agent per connection; payloads for other agents are rejected
    Dedicated(String),
    /// Multiplexed simulator connection
    Shared,
}

struct ConnectionEntry {
    mode: ConnectionMode,
    sink: Arc<dyn OutboundSink>,
    agents: HashSet<String>,
    /// Force-disconnected agents; their payloads are ignored until a fresh `register`
    ejected: HashSet<String>,
}

pub struct AgentConnectionHub {
    ingestion: Arc<EventIngestion>,
    bindings: SinkRegistry<String>,
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl AgentConnectionHub {
    pub fn new(ingestion: Arc<EventIngestion>) -> Self {
        Self {
            ingestion,
            bindings: SinkRegistry::new(),
            connections: DashMap::new(),
        }
    }

    /// Track a new connection; a dedicated one is bound to its agent right away
    pub fn attach(&self, mode: ConnectionMode, sink: Arc<dyn OutboundSink>) -> ConnectionId {
        let id = sink.connection_id();
        self.connections.insert(
            id,
            ConnectionEntry {
                mode: mode.clone(),
                sink: Arc::clone(&sink),
                agents: HashSet::new(),
                ejected: HashSet::new(),
            },
        );
        debug!(connection = %id, ?mode, "Agent connection attached");
        if let ConnectionMode::Dedicated(agent_id) = mode {
            self.register(&agent_id, sink);
        }
        id
    }

    /// Bind `agent_id` to `sink`, closing any prior dedicated connection of that agent
    ///
    /// A prior shared connection stays open; only this agent's binding moves.
    pub fn register(&self, agent_id: &str, sink: Arc<dyn OutboundSink>) {
        let connection = sink.connection_id();
        let previous = self.bindings.insert(agent_id.to_string(), Arc::clone(&sink));
        if let Some(mut entry) = self.connections.get_mut(&connection) {
            entry.agents.insert(agent_id.to_string());
        }

        let Some(previous) = previous else {
            return;
        };
        let old = previous.connection_id();
        if old == connection {
            return;
        }
        let close_old = match self.connections.get_mut(&old) {
            Some(mut entry) => {
                entry.agents.remove(agent_id);
                matches!(entry.mode, ConnectionMode::Dedicated(_))
            }
            None => true,
        };
        if close_old {
            previous.close();
        }
        info!(agent_id = %agent_id, old = %old, new = %connection, "Agent connection replaced");
    }

    /// Route one inbound frame received on `connection`
    pub fn handle_inbound(
        &self,
        connection: ConnectionId,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, IngestError> {
        let message = match InboundMessage::decode(raw) {
            Ok(message) => message,
            Err(err) => {
                self.ingestion.record_error(&err);
                return Err(err);
            }
        };

        let (mode, sink, bound, ejected) = match self.connections.get(&connection) {
            Some(entry) => (
                entry.mode.clone(),
                Arc::clone(&entry.sink),
                entry.agents.contains(message.agent_id()),
                entry.ejected.contains(message.agent_id()),
            ),
            None => {
                let err = IngestError::Rejected(format!("connection {connection} is not attached"));
                self.ingestion.record_error(&err);
                return Err(err);
            }
        };

        if let ConnectionMode::Dedicated(expected) = &mode {
            if expected != message.agent_id() {
                let err = IngestError::AgentMismatch {
                    expected: expected.clone(),
                    actual: message.agent_id().to_string(),
                };
                self.ingestion.record_error(&err);
                return Err(err);
            }
        }

        let agent_id = message.agent_id().to_string();
        if ejected {
            if !matches!(message, InboundMessage::Register(_)) {
                let err = IngestError::Rejected(format!(
                    "agent {agent_id} was disconnected and must register again"
                ));
                self.ingestion.record_error(&err);
                return Err(err);
            }
            if let Some(mut entry) = self.connections.get_mut(&connection) {
                entry.ejected.remove(&agent_id);
            }
        }
        let outcome = self.ingestion.apply(message, now)?;
        // Shared connections bind lazily, on the first payload that applies
        if !bound && mode == ConnectionMode::Shared {
            self.register(&agent_id, sink);
        }
        Ok(outcome)
    }

    /// The socket closed: every agent still bound to it is disconnected
    pub fn connection_closed(&self, connection: ConnectionId, now: DateTime<Utc>) -> Vec<String> {
        let Some((_, entry)) = self.connections.remove(&connection) else {
            return Vec::new();
        };
        entry.sink.close();
        let mut disconnected: Vec<String> = entry
            .agents
            .into_iter()
            .filter(|agent_id| self.bindings.remove_if_connection(agent_id, connection))
            .collect();
        disconnected.sort();
        for agent_id in &disconnected {
            self.ingestion.mark_disconnected(agent_id, now);
        }
        debug!(connection = %connection, agents = disconnected.len(), "Agent connection closed");
        disconnected
    }

    /// Queue a directive for an agent; `false` when it cannot be delivered
    pub fn send_to_agent(&self, agent_id: &str, message: &OutboundMessage) -> bool {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(agent_id = %agent_id, error = %err, "Failed to encode directive");
                return false;
            }
        };
        let key = agent_id.to_string();
        match self.bindings.send(&key, frame) {
            SendOutcome::Queued => true,
            SendOutcome::Full => {
                warn!(agent_id = %agent_id, "Agent outbound buffer full");
                false
            }
            SendOutcome::Closed => {
                if let Some(sink) = self.bindings.get(&key) {
                    self.unbind(agent_id, sink.connection_id());
                }
                debug!(agent_id = %agent_id, "No open connection for agent");
                false
            }
        }
    }

    /// Tell the agent to go away, drop its binding and log it out
    ///
    /// The store cleanup runs before this returns. Returns `false` when the agent
    /// was neither connected nor known.
    pub fn force_disconnect(&self, agent_id: &str, now: DateTime<Utc>) -> bool {
        let connected = match self.bindings.get(&agent_id.to_string()) {
            Some(sink) => {
                if !self.send_to_agent(agent_id, &OutboundMessage::force_disconnect(agent_id)) {
                    debug!(agent_id = %agent_id, "force_disconnect directive not delivered");
                }
                let connection = sink.connection_id();
                let dedicated = self
                    .connections
                    .get(&connection)
                    .map(|entry| matches!(entry.mode, ConnectionMode::Dedicated(_)))
                    .unwrap_or(true);
                self.unbind(agent_id, connection);
                if let Some(mut entry) = self.connections.get_mut(&connection) {
                    entry.ejected.insert(agent_id.to_string());
                }
                if dedicated {
                    sink.close();
                }
                true
            }
            None => false,
        };
        let known = self.ingestion.logout(agent_id, now).is_ok();
        if connected || known {
            info!(agent_id = %agent_id, connected, "Agent force-disconnected");
        }
        connected || known
    }

    /// Forget an agent's binding without touching its state
    pub fn detach(&self, agent_id: &str) {
        if let Some(sink) = self.bindings.get(&agent_id.to_string()) {
            let connection = sink.connection_id();
            let dedicated = self
                .connections
                .get(&connection)
                .map(|entry| matches!(entry.mode, ConnectionMode::Dedicated(_)))
                .unwrap_or(false);
            self.unbind(agent_id, connection);
            if dedicated {
                sink.close();
            }
        }
    }

    fn unbind(&self, agent_id: &str, connection: ConnectionId) {
        self.bindings.remove_if_connection(&agent_id.to_string(), connection);
        if let Some(mut entry) = self.connections.get_mut(&connection) {
            entry.agents.remove(agent_id);
        }
    }

    pub fn is_connected(&self, agent_id: &str) -> bool {
        self.bindings
            .get(&agent_id.to_string())
            .map(|sink| !sink.is_closed())
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn bound_agents(&self) -> usize {
        self.bindings.len()
    }

    /// Close every connection
    pub fn close_all(&self) {
        for sink in self.bindings.drain() {
            sink.close();
        }
        for entry in self.connections.iter() {
            entry.sink.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentState, AgentStateStore, ConnectionStatus};
    use crate::config::CallCenterConfig;
    use crate::hub::sink::ChannelSink;
    use crate::queue::CallQueueManager;
    use crate::storage::MemoryCallStore;
    use tokio::sync::Notify;

    fn hub() -> AgentConnectionHub {
        let agents = Arc::new(AgentStateStore::default());
        let queues = Arc::new(CallQueueManager::new(&CallCenterConfig::default_queues()));
        let ingestion = Arc::new(EventIngestion::new(
            agents,
            queues,
            Arc::new(MemoryCallStore::new()),
            Arc::new(Notify::new()),
        ));
        AgentConnectionHub::new(ingestion)
    }

    fn register_frame(id: &str) -> String {
        format!(r#"{{"type":"register","agentId":"{id}","department":"sales","location":"austin"}}"#)
    }

    #[tokio::test]
    async fn test_dedicated_connection_rejects_other_agents() {
        let hub = hub();
        let now = Utc::now();
        let (sink, _rx) = ChannelSink::channel(8);
        let conn = hub.attach(ConnectionMode::Dedicated("a1".into()), sink);

        hub.handle_inbound(conn, &register_frame("a1"), now).unwrap();
        let err = hub.handle_inbound(conn, &register_frame("a2"), now).unwrap_err();
        assert!(matches!(err, IngestError::AgentMismatch { .. }));
        assert_eq!(hub.ingestion.stats().malformed, 1);
        assert!(hub.ingestion.agents().get("a2").is_none());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_and_closes_old_connection() {
        let hub = hub();
        let now = Utc::now();
        let (first, _rx1) = ChannelSink::channel(8);
        let (second, mut rx2) = ChannelSink::channel(8);
        let first_id = hub.attach(ConnectionMode::Dedicated("a1".into()), first.clone());
        hub.attach(ConnectionMode::Dedicated("a1".into()), second.clone());
        assert!(first.is_closed());

        // The stale socket closing must not disconnect the new binding
        assert!(hub.connection_closed(first_id, now).is_empty());
        assert!(hub.is_connected("a1"));
        assert!(hub.send_to_agent("a1", &OutboundMessage::force_disconnect("a1")));
        assert!(rx2.next().await.is_some());
    }

    #[tokio::test]
    async fn test_shared_connection_binds_per_payload() {
        let hub = hub();
        let now = Utc::now();
        let (sink, _rx) = ChannelSink::channel(8);
        let conn = hub.attach(ConnectionMode::Shared, sink.clone());
        for id in ["a1", "a2", "a3"] {
            hub.handle_inbound(conn, &register_frame(id), now).unwrap();
        }
        assert_eq!(hub.bound_agents(), 3);

        // Force-disconnecting one agent leaves the shared socket open
        assert!(hub.force_disconnect("a2", now));
        assert!(!sink.is_closed());
        assert!(!hub.is_connected("a2"));
        assert_eq!(hub.ingestion.agents().get("a2").unwrap().state, AgentState::Offline);

        let mut closed = hub.connection_closed(conn, now);
        closed.sort();
        assert_eq!(closed, vec!["a1", "a3"]);
        let a1 = hub.ingestion.agents().get("a1").unwrap();
        assert_eq!(a1.connection, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_send_reports_full_buffer() {
        let hub = hub();
        let (sink, _rx) = ChannelSink::channel(1);
        hub.attach(ConnectionMode::Dedicated("a1".into()), sink);
        let msg = OutboundMessage::force_end_call("c1", "a1");
        assert!(hub.send_to_agent("a1", &msg));
        assert!(!hub.send_to_agent("a1", &msg));
        assert!(!hub.send_to_agent("nobody", &msg));
    }

    #[tokio::test]
    async fn test_force_disconnect_sends_directive_then_closes() {
        let hub = hub();
        let now = Utc::now();
        let (sink, mut rx) = ChannelSink::channel(8);
        let conn = hub.attach(ConnectionMode::Dedicated("a1".into()), sink.clone());
        hub.handle_inbound(conn, &register_frame("a1"), now).unwrap();

        assert!(hub.force_disconnect("a1", now));
        assert!(sink.is_closed());
        let frame = rx.next().await.unwrap();
        assert!(frame.contains("force_disconnect"));
        assert_eq!(rx.next().await, None);
        assert!(!hub.force_disconnect("ghost", now));
    }

    #[tokio::test]
    async fn test_force_disconnected_agent_stays_out_of_shared_connection() {
        let hub = hub();
        let now = Utc::now();
        let (sink, _rx) = ChannelSink::channel(8);
        let conn = hub.attach(ConnectionMode::Shared, sink);
        hub.handle_inbound(conn, &register_frame("a1"), now).unwrap();
        assert!(hub.force_disconnect("a1", now));

        let heartbeat = r#"{"type":"heartbeat","agentId":"a1"}"#;
        let err = hub.handle_inbound(conn, heartbeat, now).unwrap_err();
        assert!(matches!(err, IngestError::Rejected(_)));
        let a1 = hub.ingestion.agents().get("a1").unwrap();
        assert_eq!(a1.state, AgentState::Offline);
        assert_eq!(a1.connection, ConnectionStatus::Disconnected);
        assert!(!hub.is_connected("a1"));

        // A fresh register lets the agent back in
        hub.handle_inbound(conn, &register_frame("a1"), now).unwrap();
        hub.handle_inbound(conn, heartbeat, now).unwrap();
        assert!(hub.is_connected("a1"));
        assert_eq!(
            hub.ingestion.agents().get("a1").unwrap().connection,
            ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_force_disconnect_with_full_buffer_still_logs_out() {
        let hub = hub();
        let now = Utc::now();
        let (sink, _rx) = ChannelSink::channel(1);
        let conn = hub.attach(ConnectionMode::Dedicated("a1".into()), sink.clone());
        hub.handle_inbound(conn, &register_frame("a1"), now).unwrap();
        assert!(hub.send_to_agent("a1", &OutboundMessage::force_end_call("c1", "a1")));

        assert!(hub.force_disconnect("a1", now));
        assert!(sink.is_closed());
        assert!(!hub.is_connected("a1"));
        assert_eq!(hub.ingestion.agents().get("a1").unwrap().state, AgentState::Offline);
    }
}
