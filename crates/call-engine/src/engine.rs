//! Call center engine
//!
//! [`CallCenterEngine`] builds every component from a [`CallCenterConfig`], wires
//! them together through their constructors and owns the background tasks:
//!
//! - the routing loop,
//! - the snapshot aggregator,
//! - the maintenance sweep (stale checks, eviction, alert refresh, abandonment).
//!
//! It is also the admin control surface. Every admin action goes through the
//! same per-entity operations the automatic flow uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::agent::{AgentProfile, AgentRecord, AgentStateStore};
use crate::aggregator::SnapshotAggregator;
use crate::config::{CallCenterConfig, StorageConfig};
use crate::error::{CallCenterError, Result};
use crate::hub::{AgentConnectionHub, DashboardBroadcastHub};
use crate::identity::Identity;
use crate::ingestion::{EventIngestion, ForceEndReport, IngestionStats};
use crate::protocol::OutboundMessage;
use crate::queue::{Call, CallQueueManager, QueueSnapshot, WipeReport};
use crate::routing::RoutingLoop;
use crate::storage::{CallRecordStore, CallSummary, DailyStats, MemoryCallStore, SqliteCallStore};

/// Outcome of one maintenance sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub stale: Vec<String>,
    pub evicted: Vec<String>,
    /// Calls force-ended because their agent was evicted
    pub released_calls: usize,
    pub abandoned: Vec<String>,
    /// State-change completions persisted without a `call_complete`
    pub settled_calls: usize,
    pub alerting_agents: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub calls_cleared: usize,
    pub agents_removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleReport {
    pub target: usize,
    pub connected: usize,
    pub disconnected: Vec<String>,
}

/// Liveness plus headline counts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub agents: usize,
    pub connected_agents: usize,
    pub agent_connections: usize,
    pub dashboard_viewers: usize,
    pub waiting_calls: usize,
    pub active_calls: usize,
    pub target_agents: Option<usize>,
    pub store_reachable: bool,
    pub calls_assigned: u64,
    pub calls_requeued: u64,
    pub ingestion: IngestionStats,
}

pub struct CallCenterEngine {
    config: CallCenterConfig,
    agents: Arc<AgentStateStore>,
    queues: Arc<CallQueueManager>,
    store: Arc<dyn CallRecordStore>,
    ingestion: Arc<EventIngestion>,
    agent_hub: Arc<AgentConnectionHub>,
    dashboards: Arc<DashboardBroadcastHub>,
    router: Arc<RoutingLoop>,
    aggregator: Arc<SnapshotAggregator>,
    routing_trigger: Arc<Notify>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    started: AtomicBool,
    target_agents: Mutex<Option<usize>>,
    started_at: DateTime<Utc>,
}

impl CallCenterEngine {
    /// Build the engine; background tasks start with [`start`](Self::start)
    pub fn new(config: CallCenterConfig, store: Arc<dyn CallRecordStore>) -> Result<Self> {
        let mut config = config;
        config.finalize()?;

        let agents = Arc::new(AgentStateStore::new(config.agents.store_settings()));
        let queues = Arc::new(CallQueueManager::new(&config.queues));
        let routing_trigger = Arc::new(Notify::new());
        let ingestion = Arc::new(EventIngestion::new(
            Arc::clone(&agents),
            Arc::clone(&queues),
            Arc::clone(&store),
            Arc::clone(&routing_trigger),
        ));
        let agent_hub = Arc::new(AgentConnectionHub::new(Arc::clone(&ingestion)));
        let dashboards = Arc::new(DashboardBroadcastHub::new());
        let router = Arc::new(RoutingLoop::new(
            Arc::clone(&agents),
            Arc::clone(&queues),
            Arc::clone(&agent_hub),
            Arc::clone(&routing_trigger),
            config.routing.interval(),
        ));
        let aggregator = Arc::new(SnapshotAggregator::new(
            Arc::clone(&agents),
            Arc::clone(&queues),
            Arc::clone(&dashboards),
            config.aggregator.interval(),
        ));

        let engine = Self {
            config,
            agents,
            queues,
            store,
            ingestion,
            agent_hub,
            dashboards,
            router,
            aggregator,
            routing_trigger,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            started: AtomicBool::new(false),
            target_agents: Mutex::new(None),
            started_at: Utc::now(),
        };
        engine.load_roster(Utc::now());
        info!(
            queues = engine.config.queues.len(),
            roster = engine.config.roster.len(),
            "Call center engine created"
        );
        Ok(engine)
    }

    /// Build with the store named by the configuration
    ///
    /// An unreachable database is an error; it is the only dependency the engine
    /// refuses to start without.
    pub async fn from_config(config: CallCenterConfig) -> Result<Self> {
        let store = connect_store(&config.storage).await?;
        Self::new(config, store)
    }

    fn load_roster(&self, now: DateTime<Utc>) -> usize {
        self.config
            .roster
            .iter()
            .cloned()
            .map(AgentProfile::from)
            .filter(|profile| self.agents.register_offline(profile.clone(), now))
            .count()
    }

    /// Spawn the routing loop, the aggregator and the maintenance sweep
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Engine already started");
            return;
        }
        self.tasks
            .spawn(Arc::clone(&self.router).run(self.shutdown.clone()));
        self.tasks
            .spawn(Arc::clone(&self.aggregator).run(self.shutdown.clone()));
        self.tasks
            .spawn(Arc::clone(self).maintenance_loop(self.shutdown.clone()));
        info!("Call center engine started");
    }

    async fn maintenance_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.agents.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_maintenance(Utc::now());
                }
            }
        }
        debug!("Maintenance sweep stopped");
    }

    /// One sweep: stale marks, eviction, alert refresh and call abandonment
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let stale = self.agents.check_stale(now);
        let evicted = self.agents.evict_expired(now);
        for record in &evicted {
            self.agent_hub.detach(&record.agent_id);
        }
        let released_calls = self.ingestion.release_evicted(&evicted, now);
        let abandoned = self.queues.abandon_expired(now);
        self.ingestion.record_abandoned(&abandoned, now);
        let settled_calls = self.ingestion.settle_provisional(now);
        let alerting_agents = self.agents.refresh_alerts(now);

        MaintenanceReport {
            stale,
            evicted: evicted.into_iter().map(|r| r.agent_id).collect(),
            released_calls,
            abandoned: abandoned.into_iter().map(|c| c.call_id).collect(),
            settled_calls,
            alerting_agents,
        }
    }

    /// Cancel the background tasks, close every connection and flush history writes
    pub async fn shutdown(&self) {
        info!("Call center engine shutting down");
        self.shutdown.cancel();
        self.agent_hub.close_all();
        self.dashboards.close_all();
        self.tasks.close();
        self.tasks.wait().await;
        self.ingestion.flush().await;
        info!("Call center engine stopped");
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // Admin control surface

    /// Put a new call at the tail of `queue`
    pub fn enqueue_call(&self, queue: &str, call_id: Option<String>) -> Result<Call> {
        let call = self.queues.enqueue_call(queue, call_id, Utc::now())?;
        info!(call_id = %call.call_id, queue = %queue, "Call enqueued");
        self.routing_trigger.notify_one();
        Ok(call)
    }

    /// End a call wherever it is; the owning agent is told to drop it
    pub fn force_end_call(&self, call_id: &str) -> Result<ForceEndReport> {
        let report = self.ingestion.force_end_call(call_id, Utc::now())?;
        if let Some(agent_id) = &report.agent_id {
            let delivered = self
                .agent_hub
                .send_to_agent(agent_id, &OutboundMessage::force_end_call(call_id, agent_id));
            if !delivered {
                warn!(agent_id = %agent_id, call_id = %call_id, "force_end_call directive not delivered");
            }
        }
        Ok(report)
    }

    /// Disconnect an agent and take it offline
    pub fn force_logout(&self, agent_id: &str) -> Result<()> {
        if !self.agents.contains(agent_id) {
            return Err(CallCenterError::AgentNotFound(agent_id.to_string()));
        }
        self.agent_hub.force_disconnect(agent_id, Utc::now());
        Ok(())
    }

    /// Drop every waiting and active call; agents on those calls become available
    pub fn wipe_all_calls(&self) -> WipeReport {
        let now = Utc::now();
        let report = self.queues.wipe_all_calls();
        for (agent_id, call_id) in &report.released {
            if self.agents.release_call(agent_id, call_id, now) {
                self.agent_hub
                    .send_to_agent(agent_id, &OutboundMessage::force_end_call(call_id, agent_id));
            }
        }
        self.routing_trigger.notify_one();
        report
    }

    /// Forget all live state: calls, counters, agents and their connections
    ///
    /// Roster placeholders are restored afterwards.
    pub fn reset_state(&self) -> ResetReport {
        let calls = self.queues.reset();
        self.agent_hub.close_all();
        let agents_removed = self.agents.clear();
        self.load_roster(Utc::now());
        *self.target_agents.lock() = None;
        info!(calls = calls.cleared, agents = agents_removed, "In-memory state reset");
        ResetReport {
            calls_cleared: calls.cleared,
            agents_removed,
        }
    }

    /// Record the target agent count and disconnect the newest excess agents
    pub fn scale_agents(&self, target: usize) -> ScaleReport {
        *self.target_agents.lock() = Some(target);
        let connected = self.agents.connected_newest_first();
        let excess = connected.len().saturating_sub(target);
        let now = Utc::now();
        let disconnected: Vec<String> = connected
            .into_iter()
            .take(excess)
            .filter(|agent_id| self.agent_hub.force_disconnect(agent_id, now))
            .collect();
        info!(target, disconnected = disconnected.len(), "Scaled active agents");
        ScaleReport {
            target,
            connected: self.agents.connected_count(),
            disconnected,
        }
    }

    /// Remove all stored history
    pub async fn truncate_history(&self) -> Result<u64> {
        let removed = self.store.truncate_all().await?;
        info!(removed, "History truncated");
        Ok(removed)
    }

    // Reads

    pub fn queue_snapshots(&self) -> Vec<QueueSnapshot> {
        let available = self.agents.available_by_department();
        self.queues
            .snapshots(Utc::now(), |dept| available.get(dept).copied().unwrap_or(0))
    }

    pub fn queue_snapshot(&self, queue: &str) -> Result<QueueSnapshot> {
        let department = self
            .queues
            .department_of(queue)
            .ok_or_else(|| CallCenterError::QueueNotFound(queue.to_string()))?;
        let available = self.agents.available_count(&department);
        self.queues.snapshot(queue, available, Utc::now())
    }

    /// Roster entries `identity` may see
    pub fn agents_for(&self, identity: &Identity) -> Vec<AgentRecord> {
        self.agents
            .list()
            .into_iter()
            .filter(|a| identity.can_see_location(&a.location))
            .collect()
    }

    pub async fn agent_call_history(&self, agent_id: &str, identity: &Identity) -> Result<Vec<CallSummary>> {
        let calls = self.store.calls_for_agent(agent_id).await?;
        Ok(scope_calls(calls, identity))
    }

    pub async fn calls_on(&self, date: NaiveDate, identity: &Identity) -> Result<Vec<CallSummary>> {
        let calls = self.store.calls_on(date).await?;
        Ok(scope_calls(calls, identity))
    }

    pub async fn daily_stats(
        &self,
        date: NaiveDate,
        agent_id: Option<&str>,
        identity: &Identity,
    ) -> Result<Vec<DailyStats>> {
        let stats = self.store.daily_stats(date, agent_id).await?;
        Ok(stats
            .into_iter()
            .filter(|s| identity.can_see_location(&s.location))
            .collect())
    }

    pub async fn health(&self) -> HealthReport {
        let now = Utc::now();
        let store_reachable = match self.store.ping().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "History store unreachable");
                false
            }
        };
        HealthReport {
            status: "ok",
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            agents: self.agents.len(),
            connected_agents: self.agents.connected_count(),
            agent_connections: self.agent_hub.connection_count(),
            dashboard_viewers: self.dashboards.viewer_count(),
            waiting_calls: self.queues.total_waiting(),
            active_calls: self.queues.total_active(),
            target_agents: *self.target_agents.lock(),
            store_reachable,
            calls_assigned: self.router.total_assigned(),
            calls_requeued: self.router.total_requeued(),
            ingestion: self.ingestion.stats(),
        }
    }

    pub fn config(&self) -> &CallCenterConfig {
        &self.config
    }

    pub fn agents(&self) -> &Arc<AgentStateStore> {
        &self.agents
    }

    pub fn queues(&self) -> &Arc<CallQueueManager> {
        &self.queues
    }

    pub fn ingestion(&self) -> &Arc<EventIngestion> {
        &self.ingestion
    }

    pub fn agent_hub(&self) -> &Arc<AgentConnectionHub> {
        &self.agent_hub
    }

    pub fn dashboards(&self) -> &Arc<DashboardBroadcastHub> {
        &self.dashboards
    }

    pub fn router(&self) -> &Arc<RoutingLoop> {
        &self.router
    }

    pub fn aggregator(&self) -> &Arc<SnapshotAggregator> {
        &self.aggregator
    }
}

fn scope_calls(calls: Vec<CallSummary>, identity: &Identity) -> Vec<CallSummary> {
    if identity.is_unrestricted() {
        return calls;
    }
    calls
        .into_iter()
        .filter(|c| {
            c.location
                .as_deref()
                .is_some_and(|location| identity.can_see_location(location))
        })
        .collect()
}

/// Open the configured history store
pub async fn connect_store(config: &StorageConfig) -> Result<Arc<dyn CallRecordStore>> {
    match config.database_url.as_deref() {
        Some(url) => {
            let store = SqliteCallStore::connect(url).await?;
            store.ping().await?;
            Ok(Arc::new(store))
        }
        None => {
            info!("No database configured; history kept in memory");
            Ok(Arc::new(MemoryCallStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentState, ConnectionStatus};
    use crate::config::RosterEntry;
    use crate::hub::{ChannelSink, ConnectionMode};
    use crate::queue::CallStatus;
    use chrono::Duration;

    fn engine() -> Arc<CallCenterEngine> {
        let mut config = CallCenterConfig::default();
        config.roster = vec![RosterEntry {
            agent_id: "roster-1".into(),
            department: "support".into(),
            location: "boston".into(),
            team: String::new(),
        }];
        Arc::new(CallCenterEngine::new(config, Arc::new(MemoryCallStore::new())).unwrap())
    }

    fn register(engine: &CallCenterEngine, id: &str, now: DateTime<Utc>) -> crate::hub::SinkReceiver {
        let (sink, rx) = ChannelSink::channel(16);
        let conn = engine
            .agent_hub()
            .attach(ConnectionMode::Dedicated(id.into()), sink);
        let frame = format!(
            r#"{{"type":"register","agentId":"{id}","department":"sales","location":"austin"}}"#
        );
        engine.agent_hub().handle_inbound(conn, &frame, now).unwrap();
        rx
    }

    #[test]
    fn test_roster_loaded_offline() {
        let engine = engine();
        let agent = engine.agents().get("roster-1").unwrap();
        assert_eq!(agent.state, AgentState::Offline);
        assert_eq!(agent.connection, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_force_end_notifies_agent() {
        let engine = engine();
        let now = Utc::now();
        let mut rx = register(&engine, "a1", now);
        engine.enqueue_call("sales_inbound", Some("c1".into())).unwrap();
        engine.router().run_pass(Utc::now());
        let _assign = rx.next().await.unwrap();

        let report = engine.force_end_call("c1").unwrap();
        assert_eq!(report.agent_id.as_deref(), Some("a1"));
        let frame = rx.next().await.unwrap();
        assert!(frame.contains("force_end_call"));
        assert_eq!(engine.agents().get("a1").unwrap().state, AgentState::AfterCallWork);
        assert!(engine.force_end_call("nope").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_wipe_releases_agents() {
        let engine = engine();
        let now = Utc::now();
        let _rx1 = register(&engine, "a1", now);
        let _rx2 = register(&engine, "a2", now);
        for i in 0..5 {
            engine.enqueue_call("sales_inbound", Some(format!("c{i}"))).unwrap();
        }
        engine.router().run_pass(Utc::now());
        assert_eq!(engine.queues().total_active(), 2);

        let report = engine.wipe_all_calls();
        assert_eq!(report.cleared, 5);
        assert_eq!(report.released.len(), 2);
        assert!(engine.queue_snapshots().iter().all(|s| s.waiting_count == 0 && s.active_count == 0));
        assert_eq!(engine.agents().get("a1").unwrap().state, AgentState::Available);
        assert!(engine.agents().get("a2").unwrap().current_call_id.is_none());
    }

    #[tokio::test]
    async fn test_maintenance_marks_stale_then_evicts() {
        let engine = engine();
        let t0 = Utc::now();
        let _rx = register(&engine, "a1", t0);

        let report = engine.run_maintenance(t0 + Duration::seconds(7));
        assert_eq!(report.stale, vec!["a1".to_string()]);
        let report = engine.run_maintenance(t0 + Duration::seconds(38));
        assert_eq!(report.evicted, vec!["a1".to_string()]);
        assert!(engine.agents().get("a1").is_none());
        assert!(!engine.agent_hub().is_connected("a1"));
        // Roster placeholder survives
        assert!(engine.agents().get("roster-1").is_some());
    }

    #[tokio::test]
    async fn test_evicted_agent_call_is_not_orphaned() {
        let engine = engine();
        let t0 = Utc::now();
        let _rx = register(&engine, "a1", t0);
        engine.enqueue_call("sales_inbound", Some("c1".into())).unwrap();
        engine.router().run_pass(t0);

        engine.run_maintenance(t0 + Duration::seconds(7));
        let report = engine.run_maintenance(t0 + Duration::seconds(40));
        assert_eq!(report.released_calls, 1);
        assert_eq!(engine.queues().total_active(), 0);
    }

    #[test]
    fn test_maintenance_abandons_overdue_calls() {
        let engine = engine();
        engine.enqueue_call("billing_inbound", Some("old".into())).unwrap();
        let report = engine.run_maintenance(Utc::now() + Duration::seconds(601));
        assert_eq!(report.abandoned, vec!["old".to_string()]);
        let snapshot = engine.queue_snapshot("billing_inbound").unwrap();
        assert_eq!(snapshot.abandoned_count, 1);
    }

    #[tokio::test]
    async fn test_scale_disconnects_newest() {
        let engine = engine();
        let now = Utc::now();
        let _rxs: Vec<_> = ["a1", "a2", "a3"].iter().map(|id| register(&engine, id, now)).collect();

        let report = engine.scale_agents(1);
        assert_eq!(report.disconnected, vec!["a3".to_string(), "a2".to_string()]);
        assert_eq!(report.connected, 1);
        assert_eq!(engine.agents().get("a3").unwrap().state, AgentState::Offline);
        assert_eq!(engine.health().await.target_agents, Some(1));
    }

    #[tokio::test]
    async fn test_reset_restores_roster_only() {
        let engine = engine();
        let _rx = register(&engine, "a1", Utc::now());
        engine.enqueue_call("sales_inbound", None).unwrap();

        let report = engine.reset_state();
        assert_eq!(report.agents_removed, 2);
        assert_eq!(report.calls_cleared, 1);
        assert_eq!(engine.agents().len(), 1);
        assert!(engine.agents().contains("roster-1"));
        assert_eq!(engine.agent_hub().bound_agents(), 0);
    }

    #[test]
    fn test_admin_not_found_paths() {
        let engine = engine();
        assert!(matches!(
            engine.force_logout("ghost"),
            Err(CallCenterError::AgentNotFound(_))
        ));
        assert!(matches!(
            engine.enqueue_call("nowhere", None),
            Err(CallCenterError::QueueNotFound(_))
        ));
        assert!(engine.queue_snapshot("nowhere").is_err());
    }

    #[tokio::test]
    async fn test_history_scoped_by_location() {
        let engine = engine();
        let now = Utc::now();
        let _rx = register(&engine, "a1", now);
        engine.enqueue_call("sales_inbound", Some("c1".into())).unwrap();
        engine.router().run_pass(now);
        engine.ingestion().complete_call("a1", "c1", 60, 0, now).unwrap();
        engine.ingestion().flush().await;

        let admin = Identity::new("root", crate::identity::Role::Admin);
        let calls = engine.agent_call_history("a1", &admin).await.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status, CallStatus::Completed);

        let outsider = Identity::new("v", crate::identity::Role::Viewer).with_locations(["boston"]);
        assert!(engine.agent_call_history("a1", &outsider).await.unwrap().is_empty());
        assert!(engine.calls_on(now.date_naive(), &admin).await.unwrap().len() == 1);
        assert_eq!(engine.truncate_history().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let engine = engine();
        engine.start();
        engine.start();
        engine.enqueue_call("sales_inbound", None).unwrap();
        engine.shutdown().await;
        assert!(engine.shutdown_token().is_cancelled());
    }
}
