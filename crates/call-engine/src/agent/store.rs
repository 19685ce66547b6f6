//! Concurrent agent state registry
//!
//! One `RwLock` guards the whole roster. Readers (aggregator, HTTP reads) share it;
//! every mutation of a record takes it exclusively, which makes each mutation atomic
//! and lets the routing claim select and flip an agent without another writer
//! slipping in between.
//!
//! Lock order: this store's lock is always taken before any queue lock. The
//! closures passed to [`AgentStateStore::claim_longest_idle`] and
//! [`AgentStateStore::rollback_assignment`] run under the write lock and may take
//! queue locks; nothing may call back into this store from them.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, trace};

use super::alerts::{compute_alerts, AlertThresholds};
use super::{AgentProfile, AgentRecord, AgentState, ConnectionStatus, DetachedCall, KpiBundle};
use crate::error::{CallCenterError, Result};
use crate::queue::Call;

/// Liveness and alert thresholds
#[derive(Debug, Clone, Copy)]
pub struct AgentStoreSettings {
    pub stale_after: Duration,
    pub retention: Duration,
    pub alerts: AlertThresholds,
}

impl Default for AgentStoreSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::seconds(6),
            retention: Duration::seconds(30),
            alerts: AlertThresholds::default(),
        }
    }
}

/// Partial profile update carried by a `state_change`
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub department: Option<String>,
    pub location: Option<String>,
    pub team: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub record: AgentRecord,
    pub created: bool,
    pub became_available: bool,
}

#[derive(Debug, Clone)]
pub struct HeartbeatOutcome {
    pub record: AgentRecord,
    /// The agent was stale or disconnected before this heartbeat
    pub recovered: bool,
    pub became_available: bool,
}

#[derive(Debug, Clone)]
pub struct StateChangeOutcome {
    pub previous: AgentState,
    pub applied: AgentState,
    /// Call that was attached when the agent left its call-occupying state
    pub detached_call: Option<DetachedCall>,
    pub became_available: bool,
    pub record: AgentRecord,
}

/// Registry of every known agent
pub struct AgentStateStore {
    agents: RwLock<HashMap<String, AgentRecord>>,
    settings: AgentStoreSettings,
    next_seq: AtomicU64,
}

impl AgentStateStore {
    pub fn new(settings: AgentStoreSettings) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            settings,
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &AgentStoreSettings {
        &self.settings
    }

    fn seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Add an offline roster placeholder; existing agents are left alone
    pub fn register_offline(&self, profile: AgentProfile, now: DateTime<Utc>) -> bool {
        let mut agents = self.agents.write();
        if agents.contains_key(&profile.agent_id) {
            return false;
        }
        let seq = self.seq();
        debug!(agent_id = %profile.agent_id, department = %profile.department, "Roster agent registered offline");
        agents.insert(profile.agent_id.clone(), AgentRecord::offline(profile, now, seq));
        true
    }

    /// Create or refresh an agent from a `register` message
    ///
    /// An agent that still holds a routed call keeps its call state; the reported
    /// state only applies to agents without one.
    pub fn register_online(
        &self,
        profile: AgentProfile,
        state: AgentState,
        kpis: Option<KpiBundle>,
        now: DateTime<Utc>,
    ) -> RegisterOutcome {
        let seq = self.seq();
        let mut agents = self.agents.write();
        let created = !agents.contains_key(&profile.agent_id);
        let record = agents
            .entry(profile.agent_id.clone())
            .or_insert_with(|| AgentRecord::offline(profile.clone(), now, seq));

        let was_routable = record.is_routable();
        record.apply_profile(&profile);
        record.registered_seq = seq;
        record.set_connection(ConnectionStatus::Connected, now);
        record.last_heartbeat = Some(now);
        if let Some(kpis) = kpis {
            record.kpis = kpis;
        }
        if !record.has_call() {
            record.transition(state, now);
        }
        record.last_update = now;
        record.alerts = compute_alerts(record, now, &self.settings.alerts);

        info!(agent_id = %record.agent_id, department = %record.department, state = %record.state, created, "Agent registered");
        RegisterOutcome {
            became_available: record.is_routable() && !was_routable,
            record: record.clone(),
            created,
        }
    }

    /// Apply a heartbeat; unknown agents are rejected without mutation
    pub fn apply_heartbeat(
        &self,
        agent_id: &str,
        state: Option<AgentState>,
        kpis: Option<KpiBundle>,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatOutcome> {
        let mut agents = self.agents.write();
        let record = agents
            .get_mut(agent_id)
            .ok_or_else(|| CallCenterError::AgentNotFound(agent_id.to_string()))?;

        let was_routable = record.is_routable();
        let recovered = record.connection != ConnectionStatus::Connected;
        record.set_connection(ConnectionStatus::Connected, now);
        record.last_heartbeat = Some(now);
        record.last_update = now;
        if let Some(kpis) = kpis {
            record.kpis = kpis;
        }
        // Routing owns the state of an agent on a call
        if let Some(state) = state {
            if !record.has_call() {
                record.transition(state, now);
            }
        }
        trace!(agent_id = %agent_id, state = %record.state, "Heartbeat applied");

        Ok(HeartbeatOutcome {
            became_available: record.is_routable() && !was_routable,
            recovered,
            record: record.clone(),
        })
    }

    /// Apply a reported state change and recompute alerts for the roster
    pub fn apply_state_change(
        &self,
        agent_id: &str,
        new_state: AgentState,
        patch: ProfilePatch,
        kpis: Option<KpiBundle>,
        now: DateTime<Utc>,
    ) -> Result<StateChangeOutcome> {
        let mut agents = self.agents.write();
        let record = agents
            .get_mut(agent_id)
            .ok_or_else(|| CallCenterError::AgentNotFound(agent_id.to_string()))?;

        let was_routable = record.is_routable();
        let previous = record.state;
        if let Some(department) = patch.department {
            record.department = department;
        }
        if let Some(location) = patch.location {
            record.location = location;
        }
        if let Some(team) = patch.team {
            record.team = team;
        }
        if let Some(kpis) = kpis {
            record.kpis = kpis;
        }
        record.set_connection(ConnectionStatus::Connected, now);
        record.last_heartbeat = Some(now);

        let (applied, detached_call) = record.transition(new_state, now);
        debug!(agent_id = %agent_id, from = %previous, requested = %new_state, applied = %applied, "State change applied");

        let became_available = record.is_routable() && !was_routable;
        Self::refresh_alerts_locked(&mut agents, now, &self.settings.alerts);
        let record = agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| CallCenterError::Internal(format!("agent {agent_id} vanished under lock")))?;

        Ok(StateChangeOutcome {
            previous,
            applied,
            detached_call,
            became_available,
            record,
        })
    }

    /// Set the connection status directly
    pub fn mark_connection(&self, agent_id: &str, status: ConnectionStatus, now: DateTime<Utc>) -> Result<()> {
        let mut agents = self.agents.write();
        let record = agents
            .get_mut(agent_id)
            .ok_or_else(|| CallCenterError::AgentNotFound(agent_id.to_string()))?;
        record.set_connection(status, now);
        record.last_update = now;
        Ok(())
    }

    /// Force an agent offline and disconnected, detaching any call it held
    pub fn logout(&self, agent_id: &str, now: DateTime<Utc>) -> Result<Option<DetachedCall>> {
        let mut agents = self.agents.write();
        let record = agents
            .get_mut(agent_id)
            .ok_or_else(|| CallCenterError::AgentNotFound(agent_id.to_string()))?;
        record.set_connection(ConnectionStatus::Disconnected, now);
        let (_, detached) = record.transition(AgentState::Offline, now);
        record.alerts = compute_alerts(record, now, &self.settings.alerts);
        Ok(detached)
    }

    /// Mark connected agents without a recent heartbeat as stale
    ///
    /// Returns the ids that changed on this pass.
    pub fn check_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut agents = self.agents.write();
        let mut stale = Vec::new();
        for record in agents.values_mut() {
            if record.connection != ConnectionStatus::Connected {
                continue;
            }
            let silent = record
                .last_heartbeat
                .map(|t| now - t > self.settings.stale_after)
                .unwrap_or(false);
            if silent {
                record.set_connection(ConnectionStatus::Stale, now);
                stale.push(record.agent_id.clone());
            }
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "Agents marked stale");
        }
        stale
    }

    /// Evict agents that have not been connected for longer than `after`
    ///
    /// Roster placeholders that never connected are kept. Evicted records are
    /// returned so the caller can release any call they still hold.
    pub fn remove_disconnected(&self, after: Duration, now: DateTime<Utc>) -> Vec<AgentRecord> {
        let mut agents = self.agents.write();
        let expired: Vec<String> = agents
            .values()
            .filter(|r| {
                r.connection != ConnectionStatus::Connected
                    && r.last_heartbeat.is_some()
                    && now - r.connection_since > after
            })
            .map(|r| r.agent_id.clone())
            .collect();
        let removed: Vec<AgentRecord> = expired.iter().filter_map(|id| agents.remove(id)).collect();
        if !removed.is_empty() {
            info!(count = removed.len(), "Evicted disconnected agents");
        }
        removed
    }

    /// [`remove_disconnected`](Self::remove_disconnected) with the configured retention
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Vec<AgentRecord> {
        self.remove_disconnected(self.settings.retention, now)
    }

    /// Drop every agent, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut agents = self.agents.write();
        let removed = agents.len();
        agents.clear();
        removed
    }

    /// Recompute every agent's alert list; returns the number of agents alerting
    pub fn refresh_alerts(&self, now: DateTime<Utc>) -> usize {
        let mut agents = self.agents.write();
        Self::refresh_alerts_locked(&mut agents, now, &self.settings.alerts)
    }

    fn refresh_alerts_locked(
        agents: &mut HashMap<String, AgentRecord>,
        now: DateTime<Utc>,
        thresholds: &AlertThresholds,
    ) -> usize {
        let mut alerting = 0;
        for record in agents.values_mut() {
            record.alerts = compute_alerts(record, now, thresholds);
            if !record.alerts.is_empty() {
                alerting += 1;
            }
        }
        alerting
    }

    /// Claim the longest-idle routable agent of `department` for a call
    ///
    /// Under the exclusive lock this picks the candidate (earliest `state_since`,
    /// then agent id), runs `pop` to take a call for it, and flips the agent to
    /// `OnCall` before releasing the lock. If no agent qualifies `pop` is never
    /// run; if `pop` yields nothing the agent is left untouched.
    pub fn claim_longest_idle<F>(&self, department: &str, now: DateTime<Utc>, pop: F) -> Option<(AgentRecord, Call)>
    where
        F: FnOnce(&str) -> Option<Call>,
    {
        let mut agents = self.agents.write();
        let candidate = agents
            .values()
            .filter(|r| r.department == department && r.is_routable())
            .min_by(|a, b| {
                a.state_since
                    .cmp(&b.state_since)
                    .then_with(|| a.agent_id.cmp(&b.agent_id))
            })
            .map(|r| r.agent_id.clone())?;

        let call = pop(&candidate)?;
        let record = agents.get_mut(&candidate)?;
        record.begin_call(&call.call_id, &call.queue, now);
        Some((record.clone(), call))
    }

    /// Finish the agent's current call: KPIs, then after-call work
    ///
    /// Returns `None` when the agent is unknown or holds a different call.
    pub fn end_call(
        &self,
        agent_id: &str,
        call_id: &str,
        talk_secs: u64,
        hold_secs: u64,
        now: DateTime<Utc>,
    ) -> Option<AgentRecord> {
        let mut agents = self.agents.write();
        let record = agents.get_mut(agent_id)?;
        if record.current_call_id.as_deref() != Some(call_id) {
            return None;
        }
        record.kpis.record_call(talk_secs, hold_secs);
        record.transition(AgentState::AfterCallWork, now);
        Some(record.clone())
    }

    /// Count a call the agent finished on its own (no state change here)
    pub fn record_call_kpis(&self, agent_id: &str, talk_secs: u64, hold_secs: u64) -> Option<AgentRecord> {
        let mut agents = self.agents.write();
        let record = agents.get_mut(agent_id)?;
        record.kpis.record_call(talk_secs, hold_secs);
        Some(record.clone())
    }

    /// Correct the KPIs of a call counted from provisional figures
    pub fn amend_call_kpis(&self, agent_id: &str, counted: (u64, u64), actual: (u64, u64)) -> Option<AgentRecord> {
        let mut agents = self.agents.write();
        let record = agents.get_mut(agent_id)?;
        record.kpis.amend_call(counted, actual);
        Some(record.clone())
    }

    /// Detach a call that vanished (wiped) and return the agent to Available
    pub fn release_call(&self, agent_id: &str, call_id: &str, now: DateTime<Utc>) -> bool {
        let mut agents = self.agents.write();
        match agents.get_mut(agent_id) {
            Some(record) if record.current_call_id.as_deref() == Some(call_id) => {
                record.transition(AgentState::Available, now);
                true
            }
            _ => false,
        }
    }

    /// Undo an assignment whose directive could not be delivered
    ///
    /// The agent drops the call, returns to Available and is marked stale so the
    /// router skips it; `requeue` runs under the same lock so no other routing
    /// claim can observe the call waiting while the agent still holds it.
    pub fn rollback_assignment<R, F>(&self, agent_id: &str, call_id: &str, now: DateTime<Utc>, requeue: F) -> R
    where
        F: FnOnce() -> R,
    {
        let mut agents = self.agents.write();
        if let Some(record) = agents.get_mut(agent_id) {
            if record.current_call_id.as_deref() == Some(call_id) {
                record.take_call();
                record.state = AgentState::Available;
                record.state_since = now;
                record.last_update = now;
            }
            record.set_connection(ConnectionStatus::Stale, now);
        }
        requeue()
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.read().get(agent_id).cloned()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.read().contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// All agents sorted by id
    pub fn list(&self) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self.agents.read().values().cloned().collect();
        records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        records
    }

    /// All agents grouped by department, each group sorted by id
    pub fn by_department(&self) -> BTreeMap<String, Vec<AgentRecord>> {
        let mut grouped: BTreeMap<String, Vec<AgentRecord>> = BTreeMap::new();
        for record in self.list() {
            grouped.entry(record.department.clone()).or_default().push(record);
        }
        grouped
    }

    /// Routable agents in `department`
    pub fn available_count(&self, department: &str) -> usize {
        self.agents
            .read()
            .values()
            .filter(|r| r.department == department && r.is_routable())
            .count()
    }

    /// Routable agents per department
    pub fn available_by_department(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for record in self.agents.read().values().filter(|r| r.is_routable()) {
            *counts.entry(record.department.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn connected_count(&self) -> usize {
        self.agents
            .read()
            .values()
            .filter(|r| r.connection == ConnectionStatus::Connected)
            .count()
    }

    /// Connected agent ids, most recently registered first
    pub fn connected_newest_first(&self) -> Vec<String> {
        let agents = self.agents.read();
        let mut connected: Vec<&AgentRecord> = agents
            .values()
            .filter(|r| r.connection == ConnectionStatus::Connected)
            .collect();
        connected.sort_by(|a, b| b.registered_seq.cmp(&a.registered_seq));
        connected.into_iter().map(|r| r.agent_id.clone()).collect()
    }
}

impl Default for AgentStateStore {
    fn default() -> Self {
        Self::new(AgentStoreSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::CallStatus;

    fn profile(id: &str, department: &str) -> AgentProfile {
        AgentProfile {
            agent_id: id.to_string(),
            department: department.to_string(),
            location: "austin".to_string(),
            team: "alpha".to_string(),
        }
    }

    fn call(id: &str, agent: &str) -> Call {
        let mut call = Call::waiting(id.to_string(), "sales_inbound", "sales", Utc::now());
        call.status = CallStatus::Active;
        call.assigned_agent = Some(agent.to_string());
        call
    }

    #[test]
    fn test_register_offline_then_online() {
        let store = AgentStateStore::default();
        let now = Utc::now();
        assert!(store.register_offline(profile("a1", "sales"), now));
        assert!(!store.register_offline(profile("a1", "sales"), now));
        assert_eq!(store.get("a1").unwrap().connection, ConnectionStatus::Disconnected);

        let outcome = store.register_online(profile("a1", "sales"), AgentState::Available, None, now);
        assert!(!outcome.created);
        assert!(outcome.became_available);
        assert_eq!(outcome.record.connection, ConnectionStatus::Connected);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_agent_updates_are_rejected() {
        let store = AgentStateStore::default();
        let now = Utc::now();
        let err = store
            .apply_heartbeat("ghost", Some(AgentState::Available), None, now)
            .unwrap_err();
        assert!(matches!(err, CallCenterError::AgentNotFound(_)));
        let err = store
            .apply_state_change("ghost", AgentState::Break, ProfilePatch::default(), None, now)
            .unwrap_err();
        assert!(matches!(err, CallCenterError::AgentNotFound(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_stale_then_evicted() {
        let store = AgentStateStore::default();
        let t0 = Utc::now();
        store.register_online(profile("a1", "sales"), AgentState::Available, None, t0);

        assert!(store.check_stale(t0 + Duration::seconds(6)).is_empty());
        let stale = store.check_stale(t0 + Duration::seconds(7));
        assert_eq!(stale, vec!["a1".to_string()]);
        assert_eq!(store.get("a1").unwrap().connection, ConnectionStatus::Stale);

        // Retention counts from the moment the agent went stale
        assert!(store.evict_expired(t0 + Duration::seconds(30)).is_empty());
        let evicted = store.evict_expired(t0 + Duration::seconds(38));
        assert_eq!(evicted.len(), 1);
        assert!(store.get("a1").is_none());
        assert_eq!(store.clear(), 0);
    }

    #[test]
    fn test_heartbeat_recovers_stale_agent() {
        let store = AgentStateStore::default();
        let t0 = Utc::now();
        store.register_online(profile("a1", "sales"), AgentState::Available, None, t0);
        store.check_stale(t0 + Duration::seconds(10));

        let outcome = store
            .apply_heartbeat("a1", None, None, t0 + Duration::seconds(11))
            .unwrap();
        assert!(outcome.recovered);
        assert!(outcome.became_available);
        assert_eq!(outcome.record.connection, ConnectionStatus::Connected);
    }

    #[test]
    fn test_roster_placeholders_survive_eviction() {
        let store = AgentStateStore::default();
        let t0 = Utc::now();
        store.register_offline(profile("a1", "sales"), t0);
        assert!(store.evict_expired(t0 + Duration::hours(1)).is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_claim_prefers_longest_idle() {
        let store = AgentStateStore::default();
        let t0 = Utc::now();
        store.register_online(profile("late", "sales"), AgentState::Available, None, t0 + Duration::seconds(5));
        store.register_online(profile("early", "sales"), AgentState::Available, None, t0);
        store.register_online(profile("other", "support"), AgentState::Available, None, t0 - Duration::seconds(60));

        let (agent, call) = store
            .claim_longest_idle("sales", t0 + Duration::seconds(10), |id| Some(call("c1", id)))
            .unwrap();
        assert_eq!(agent.agent_id, "early");
        assert_eq!(agent.state, AgentState::OnCall);
        assert_eq!(agent.current_call_id.as_deref(), Some("c1"));
        assert_eq!(call.assigned_agent.as_deref(), Some("early"));
        assert_eq!(store.available_count("sales"), 1);
    }

    #[test]
    fn test_claim_without_call_leaves_agent_available() {
        let store = AgentStateStore::default();
        let now = Utc::now();
        store.register_online(profile("a1", "sales"), AgentState::Available, None, now);
        assert!(store.claim_longest_idle("sales", now, |_| None).is_none());
        assert!(store.get("a1").unwrap().is_routable());

        let mut popped = false;
        assert!(store
            .claim_longest_idle("billing", now, |_| {
                popped = true;
                None
            })
            .is_none());
        assert!(!popped);
    }

    #[test]
    fn test_end_call_moves_to_acw() {
        let store = AgentStateStore::default();
        let now = Utc::now();
        store.register_online(profile("a1", "sales"), AgentState::Available, None, now);
        store.claim_longest_idle("sales", now, |id| Some(call("c1", id)));

        assert!(store.end_call("a1", "other", 10, 0, now).is_none());
        let record = store.end_call("a1", "c1", 90, 15, now).unwrap();
        assert_eq!(record.state, AgentState::AfterCallWork);
        assert!(record.current_call_id.is_none());
        assert_eq!(record.kpis.calls_handled, 1);
        assert!(record.acw_started_at.is_some());
    }

    #[test]
    fn test_rollback_marks_agent_stale() {
        let store = AgentStateStore::default();
        let now = Utc::now();
        store.register_online(profile("a1", "sales"), AgentState::Available, None, now);
        store.claim_longest_idle("sales", now, |id| Some(call("c1", id)));

        let ran = store.rollback_assignment("a1", "c1", now, || true);
        assert!(ran);
        let record = store.get("a1").unwrap();
        assert_eq!(record.state, AgentState::Available);
        assert_eq!(record.connection, ConnectionStatus::Stale);
        assert!(record.current_call_id.is_none());
        assert!(!record.is_routable());
    }

    #[test]
    fn test_state_change_replaces_alerts() {
        let store = AgentStateStore::default();
        let t0 = Utc::now();
        store.register_online(profile("a1", "sales"), AgentState::Available, None, t0);
        store
            .apply_state_change("a1", AgentState::Break, ProfilePatch::default(), None, t0)
            .unwrap();
        assert_eq!(store.refresh_alerts(t0 + Duration::minutes(11)), 1);
        assert_eq!(store.get("a1").unwrap().alerts.len(), 1);

        let outcome = store
            .apply_state_change("a1", AgentState::Available, ProfilePatch::default(), None, t0 + Duration::minutes(12))
            .unwrap();
        assert!(outcome.record.alerts.is_empty());
        assert!(outcome.became_available);
    }

    #[test]
    fn test_state_change_patches_profile() {
        let store = AgentStateStore::default();
        let now = Utc::now();
        store.register_online(profile("a1", "sales"), AgentState::Available, None, now);
        let patch = ProfilePatch {
            location: Some("denver".into()),
            ..ProfilePatch::default()
        };
        let outcome = store
            .apply_state_change("a1", AgentState::Training, patch, None, now)
            .unwrap();
        assert_eq!(outcome.previous, AgentState::Available);
        assert_eq!(outcome.applied, AgentState::Training);
        assert_eq!(outcome.record.location, "denver");
        assert_eq!(outcome.record.department, "sales");
    }

    #[test]
    fn test_logout_detaches_call() {
        let store = AgentStateStore::default();
        let now = Utc::now();
        store.register_online(profile("a1", "sales"), AgentState::Available, None, now);
        store.claim_longest_idle("sales", now, |id| Some(call("c1", id)));

        let detached = store.logout("a1", now).unwrap().unwrap();
        assert_eq!(detached.call_id, "c1");
        let record = store.get("a1").unwrap();
        assert_eq!(record.state, AgentState::Offline);
        assert_eq!(record.connection, ConnectionStatus::Disconnected);
        assert!(store.logout("ghost", now).is_err());
    }

    #[test]
    fn test_connected_newest_first() {
        let store = AgentStateStore::default();
        let now = Utc::now();
        for id in ["a1", "a2", "a3"] {
            store.register_online(profile(id, "sales"), AgentState::Available, None, now);
        }
        assert_eq!(store.connected_newest_first(), vec!["a3", "a2", "a1"]);
    }
}
