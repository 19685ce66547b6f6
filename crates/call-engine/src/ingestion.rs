//! Event ingestion
//!
//! Applies decoded agent messages to the agent store and the queue manager, and is
//! the single place where a call leaves an agent: explicit completion, a state
//! change out of a call, admin force-end, logout and eviction all funnel through
//! here so the queue counters, the agent KPIs and the history write stay in step.
//!
//! A state change out of a call finishes the call at once but holds its history
//! write for a short grace period: the agent's `call_complete` normally follows
//! with the real talk and hold times, and those replace the provisional figures.
//!
//! Nothing here is fatal. Bad frames and unknown agents are counted and dropped;
//! history writes run in the background and failures are only logged.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::agent::{AgentRecord, AgentState, AgentStateStore, ConnectionStatus, DetachedCall, ProfilePatch};
use crate::error::{CallCenterError, Result};
use crate::protocol::{CallCompletePayload, InboundMessage, IngestError, StateChangePayload};
use crate::queue::{Call, CallQueueManager, CallStatus, CompletionOutcome};
use crate::storage::{CallRecordStore, CallSummary, DailyStats};

/// Seconds a call finished by a state change waits for its `call_complete`
const COMPLETION_GRACE_SECS: i64 = 10;
/// Provisional completions held at once; the oldest is persisted when full
const PROVISIONAL_LIMIT: usize = 1_000;

/// What an applied message did
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Registered {
        agent_id: String,
        created: bool,
    },
    Heartbeat {
        agent_id: String,
    },
    StateChanged {
        agent_id: String,
        applied: AgentState,
        /// Call completed because the agent left its call state
        completed_call: Option<String>,
    },
    CallCompleted {
        agent_id: String,
        call_id: String,
        /// The call was already finished; nothing changed
        duplicate: bool,
    },
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStats {
    pub processed: u64,
    pub malformed: u64,
    pub unknown_kind: u64,
    pub unknown_agent: u64,
    pub rejected: u64,
}

#[derive(Default)]
struct IngestCounters {
    processed: AtomicU64,
    malformed: AtomicU64,
    unknown_kind: AtomicU64,
    unknown_agent: AtomicU64,
    rejected: AtomicU64,
}

/// Result of an admin force-end
#[derive(Debug, Clone, PartialEq)]
pub struct ForceEndReport {
    pub call: Call,
    pub agent_id: Option<String>,
}

/// A call finished by a state change, waiting for the agent's final metrics
struct ProvisionalCompletion {
    agent_id: String,
    call: Call,
    /// KPIs were counted here from the state duration, not reported by the agent
    kpis_derived: bool,
    finished_at: DateTime<Utc>,
}

#[derive(Default)]
struct ProvisionalWindow {
    pending: HashMap<String, ProvisionalCompletion>,
    order: VecDeque<String>,
}

impl ProvisionalWindow {
    fn insert(&mut self, entry: ProvisionalCompletion) -> Option<ProvisionalCompletion> {
        let overflow = if self.pending.len() >= PROVISIONAL_LIMIT {
            self.pop_oldest()
        } else {
            None
        };
        self.order.push_back(entry.call.call_id.clone());
        self.pending.insert(entry.call.call_id.clone(), entry);
        overflow
    }

    fn pop_oldest(&mut self) -> Option<ProvisionalCompletion> {
        while let Some(call_id) = self.order.pop_front() {
            if let Some(entry) = self.pending.remove(&call_id) {
                return Some(entry);
            }
        }
        None
    }

    fn take(&mut self, call_id: &str, agent_id: &str) -> Option<ProvisionalCompletion> {
        if self.pending.get(call_id)?.agent_id != agent_id {
            return None;
        }
        self.pending.remove(call_id)
    }

    /// Remove every entry finished at or before `cutoff`
    fn expire(&mut self, cutoff: DateTime<Utc>) -> Vec<ProvisionalCompletion> {
        let mut expired = Vec::new();
        while let Some(call_id) = self.order.front() {
            if let Some(entry) = self.pending.get(call_id) {
                if entry.finished_at > cutoff {
                    break;
                }
            }
            let Some(call_id) = self.order.pop_front() else {
                break;
            };
            if let Some(entry) = self.pending.remove(&call_id) {
                expired.push(entry);
            }
        }
        expired
    }

    fn drain(&mut self) -> Vec<ProvisionalCompletion> {
        self.order.clear();
        self.pending.drain().map(|(_, entry)| entry).collect()
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

pub struct EventIngestion {
    agents: Arc<AgentStateStore>,
    queues: Arc<CallQueueManager>,
    store: Arc<dyn CallRecordStore>,
    routing_trigger: Arc<Notify>,
    counters: IngestCounters,
    provisional: Mutex<ProvisionalWindow>,
    writes: TaskTracker,
}

impl EventIngestion {
    pub fn new(
        agents: Arc<AgentStateStore>,
        queues: Arc<CallQueueManager>,
        store: Arc<dyn CallRecordStore>,
        routing_trigger: Arc<Notify>,
    ) -> Self {
        Self {
            agents,
            queues,
            store,
            routing_trigger,
            counters: IngestCounters::default(),
            provisional: Mutex::new(ProvisionalWindow::default()),
            writes: TaskTracker::new(),
        }
    }

    pub fn agents(&self) -> &Arc<AgentStateStore> {
        &self.agents
    }

    pub fn queues(&self) -> &Arc<CallQueueManager> {
        &self.queues
    }

    pub fn store(&self) -> &Arc<dyn CallRecordStore> {
        &self.store
    }

    /// Decode and apply one raw frame
    pub fn handle_payload(&self, raw: &str, now: DateTime<Utc>) -> std::result::Result<IngestOutcome, IngestError> {
        match InboundMessage::decode(raw) {
            Ok(message) => self.apply(message, now),
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Apply a decoded message, counting the result
    pub fn apply(&self, message: InboundMessage, now: DateTime<Utc>) -> std::result::Result<IngestOutcome, IngestError> {
        trace!(kind = message.kind(), agent_id = %message.agent_id(), "Applying agent message");
        let result = match message {
            InboundMessage::Register(payload) => {
                let outcome = self
                    .agents
                    .register_online(payload.profile(), payload.state, payload.kpis, now);
                if outcome.became_available {
                    self.routing_trigger.notify_one();
                }
                Ok(IngestOutcome::Registered {
                    agent_id: payload.agent_id,
                    created: outcome.created,
                })
            }
            InboundMessage::Heartbeat(payload) => self
                .agents
                .apply_heartbeat(&payload.agent_id, payload.state, payload.kpis, now)
                .map(|outcome| {
                    if outcome.recovered {
                        debug!(agent_id = %payload.agent_id, "Agent recovered from stale");
                    }
                    if outcome.became_available {
                        self.routing_trigger.notify_one();
                    }
                    IngestOutcome::Heartbeat {
                        agent_id: payload.agent_id.clone(),
                    }
                })
                .map_err(|_| IngestError::UnknownAgent(payload.agent_id.clone())),
            InboundMessage::StateChange(payload) => self.apply_state_change(payload, now),
            InboundMessage::CallComplete(payload) => self.apply_call_complete(payload, now),
        };

        match &result {
            Ok(_) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => self.record_error(err),
        }
        result
    }

    fn apply_state_change(
        &self,
        payload: StateChangePayload,
        now: DateTime<Utc>,
    ) -> std::result::Result<IngestOutcome, IngestError> {
        let patch = ProfilePatch {
            department: payload.department.clone(),
            location: payload.location.clone(),
            team: payload.team.clone(),
        };
        let reported_kpis = payload.kpis.is_some();
        let outcome = self
            .agents
            .apply_state_change(&payload.agent_id, payload.new_state, patch, payload.kpis.clone(), now)
            .map_err(|_| IngestError::UnknownAgent(payload.agent_id.clone()))?;

        if outcome.applied != payload.new_state {
            debug!(
                agent_id = %payload.agent_id,
                requested = %payload.new_state,
                applied = %outcome.applied,
                "Call state reported without a routed call; downgraded"
            );
        }
        if outcome.became_available {
            self.routing_trigger.notify_one();
        }

        let completed_call = outcome.detached_call.and_then(|detached| {
            let talk = payload.duration_secs();
            let call = self.close_detached(&detached, talk, 0, now)?;
            if !reported_kpis {
                self.agents.record_call_kpis(&payload.agent_id, talk, 0);
            }
            let call_id = call.call_id.clone();
            self.hold_provisional(
                ProvisionalCompletion {
                    agent_id: payload.agent_id.clone(),
                    call,
                    kpis_derived: !reported_kpis,
                    finished_at: now,
                },
                now,
            );
            Some(call_id)
        });

        Ok(IngestOutcome::StateChanged {
            agent_id: payload.agent_id,
            applied: outcome.applied,
            completed_call,
        })
    }

    fn apply_call_complete(
        &self,
        payload: CallCompletePayload,
        now: DateTime<Utc>,
    ) -> std::result::Result<IngestOutcome, IngestError> {
        let duplicate = self.complete_call(
            &payload.agent_id,
            &payload.call_id,
            payload.talk_secs(),
            payload.hold_secs(),
            now,
        )?;
        Ok(IngestOutcome::CallCompleted {
            agent_id: payload.agent_id,
            call_id: payload.call_id,
            duplicate,
        })
    }

    /// Complete an agent's active call and move the agent to after-call work
    ///
    /// Returns `true` when the call had already finished (idempotent no-op).
    pub fn complete_call(
        &self,
        agent_id: &str,
        call_id: &str,
        talk_secs: u64,
        hold_secs: u64,
        now: DateTime<Utc>,
    ) -> std::result::Result<bool, IngestError> {
        if !self.agents.contains(agent_id) {
            return Err(IngestError::UnknownAgent(agent_id.to_string()));
        }
        if let Some(call) = self.queues.find_call(call_id) {
            if call.status == CallStatus::Active && call.assigned_agent.as_deref() != Some(agent_id) {
                return Err(IngestError::Rejected(format!(
                    "call {call_id} is not assigned to {agent_id}"
                )));
            }
        }

        match self.queues.complete_call(call_id, talk_secs, hold_secs, now) {
            CompletionOutcome::Completed(call) => {
                let record = self.agents.end_call(agent_id, call_id, talk_secs, hold_secs, now);
                info!(agent_id = %agent_id, call_id = %call_id, talk = talk_secs, hold = hold_secs, "Call completed");
                self.persist(&call, record.as_ref(), now);
                Ok(false)
            }
            CompletionOutcome::AlreadyFinished => {
                let provisional = self.provisional.lock().take(call_id, agent_id);
                match provisional {
                    Some(entry) => {
                        self.amend_provisional(entry, talk_secs, hold_secs, now);
                        Ok(false)
                    }
                    None => {
                        debug!(call_id = %call_id, "Duplicate completion ignored");
                        Ok(true)
                    }
                }
            }
            CompletionOutcome::NotFound => Err(IngestError::Rejected(format!(
                "call {call_id} is not active"
            ))),
        }
    }

    /// Complete a call the agent record no longer references
    fn finish_detached(
        &self,
        detached: &DetachedCall,
        talk_secs: u64,
        hold_secs: u64,
        agent: Option<&AgentRecord>,
        now: DateTime<Utc>,
    ) -> Option<Call> {
        let call = self.close_detached(detached, talk_secs, hold_secs, now)?;
        self.persist(&call, agent, now);
        Some(call)
    }

    fn close_detached(&self, detached: &DetachedCall, talk_secs: u64, hold_secs: u64, now: DateTime<Utc>) -> Option<Call> {
        match self.queues.complete_call(&detached.call_id, talk_secs, hold_secs, now) {
            CompletionOutcome::Completed(call) => {
                debug!(call_id = %call.call_id, "Detached call completed");
                Some(call)
            }
            _ => None,
        }
    }

    fn hold_provisional(&self, entry: ProvisionalCompletion, now: DateTime<Utc>) {
        let overflow = self.provisional.lock().insert(entry);
        if let Some(oldest) = overflow {
            self.persist_provisional(oldest, now);
        }
    }

    /// Replace provisional figures with the ones from `call_complete` and persist
    fn amend_provisional(&self, entry: ProvisionalCompletion, talk_secs: u64, hold_secs: u64, now: DateTime<Utc>) {
        let ProvisionalCompletion {
            agent_id,
            mut call,
            kpis_derived,
            ..
        } = entry;
        let counted = (call.talk_secs, call.hold_secs);
        call.talk_secs = talk_secs;
        call.hold_secs = hold_secs;
        let record = if kpis_derived {
            self.agents
                .amend_call_kpis(&agent_id, counted, (talk_secs, hold_secs))
        } else {
            self.agents.get(&agent_id)
        };
        info!(agent_id = %agent_id, call_id = %call.call_id, talk = talk_secs, hold = hold_secs, "Call completed");
        self.persist(&call, record.as_ref(), now);
    }

    fn persist_provisional(&self, entry: ProvisionalCompletion, now: DateTime<Utc>) {
        let record = self.agents.get(&entry.agent_id);
        self.persist(&entry.call, record.as_ref(), now);
    }

    /// Persist state-change completions whose `call_complete` never arrived
    pub fn settle_provisional(&self, now: DateTime<Utc>) -> usize {
        let expired = self
            .provisional
            .lock()
            .expire(now - Duration::seconds(COMPLETION_GRACE_SECS));
        let settled = expired.len();
        for entry in expired {
            debug!(call_id = %entry.call.call_id, "No call_complete within grace; persisting provisional metrics");
            self.persist_provisional(entry, now);
        }
        settled
    }

    /// Completions still waiting for final metrics
    pub fn provisional_count(&self) -> usize {
        self.provisional.lock().len()
    }

    /// Admin force-end through the same completion path as agents use
    ///
    /// An active call is completed with zero talk metrics and its agent moves to
    /// after-call work; a waiting call is abandoned.
    pub fn force_end_call(&self, call_id: &str, now: DateTime<Utc>) -> Result<ForceEndReport> {
        let outcome = self.queues.force_end_call(call_id, now)?;
        let record = outcome
            .agent_id
            .as_deref()
            .and_then(|agent_id| self.agents.end_call(agent_id, call_id, 0, 0, now));
        self.persist(&outcome.call, record.as_ref(), now);
        Ok(ForceEndReport {
            call: outcome.call,
            agent_id: outcome.agent_id,
        })
    }

    /// Force an agent offline, completing any call it still held
    pub fn logout(&self, agent_id: &str, now: DateTime<Utc>) -> Result<()> {
        let talk = self
            .agents
            .get(agent_id)
            .and_then(|r| r.call_started_at)
            .map(|started| (now - started).num_seconds().max(0) as u64)
            .unwrap_or(0);
        let detached = self.agents.logout(agent_id, now)?;
        info!(agent_id = %agent_id, "Agent logged out");
        if let Some(detached) = detached {
            let record = self.agents.get(agent_id);
            self.finish_detached(&detached, talk, 0, record.as_ref(), now);
        }
        Ok(())
    }

    /// Connection lost without a logout
    pub fn mark_disconnected(&self, agent_id: &str, now: DateTime<Utc>) {
        if let Err(err) = self
            .agents
            .mark_connection(agent_id, ConnectionStatus::Disconnected, now)
        {
            trace!(agent_id = %agent_id, error = %err, "Disconnect for unknown agent");
        } else {
            debug!(agent_id = %agent_id, "Agent connection closed");
        }
    }

    /// Force-end the calls of agents removed by the eviction sweep
    pub fn release_evicted(&self, evicted: &[AgentRecord], now: DateTime<Utc>) -> usize {
        let mut released = 0;
        for record in evicted {
            let Some(call_id) = record.current_call_id.as_deref() else {
                continue;
            };
            match self.queues.force_end_call(call_id, now) {
                Ok(outcome) => {
                    warn!(agent_id = %record.agent_id, call_id = %call_id, "Evicted agent held a call; force-ended");
                    self.persist(&outcome.call, Some(record), now);
                    released += 1;
                }
                Err(err) => debug!(call_id = %call_id, error = %err, "Evicted agent's call already gone"),
            }
        }
        released
    }

    /// Persist abandoned calls
    pub fn record_abandoned(&self, calls: &[Call], now: DateTime<Utc>) {
        for call in calls {
            self.persist(call, None, now);
        }
    }

    /// Count a failure observed outside [`apply`](Self::apply)
    pub fn record_error(&self, err: &IngestError) {
        let counter = match err {
            IngestError::Malformed(_) | IngestError::AgentMismatch { .. } => &self.counters.malformed,
            IngestError::UnknownKind(_) => &self.counters.unknown_kind,
            IngestError::UnknownAgent(_) => &self.counters.unknown_agent,
            IngestError::Rejected(_) => &self.counters.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        match err {
            IngestError::UnknownKind(kind) => debug!(kind = %kind, "Ignoring unknown message type"),
            other => warn!(error = %other, "Dropped agent payload"),
        }
    }

    pub fn stats(&self) -> IngestionStats {
        IngestionStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            unknown_kind: self.counters.unknown_kind.load(Ordering::Relaxed),
            unknown_agent: self.counters.unknown_agent.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Hand a finished call (and the agent's rollup) to storage in the background
    fn persist(&self, call: &Call, agent: Option<&AgentRecord>, now: DateTime<Utc>) {
        let summary = CallSummary::from_call(call, agent.map(|a| a.location.clone()), now);
        let stats = agent.map(|a| DailyStats::from_agent(a, summary.date()));
        let store = Arc::clone(&self.store);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(call_id = %call.call_id, "No runtime; call record not persisted");
            return;
        };
        self.writes.spawn_on(
            async move {
                if let Err(err) = store.save_call(&summary).await {
                    warn!(call_id = %summary.call_id, error = %err, "Failed to persist call record");
                }
                if let Some(stats) = stats {
                    if let Err(err) = store.save_daily_stats(&stats).await {
                        warn!(agent_id = %stats.agent_id, error = %err, "Failed to persist daily stats");
                    }
                }
            },
            &handle,
        );
    }

    /// Persist pending completions and wait for every history write spawned so far
    pub async fn flush(&self) {
        let pending = self.provisional.lock().drain();
        let now = Utc::now();
        for entry in pending {
            self.persist_provisional(entry, now);
        }
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }
}

impl From<IngestError> for CallCenterError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::UnknownAgent(id) => CallCenterError::AgentNotFound(id),
            other => CallCenterError::Validation(other.to_string()),
        }
    }
}
