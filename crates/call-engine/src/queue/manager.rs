//! Call queue manager
//!
//! Holds every virtual queue. Lock discipline inside the manager is always
//! queue mutex first, then the call index, then the finished-id window; nothing in
//! here ever reaches into the agent store, which lets the routing claim take the
//! agent store lock and then call [`CallQueueManager::assign_call`] safely.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{service_level_pct, Call, CallStatus, QueueSnapshot};
use crate::config::QueueConfig;
use crate::error::{CallCenterError, Result};

/// How many finished call ids are remembered for idempotent completion
const FINISHED_WINDOW: usize = 10_000;

/// Result of [`CallQueueManager::complete_call`]
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The call moved Active to Completed; carries the final call
    Completed(Call),
    /// The call already reached a terminal state; nothing changed
    AlreadyFinished,
    /// No such call, or it is still waiting
    NotFound,
}

/// Result of [`CallQueueManager::force_end_call`]
#[derive(Debug, Clone, PartialEq)]
pub struct ForceEndOutcome {
    pub call: Call,
    /// Owning agent when the call was active; `None` when a waiting call was abandoned
    pub agent_id: Option<String>,
}

/// Result of [`CallQueueManager::wipe_all_calls`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WipeReport {
    pub cleared: usize,
    /// `(agent_id, call_id)` for every active call that was dropped
    pub released: Vec<(String, String)>,
}

struct VirtualQueue {
    settings: QueueConfig,
    waiting: VecDeque<Call>,
    active: HashMap<String, Call>,
    completed: u64,
    abandoned: u64,
    answered_in_threshold: u64,
    total_answered: u64,
}

impl VirtualQueue {
    fn new(settings: QueueConfig) -> Self {
        Self {
            settings,
            waiting: VecDeque::new(),
            active: HashMap::new(),
            completed: 0,
            abandoned: 0,
            answered_in_threshold: 0,
            total_answered: 0,
        }
    }

    fn finish_active(&mut self, call_id: &str, talk_secs: u64, hold_secs: u64, now: DateTime<Utc>) -> Option<Call> {
        let mut call = self.active.remove(call_id)?;
        call.status = CallStatus::Completed;
        call.completed_at = Some(now);
        call.talk_secs = talk_secs;
        call.hold_secs = hold_secs;
        let within = call.wait_secs <= self.settings.service_level_threshold_secs;
        call.within_service_level = Some(within);
        self.completed += 1;
        self.total_answered += 1;
        if within {
            self.answered_in_threshold += 1;
        }
        Some(call)
    }

    fn abandon_waiting(&mut self, call_id: &str, now: DateTime<Utc>) -> Option<Call> {
        let position = self.waiting.iter().position(|c| c.call_id == call_id)?;
        let mut call = self.waiting.remove(position)?;
        call.status = CallStatus::Abandoned;
        call.wait_secs = call.waited(now);
        call.completed_at = Some(now);
        self.abandoned += 1;
        Some(call)
    }

    fn snapshot(&self, available_agents: usize, now: DateTime<Utc>) -> QueueSnapshot {
        QueueSnapshot {
            queue: self.settings.name.clone(),
            department: self.settings.department.clone(),
            waiting_count: self.waiting.len(),
            active_count: self.active.len(),
            completed_count: self.completed,
            abandoned_count: self.abandoned,
            longest_wait_secs: self.waiting.front().map(|c| c.waited(now)).unwrap_or(0),
            available_agents,
            service_level_pct: service_level_pct(self.answered_in_threshold, self.total_answered),
            service_level_target_pct: self.settings.service_level_target_pct,
            answered_in_threshold: self.answered_in_threshold,
            total_answered: self.total_answered,
        }
    }

    fn reset(&mut self) -> usize {
        let removed = self.waiting.len() + self.active.len();
        self.waiting.clear();
        self.active.clear();
        self.completed = 0;
        self.abandoned = 0;
        self.answered_in_threshold = 0;
        self.total_answered = 0;
        removed
    }
}

#[derive(Default)]
struct FinishedWindow {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl FinishedWindow {
    fn insert(&mut self, call_id: String) {
        if self.ids.insert(call_id.clone()) {
            self.order.push_back(call_id);
            while self.order.len() > FINISHED_WINDOW {
                if let Some(old) = self.order.pop_front() {
                    self.ids.remove(&old);
                }
            }
        }
    }

    fn contains(&self, call_id: &str) -> bool {
        self.ids.contains(call_id)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}

/// All virtual queues plus an index of live calls
pub struct CallQueueManager {
    queues: RwLock<BTreeMap<String, Arc<Mutex<VirtualQueue>>>>,
    /// call id to queue name, for every waiting or active call
    call_index: DashMap<String, String>,
    finished: Mutex<FinishedWindow>,
}

impl CallQueueManager {
    pub fn new(configs: &[QueueConfig]) -> Self {
        let manager = Self {
            queues: RwLock::new(BTreeMap::new()),
            call_index: DashMap::new(),
            finished: Mutex::new(FinishedWindow::default()),
        };
        for config in configs {
            manager.add_queue(config.clone());
        }
        manager
    }

    /// Register a queue; an existing queue with the same name keeps its calls
    /// and only takes the new settings
    pub fn add_queue(&self, settings: QueueConfig) {
        let mut queues = self.queues.write();
        match queues.get(&settings.name) {
            Some(existing) => existing.lock().settings = settings,
            None => {
                debug!(queue = %settings.name, department = %settings.department, "Queue registered");
                queues.insert(settings.name.clone(), Arc::new(Mutex::new(VirtualQueue::new(settings))));
            }
        }
    }

    fn queue(&self, name: &str) -> Option<Arc<Mutex<VirtualQueue>>> {
        self.queues.read().get(name).cloned()
    }

    fn all_queues(&self) -> Vec<Arc<Mutex<VirtualQueue>>> {
        self.queues.read().values().cloned().collect()
    }

    pub fn department_of(&self, queue: &str) -> Option<String> {
        self.queue(queue).map(|q| q.lock().settings.department.clone())
    }

    /// Create a waiting call at the tail of `queue`
    pub fn enqueue_call(&self, queue: &str, call_id: Option<String>, now: DateTime<Utc>) -> Result<Call> {
        let handle = self
            .queue(queue)
            .ok_or_else(|| CallCenterError::QueueNotFound(queue.to_string()))?;

        let call_id = match call_id {
            Some(id) if id.trim().is_empty() => {
                return Err(CallCenterError::validation("call id must not be empty"))
            }
            Some(id) => id,
            None => format!("call-{}", Uuid::new_v4()),
        };

        let mut q = handle.lock();
        // The index entry is the claim on the id across every queue
        match self.call_index.entry(call_id.clone()) {
            Entry::Occupied(_) => return Err(CallCenterError::DuplicateCall(call_id)),
            Entry::Vacant(slot) => {
                if self.finished.lock().contains(&call_id) {
                    return Err(CallCenterError::DuplicateCall(call_id));
                }
                slot.insert(queue.to_string());
            }
        }
        let call = Call::waiting(call_id, queue, &q.settings.department, now);
        q.waiting.push_back(call.clone());
        debug!(call_id = %call.call_id, queue = %queue, depth = q.waiting.len(), "Call enqueued");
        Ok(call)
    }

    /// Pop the head of `queue` and flip it to Active for `agent_id`
    ///
    /// This is the only way a waiting call becomes claimed.
    pub fn assign_call(&self, queue: &str, agent_id: &str, now: DateTime<Utc>) -> Option<Call> {
        let handle = self.queue(queue)?;
        let mut q = handle.lock();
        let mut call = q.waiting.pop_front()?;
        call.status = CallStatus::Active;
        call.assigned_at = Some(now);
        call.assigned_agent = Some(agent_id.to_string());
        call.wait_secs = call.waited(now);
        q.active.insert(call.call_id.clone(), call.clone());
        Some(call)
    }

    /// Roll an undelivered assignment back to the head of its queue
    pub fn requeue_front(&self, call_id: &str) -> Result<Call> {
        let queue = self.indexed_queue(call_id)?;
        let handle = self
            .queue(&queue)
            .ok_or_else(|| CallCenterError::QueueNotFound(queue.clone()))?;
        let mut q = handle.lock();
        let mut call = q
            .active
            .remove(call_id)
            .ok_or_else(|| CallCenterError::CallNotFound(call_id.to_string()))?;
        call.status = CallStatus::Waiting;
        call.assigned_at = None;
        call.assigned_agent = None;
        call.wait_secs = 0;
        call.requeue_count += 1;
        q.waiting.push_front(call.clone());
        warn!(call_id = %call_id, queue = %queue, requeues = call.requeue_count, "Call returned to head of queue");
        Ok(call)
    }

    /// Move an active call to Completed
    ///
    /// Idempotent: completing an already finished call changes nothing.
    pub fn complete_call(&self, call_id: &str, talk_secs: u64, hold_secs: u64, now: DateTime<Utc>) -> CompletionOutcome {
        let Ok(queue) = self.indexed_queue(call_id) else {
            return if self.finished.lock().contains(call_id) {
                CompletionOutcome::AlreadyFinished
            } else {
                CompletionOutcome::NotFound
            };
        };
        let Some(handle) = self.queue(&queue) else {
            return CompletionOutcome::NotFound;
        };

        let mut q = handle.lock();
        match q.finish_active(call_id, talk_secs, hold_secs, now) {
            Some(call) => {
                self.retire(call_id);
                debug!(call_id = %call_id, queue = %queue, wait = call.wait_secs, talk = talk_secs, "Call completed");
                CompletionOutcome::Completed(call)
            }
            // Indexed but not active means it is still waiting
            None => CompletionOutcome::NotFound,
        }
    }

    /// End a call from the admin surface, whichever queue it sits in
    ///
    /// Active calls are completed with zero talk metrics; waiting calls are abandoned.
    pub fn force_end_call(&self, call_id: &str, now: DateTime<Utc>) -> Result<ForceEndOutcome> {
        let queue = self.indexed_queue(call_id)?;
        let handle = self
            .queue(&queue)
            .ok_or_else(|| CallCenterError::CallNotFound(call_id.to_string()))?;

        let mut q = handle.lock();
        if let Some(call) = q.finish_active(call_id, 0, 0, now) {
            self.retire(call_id);
            info!(call_id = %call_id, queue = %queue, agent = ?call.assigned_agent, "Call force-ended");
            let agent_id = call.assigned_agent.clone();
            return Ok(ForceEndOutcome { call, agent_id });
        }
        if let Some(call) = q.abandon_waiting(call_id, now) {
            self.retire(call_id);
            info!(call_id = %call_id, queue = %queue, "Waiting call force-ended as abandoned");
            return Ok(ForceEndOutcome { call, agent_id: None });
        }
        Err(CallCenterError::CallNotFound(call_id.to_string()))
    }

    /// Abandon a call that is still waiting
    pub fn abandon_call(&self, call_id: &str, now: DateTime<Utc>) -> Result<Call> {
        let queue = self.indexed_queue(call_id)?;
        let handle = self
            .queue(&queue)
            .ok_or_else(|| CallCenterError::CallNotFound(call_id.to_string()))?;
        let mut q = handle.lock();
        let call = q
            .abandon_waiting(call_id, now)
            .ok_or_else(|| CallCenterError::CallNotFound(call_id.to_string()))?;
        self.retire(call_id);
        Ok(call)
    }

    /// Abandon every waiting call older than its queue's maximum wait
    pub fn abandon_expired(&self, now: DateTime<Utc>) -> Vec<Call> {
        let mut abandoned = Vec::new();
        for handle in self.all_queues() {
            let mut q = handle.lock();
            let max_wait = q.settings.max_wait_secs;
            if max_wait == 0 {
                continue;
            }
            let expired: Vec<String> = q
                .waiting
                .iter()
                .filter(|c| c.waited(now) > max_wait)
                .map(|c| c.call_id.clone())
                .collect();
            for call_id in expired {
                if let Some(call) = q.abandon_waiting(&call_id, now) {
                    self.retire(&call_id);
                    abandoned.push(call);
                }
            }
        }
        if !abandoned.is_empty() {
            info!(count = abandoned.len(), "Abandoned calls past maximum wait");
        }
        abandoned
    }

    /// Drop every waiting and active call and reset counters
    pub fn wipe_all_calls(&self) -> WipeReport {
        let mut report = WipeReport::default();
        for handle in self.all_queues() {
            let mut q = handle.lock();
            for call in q.active.values() {
                if let Some(agent) = &call.assigned_agent {
                    report.released.push((agent.clone(), call.call_id.clone()));
                }
            }
            for call in q.waiting.iter().chain(q.active.values()) {
                self.call_index.remove(&call.call_id);
            }
            report.cleared += q.reset();
        }
        info!(cleared = report.cleared, released = report.released.len(), "Wiped all calls");
        report
    }

    /// Wipe calls and forget finished ids
    pub fn reset(&self) -> WipeReport {
        let report = self.wipe_all_calls();
        self.finished.lock().clear();
        report
    }

    pub fn snapshot(&self, queue: &str, available_agents: usize, now: DateTime<Utc>) -> Result<QueueSnapshot> {
        let handle = self
            .queue(queue)
            .ok_or_else(|| CallCenterError::QueueNotFound(queue.to_string()))?;
        let q = handle.lock();
        Ok(q.snapshot(available_agents, now))
    }

    /// Snapshot every queue; `available` maps a department to its routable agent count
    pub fn snapshots<F>(&self, now: DateTime<Utc>, available: F) -> Vec<QueueSnapshot>
    where
        F: Fn(&str) -> usize,
    {
        self.all_queues()
            .iter()
            .map(|handle| {
                let q = handle.lock();
                let agents = available(&q.settings.department);
                q.snapshot(agents, now)
            })
            .collect()
    }

    /// Snapshots grouped by owning department
    pub fn snapshots_by_department<F>(&self, now: DateTime<Utc>, available: F) -> BTreeMap<String, Vec<QueueSnapshot>>
    where
        F: Fn(&str) -> usize,
    {
        let mut grouped: BTreeMap<String, Vec<QueueSnapshot>> = BTreeMap::new();
        for snapshot in self.snapshots(now, available) {
            grouped.entry(snapshot.department.clone()).or_default().push(snapshot);
        }
        grouped
    }

    /// `(queue, department)` for every queue with waiting calls, in name order
    pub fn non_empty_queues(&self) -> Vec<(String, String)> {
        self.all_queues()
            .iter()
            .filter_map(|handle| {
                let q = handle.lock();
                (!q.waiting.is_empty()).then(|| (q.settings.name.clone(), q.settings.department.clone()))
            })
            .collect()
    }

    pub fn waiting_count(&self, queue: &str) -> usize {
        self.queue(queue).map(|q| q.lock().waiting.len()).unwrap_or(0)
    }

    pub fn total_waiting(&self) -> usize {
        self.all_queues().iter().map(|q| q.lock().waiting.len()).sum()
    }

    pub fn total_active(&self) -> usize {
        self.all_queues().iter().map(|q| q.lock().active.len()).sum()
    }

    /// Look up a waiting or active call
    pub fn find_call(&self, call_id: &str) -> Option<Call> {
        let queue = self.indexed_queue(call_id).ok()?;
        let handle = self.queue(&queue)?;
        let q = handle.lock();
        q.active
            .get(call_id)
            .cloned()
            .or_else(|| q.waiting.iter().find(|c| c.call_id == call_id).cloned())
    }

    /// Waiting call ids of `queue` in FIFO order
    pub fn waiting_ids(&self, queue: &str) -> Vec<String> {
        self.queue(queue)
            .map(|q| q.lock().waiting.iter().map(|c| c.call_id.clone()).collect())
            .unwrap_or_default()
    }

    fn indexed_queue(&self, call_id: &str) -> Result<String> {
        self.call_index
            .get(call_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CallCenterError::CallNotFound(call_id.to_string()))
    }

    // Finished before unindexed, so a racing enqueue always sees one of the two
    fn retire(&self, call_id: &str) {
        self.finished.lock().insert(call_id.to_string());
        self.call_index.remove(call_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config(name: &str, department: &str) -> QueueConfig {
        QueueConfig {
            name: name.to_string(),
            department: department.to_string(),
            service_level_target_pct: 80.0,
            service_level_threshold_secs: 20,
            max_wait_secs: 300,
        }
    }

    fn manager() -> CallQueueManager {
        CallQueueManager::new(&[config("sales_inbound", "sales"), config("support_inbound", "support")])
    }

    #[test]
    fn test_enqueue_unknown_queue() {
        let manager = manager();
        let err = manager.enqueue_call("nope", None, Utc::now()).unwrap_err();
        assert!(matches!(err, CallCenterError::QueueNotFound(_)));
    }

    #[test]
    fn test_duplicate_call_id_rejected() {
        let manager = manager();
        let now = Utc::now();
        manager.enqueue_call("sales_inbound", Some("c1".into()), now).unwrap();
        let err = manager.enqueue_call("support_inbound", Some("c1".into()), now).unwrap_err();
        assert!(matches!(err, CallCenterError::DuplicateCall(_)));
    }

    #[test]
    fn test_assign_pops_in_fifo_order() {
        let manager = manager();
        let now = Utc::now();
        manager.enqueue_call("sales_inbound", Some("a".into()), now).unwrap();
        manager.enqueue_call("sales_inbound", Some("b".into()), now).unwrap();

        let first = manager.assign_call("sales_inbound", "agent-1", now).unwrap();
        assert_eq!(first.call_id, "a");
        assert_eq!(first.status, CallStatus::Active);
        assert_eq!(first.assigned_agent.as_deref(), Some("agent-1"));
        assert_eq!(manager.waiting_ids("sales_inbound"), vec!["b".to_string()]);
    }

    #[test]
    fn test_assign_empty_queue() {
        let manager = manager();
        assert!(manager.assign_call("sales_inbound", "agent-1", Utc::now()).is_none());
        assert!(manager.assign_call("missing", "agent-1", Utc::now()).is_none());
    }

    #[test]
    fn test_complete_call_is_idempotent() {
        let manager = manager();
        let t0 = Utc::now();
        manager.enqueue_call("sales_inbound", Some("c1".into()), t0).unwrap();
        manager.assign_call("sales_inbound", "agent-1", t0 + Duration::seconds(5)).unwrap();

        let outcome = manager.complete_call("c1", 120, 10, t0 + Duration::seconds(200));
        match outcome {
            CompletionOutcome::Completed(call) => {
                assert_eq!(call.wait_secs, 5);
                assert_eq!(call.handle_secs(), 130);
                assert_eq!(call.within_service_level, Some(true));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            manager.complete_call("c1", 120, 10, t0 + Duration::seconds(201)),
            CompletionOutcome::AlreadyFinished
        );

        let snapshot = manager.snapshot("sales_inbound", 0, t0).unwrap();
        assert_eq!(snapshot.total_answered, 1);
        assert_eq!(snapshot.answered_in_threshold, 1);
        assert_eq!(snapshot.completed_count, 1);
        assert_eq!(snapshot.service_level_pct, 100.0);
    }

    #[test]
    fn test_service_level_threshold_boundary() {
        let manager = manager();
        let t0 = Utc::now();
        manager.enqueue_call("sales_inbound", Some("fast".into()), t0).unwrap();
        manager.enqueue_call("sales_inbound", Some("slow".into()), t0).unwrap();
        manager.assign_call("sales_inbound", "a1", t0 + Duration::seconds(20)).unwrap();
        manager.assign_call("sales_inbound", "a2", t0 + Duration::seconds(21)).unwrap();
        manager.complete_call("fast", 10, 0, t0 + Duration::seconds(40));
        manager.complete_call("slow", 10, 0, t0 + Duration::seconds(40));

        let snapshot = manager.snapshot("sales_inbound", 0, t0).unwrap();
        assert_eq!(snapshot.answered_in_threshold, 1);
        assert_eq!(snapshot.total_answered, 2);
        assert_eq!(snapshot.service_level_pct, 50.0);
    }

    #[test]
    fn test_complete_waiting_or_unknown_call() {
        let manager = manager();
        let now = Utc::now();
        manager.enqueue_call("sales_inbound", Some("c1".into()), now).unwrap();
        assert_eq!(manager.complete_call("c1", 1, 0, now), CompletionOutcome::NotFound);
        assert_eq!(manager.complete_call("ghost", 1, 0, now), CompletionOutcome::NotFound);
        assert_eq!(manager.waiting_count("sales_inbound"), 1);
    }

    #[test]
    fn test_force_end_active_call_returns_agent() {
        let manager = manager();
        let now = Utc::now();
        manager.enqueue_call("support_inbound", Some("c1".into()), now).unwrap();
        manager.assign_call("support_inbound", "agent-7", now).unwrap();

        let outcome = manager.force_end_call("c1", now).unwrap();
        assert_eq!(outcome.agent_id.as_deref(), Some("agent-7"));
        assert_eq!(outcome.call.status, CallStatus::Completed);
        assert_eq!(outcome.call.talk_secs, 0);
        assert!(matches!(
            manager.force_end_call("c1", now),
            Err(CallCenterError::CallNotFound(_))
        ));
    }

    #[test]
    fn test_force_end_waiting_call_abandons() {
        let manager = manager();
        let now = Utc::now();
        manager.enqueue_call("support_inbound", Some("c1".into()), now).unwrap();
        let outcome = manager.force_end_call("c1", now).unwrap();
        assert!(outcome.agent_id.is_none());
        assert_eq!(outcome.call.status, CallStatus::Abandoned);
        assert_eq!(manager.snapshot("support_inbound", 0, now).unwrap().abandoned_count, 1);
    }

    #[test]
    fn test_requeue_front_preserves_head_position() {
        let manager = manager();
        let now = Utc::now();
        manager.enqueue_call("sales_inbound", Some("a".into()), now).unwrap();
        manager.enqueue_call("sales_inbound", Some("b".into()), now).unwrap();
        manager.assign_call("sales_inbound", "agent-1", now).unwrap();

        let call = manager.requeue_front("a").unwrap();
        assert_eq!(call.status, CallStatus::Waiting);
        assert_eq!(call.requeue_count, 1);
        assert!(call.assigned_agent.is_none());
        assert_eq!(manager.waiting_ids("sales_inbound"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(manager.total_active(), 0);
    }

    #[test]
    fn test_wipe_all_calls_counts_everything() {
        let manager = manager();
        let now = Utc::now();
        for id in ["w1", "w2", "w3", "a1", "a2"] {
            manager.enqueue_call("sales_inbound", Some(id.into()), now).unwrap();
        }
        manager.assign_call("sales_inbound", "agent-1", now).unwrap();
        manager.assign_call("sales_inbound", "agent-2", now).unwrap();

        let report = manager.wipe_all_calls();
        assert_eq!(report.cleared, 5);
        assert_eq!(report.released.len(), 2);

        for snapshot in manager.snapshots(now, |_| 0) {
            assert_eq!(snapshot.waiting_count, 0);
            assert_eq!(snapshot.active_count, 0);
            assert_eq!(snapshot.completed_count, 0);
            assert_eq!(snapshot.abandoned_count, 0);
        }
        assert!(manager.find_call("w1").is_none());
    }

    #[test]
    fn test_abandon_expired_uses_queue_max_wait() {
        let manager = manager();
        let t0 = Utc::now();
        manager.enqueue_call("sales_inbound", Some("old".into()), t0).unwrap();
        manager
            .enqueue_call("sales_inbound", Some("new".into()), t0 + Duration::seconds(200))
            .unwrap();

        let abandoned = manager.abandon_expired(t0 + Duration::seconds(301));
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].call_id, "old");
        assert_eq!(abandoned[0].wait_secs, 301);
        assert_eq!(manager.waiting_ids("sales_inbound"), vec!["new".to_string()]);
    }

    #[test]
    fn test_snapshot_longest_wait() {
        let manager = manager();
        let t0 = Utc::now();
        manager.enqueue_call("sales_inbound", None, t0).unwrap();
        manager.enqueue_call("sales_inbound", None, t0 + Duration::seconds(10)).unwrap();
        let snapshot = manager.snapshot("sales_inbound", 3, t0 + Duration::seconds(30)).unwrap();
        assert_eq!(snapshot.waiting_count, 2);
        assert_eq!(snapshot.longest_wait_secs, 30);
        assert_eq!(snapshot.available_agents, 3);
        assert_eq!(snapshot.service_level_pct, 0.0);
    }

    #[test]
    fn test_same_id_racing_into_two_queues_is_claimed_once() {
        use std::sync::Barrier;
        use std::thread;

        let manager = manager();
        let now = Utc::now();
        for round in 0..2_000 {
            let call_id = format!("dup-{round}");
            let barrier = Barrier::new(2);
            let accepted: usize = thread::scope(|scope| {
                let handles: Vec<_> = ["sales_inbound", "support_inbound"]
                    .into_iter()
                    .map(|queue| {
                        let (manager, barrier, call_id) = (&manager, &barrier, &call_id);
                        scope.spawn(move || {
                            barrier.wait();
                            manager.enqueue_call(queue, Some(call_id.clone()), now).is_ok()
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).filter(|accepted| *accepted).count()
            });
            assert_eq!(accepted, 1, "{call_id} enqueued twice");
        }
        let waiting = manager.waiting_ids("sales_inbound").len() + manager.waiting_ids("support_inbound").len();
        assert_eq!(waiting, 2_000);
    }

    #[test]
    fn test_racing_id_is_completable_from_its_queue() {
        let manager = manager();
        let now = Utc::now();
        std::thread::scope(|scope| {
            scope.spawn(|| manager.enqueue_call("sales_inbound", Some("x".into()), now));
            scope.spawn(|| manager.enqueue_call("support_inbound", Some("x".into()), now));
        });
        let queue = if manager.waiting_ids("sales_inbound").is_empty() { "support_inbound" } else { "sales_inbound" };
        manager.assign_call(queue, "agent-1", now).unwrap();
        assert!(matches!(manager.complete_call("x", 30, 5, now), CompletionOutcome::Completed(_)));
    }
}
