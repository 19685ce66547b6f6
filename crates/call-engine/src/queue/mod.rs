//! # Virtual Queues
//!
//! Calls waiting for an agent live in named virtual queues, one FIFO per skill or
//! department. The [`CallQueueManager`] owns every queue; each queue's waiting list,
//! active-call map and service-level counters sit behind a single lock so a
//! pop-and-flip can never interleave with an enqueue or a completion.
//!
//! ```text
//!  enqueue ──► [ waiting FIFO ] ──assign──► { active } ──complete──► counters
//!                    │                          │
//!                    └──abandon──► counters     └──force end──► counters
//! ```

pub mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use manager::{CallQueueManager, CompletionOutcome, ForceEndOutcome, WipeReport};

/// Lifecycle of a call; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Waiting,
    Active,
    Completed,
    Abandoned,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Waiting => "waiting",
            CallStatus::Active => "active",
            CallStatus::Completed => "completed",
            CallStatus::Abandoned => "abandoned",
        }
    }
}

/// A single customer call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub call_id: String,
    pub queue: String,
    pub department: String,
    pub status: CallStatus,
    pub enqueued_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_agent: Option<String>,
    pub wait_secs: u64,
    pub talk_secs: u64,
    pub hold_secs: u64,
    pub wrap_secs: u64,
    /// Times an undelivered assignment was rolled back to the head of the queue
    pub requeue_count: u32,
    /// Set on completion: whether the wait stayed within the queue threshold
    pub within_service_level: Option<bool>,
}

impl Call {
    pub(crate) fn waiting(
        call_id: String,
        queue: &str,
        department: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            call_id,
            queue: queue.to_string(),
            department: department.to_string(),
            status: CallStatus::Waiting,
            enqueued_at: now,
            assigned_at: None,
            completed_at: None,
            assigned_agent: None,
            wait_secs: 0,
            talk_secs: 0,
            hold_secs: 0,
            wrap_secs: 0,
            requeue_count: 0,
            within_service_level: None,
        }
    }

    /// Seconds between enqueue and `now`, never negative
    pub fn waited(&self, now: DateTime<Utc>) -> u64 {
        (now - self.enqueued_at).num_seconds().max(0) as u64
    }

    /// Talk plus hold plus wrap
    pub fn handle_secs(&self) -> u64 {
        self.talk_secs + self.hold_secs + self.wrap_secs
    }
}

/// Point-in-time view of one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub queue: String,
    pub department: String,
    pub waiting_count: usize,
    pub active_count: usize,
    pub completed_count: u64,
    pub abandoned_count: u64,
    pub longest_wait_secs: u64,
    pub available_agents: usize,
    pub service_level_pct: f64,
    pub service_level_target_pct: f64,
    pub answered_in_threshold: u64,
    pub total_answered: u64,
}

/// Service level as a percentage; zero until something has been answered
pub fn service_level_pct(answered_in_threshold: u64, total_answered: u64) -> f64 {
    if total_answered == 0 {
        0.0
    } else {
        answered_in_threshold as f64 / total_answered as f64 * 100.0
    }
}
