//! # Agent State
//!
//! Types describing a single agent as the engine sees it, plus the concurrent
//! registry ([`AgentStateStore`]) that holds them.
//!
//! An [`AgentRecord`] is created either from the configured roster (an offline
//! placeholder) or from the first `register` message an agent sends. From then on
//! it is mutated by event ingestion (heartbeats, state changes, call completions)
//! and by the routing loop (call assignment), and finally evicted by the
//! maintenance sweep once it has been silent past the retention window.
//!
//! ## Call ownership
//!
//! `current_call_id` is set if and only if the agent is in a call-occupying state
//! ([`AgentState::is_call_occupying`]). The only way an agent acquires a call is the
//! routing claim in [`AgentStateStore::claim_longest_idle`]; every path that leaves
//! a call-occupying state hands the detached call back to the caller so it can be
//! completed rather than orphaned.

pub mod alerts;
pub mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use alerts::{compute_alerts, AgentAlert, AlertKind, AlertSeverity, AlertThresholds};
pub use store::{
    AgentStateStore, AgentStoreSettings, HeartbeatOutcome, ProfilePatch, RegisterOutcome,
    StateChangeOutcome,
};

/// Reported working state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Available,
    Busy,
    OnCall,
    Break,
    Offline,
    AfterCallWork,
    Training,
    Meeting,
    Lunch,
    OnHold,
    Transferring,
    Conference,
}

impl AgentState {
    /// Every state, in declaration order
    pub const ALL: [AgentState; 12] = [
        AgentState::Available,
        AgentState::Busy,
        AgentState::OnCall,
        AgentState::Break,
        AgentState::Offline,
        AgentState::AfterCallWork,
        AgentState::Training,
        AgentState::Meeting,
        AgentState::Lunch,
        AgentState::OnHold,
        AgentState::Transferring,
        AgentState::Conference,
    ];

    /// States that require a routed call to be attached to the agent
    pub fn is_call_occupying(self) -> bool {
        matches!(
            self,
            AgentState::OnCall | AgentState::OnHold | AgentState::Transferring | AgentState::Conference
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Available => "available",
            AgentState::Busy => "busy",
            AgentState::OnCall => "on_call",
            AgentState::Break => "break",
            AgentState::Offline => "offline",
            AgentState::AfterCallWork => "after_call_work",
            AgentState::Training => "training",
            AgentState::Meeting => "meeting",
            AgentState::Lunch => "lunch",
            AgentState::OnHold => "on_hold",
            AgentState::Transferring => "transferring",
            AgentState::Conference => "conference",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness of the agent's connection as judged by heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Stale,
    Disconnected,
}

/// Per-agent performance counters
///
/// Reported KPIs from the simulator replace the bundle wholesale; the engine only
/// bumps the call counters itself when a routed call completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KpiBundle {
    pub calls_handled: u32,
    pub total_talk_secs: u64,
    pub total_hold_secs: u64,
    pub total_wrap_secs: u64,
    pub transfers: u32,
    pub holds: u32,
    pub avg_handle_secs: f64,
    pub occupancy_pct: f64,
    pub adherence_pct: f64,
}

impl KpiBundle {
    /// Account for one finished call
    pub fn record_call(&mut self, talk_secs: u64, hold_secs: u64) {
        self.calls_handled += 1;
        self.total_talk_secs += talk_secs;
        self.total_hold_secs += hold_secs;
        if hold_secs > 0 {
            self.holds += 1;
        }
        self.recompute_average();
    }

    /// Replace the talk/hold figures of a call already counted with the final ones
    pub fn amend_call(&mut self, counted: (u64, u64), actual: (u64, u64)) {
        let (counted_talk, counted_hold) = counted;
        let (talk_secs, hold_secs) = actual;
        self.total_talk_secs = self.total_talk_secs.saturating_sub(counted_talk) + talk_secs;
        self.total_hold_secs = self.total_hold_secs.saturating_sub(counted_hold) + hold_secs;
        match (counted_hold > 0, hold_secs > 0) {
            (false, true) => self.holds += 1,
            (true, false) => self.holds = self.holds.saturating_sub(1),
            _ => {}
        }
        self.recompute_average();
    }

    fn recompute_average(&mut self) {
        if self.calls_handled == 0 {
            self.avg_handle_secs = 0.0;
            return;
        }
        let handled = (self.total_talk_secs + self.total_hold_secs + self.total_wrap_secs) as f64;
        self.avg_handle_secs = handled / f64::from(self.calls_handled);
    }
}

/// Identity fields of an agent, as given by the roster or a `register` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub agent_id: String,
    pub department: String,
    pub location: String,
    #[serde(default)]
    pub team: String,
}

/// Live state of one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub agent_id: String,
    pub department: String,
    pub location: String,
    pub team: String,
    pub state: AgentState,
    pub state_since: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub connection: ConnectionStatus,
    /// When `connection` last changed
    pub connection_since: DateTime<Utc>,
    pub kpis: KpiBundle,
    pub current_call_id: Option<String>,
    pub current_queue: Option<String>,
    pub call_started_at: Option<DateTime<Utc>>,
    pub acw_started_at: Option<DateTime<Utc>>,
    pub break_started_at: Option<DateTime<Utc>>,
    pub alerts: Vec<AgentAlert>,
    /// Monotonic registration order, used to pick scale-down victims
    #[serde(skip)]
    pub registered_seq: u64,
}

/// A call that was attached to an agent when it left its call-occupying state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedCall {
    pub call_id: String,
    pub queue: Option<String>,
}

impl AgentRecord {
    /// Offline placeholder for a roster entry that has never connected
    pub fn offline(profile: AgentProfile, now: DateTime<Utc>, registered_seq: u64) -> Self {
        Self {
            agent_id: profile.agent_id,
            department: profile.department,
            location: profile.location,
            team: profile.team,
            state: AgentState::Offline,
            state_since: now,
            last_update: now,
            last_heartbeat: None,
            connection: ConnectionStatus::Disconnected,
            connection_since: now,
            kpis: KpiBundle::default(),
            current_call_id: None,
            current_queue: None,
            call_started_at: None,
            acw_started_at: None,
            break_started_at: None,
            alerts: Vec::new(),
            registered_seq,
        }
    }

    /// Available, connected and holding no call
    pub fn is_routable(&self) -> bool {
        self.state == AgentState::Available
            && self.connection == ConnectionStatus::Connected
            && self.current_call_id.is_none()
    }

    pub fn has_call(&self) -> bool {
        self.current_call_id.is_some()
    }

    pub fn profile(&self) -> AgentProfile {
        AgentProfile {
            agent_id: self.agent_id.clone(),
            department: self.department.clone(),
            location: self.location.clone(),
            team: self.team.clone(),
        }
    }

    pub(crate) fn set_connection(&mut self, status: ConnectionStatus, now: DateTime<Utc>) {
        if self.connection != status {
            self.connection = status;
            self.connection_since = now;
        }
    }

    pub(crate) fn apply_profile(&mut self, profile: &AgentProfile) {
        self.department = profile.department.clone();
        self.location = profile.location.clone();
        self.team = profile.team.clone();
    }

    /// Move to `requested`, keeping the call ownership invariant
    ///
    /// A request for a call-occupying state without an attached call is downgraded
    /// to `Busy`. Leaving a call-occupying state detaches the call and returns it.
    pub(crate) fn transition(
        &mut self,
        requested: AgentState,
        now: DateTime<Utc>,
    ) -> (AgentState, Option<DetachedCall>) {
        let target = if requested.is_call_occupying() && !self.has_call() {
            AgentState::Busy
        } else {
            requested
        };

        let detached = if !target.is_call_occupying() {
            self.take_call()
        } else {
            None
        };

        if target != self.state {
            if self.state == AgentState::AfterCallWork {
                self.acw_started_at = None;
            }
            if self.state == AgentState::Break {
                self.break_started_at = None;
            }
            match target {
                AgentState::AfterCallWork => self.acw_started_at = Some(now),
                AgentState::Break => self.break_started_at = Some(now),
                _ => {}
            }
            self.state = target;
            self.state_since = now;
        }
        self.last_update = now;
        (target, detached)
    }

    /// Attach a routed call and flip to `OnCall`
    pub(crate) fn begin_call(&mut self, call_id: &str, queue: &str, now: DateTime<Utc>) {
        self.current_call_id = Some(call_id.to_string());
        self.current_queue = Some(queue.to_string());
        self.call_started_at = Some(now);
        self.acw_started_at = None;
        self.break_started_at = None;
        self.state = AgentState::OnCall;
        self.state_since = now;
        self.last_update = now;
    }

    pub(crate) fn take_call(&mut self) -> Option<DetachedCall> {
        self.call_started_at = None;
        let queue = self.current_queue.take();
        self.current_call_id
            .take()
            .map(|call_id| DetachedCall { call_id, queue })
    }
}
