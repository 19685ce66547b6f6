//! # Historical Storage
//!
//! The live engine hands finished calls and per-agent daily rollups to a
//! [`CallRecordStore`]. Writes happen off the hot path and are best-effort: the
//! ingestion layer logs a failure and moves on. Reads back the history API.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryCallStore`] keeps everything in process and is the default.
//! - [`SqliteCallStore`] persists through `sqlx` when a database URL is configured.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentRecord;
use crate::queue::{Call, CallStatus};

pub use memory::MemoryCallStore;
pub use sqlite::SqliteCallStore;

/// Storage collaborator failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Record of one finished call as written to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub call_id: String,
    pub queue: String,
    pub department: String,
    pub agent_id: Option<String>,
    /// Location of the handling agent, used to scope history reads
    pub location: Option<String>,
    pub status: CallStatus,
    pub enqueued_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub wait_secs: u64,
    pub talk_secs: u64,
    pub hold_secs: u64,
    pub wrap_secs: u64,
    pub within_service_level: bool,
}

impl CallSummary {
    /// Build from a call in a terminal state
    pub fn from_call(call: &Call, location: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            queue: call.queue.clone(),
            department: call.department.clone(),
            agent_id: call.assigned_agent.clone(),
            location,
            status: call.status,
            enqueued_at: call.enqueued_at,
            assigned_at: call.assigned_at,
            completed_at: call.completed_at.unwrap_or(now),
            wait_secs: call.wait_secs,
            talk_secs: call.talk_secs,
            hold_secs: call.hold_secs,
            wrap_secs: call.wrap_secs,
            within_service_level: call.within_service_level.unwrap_or(false),
        }
    }

    /// Calendar date the call finished on
    pub fn date(&self) -> NaiveDate {
        self.completed_at.date_naive()
    }
}

/// Per-agent KPI rollup for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub agent_id: String,
    pub date: NaiveDate,
    pub department: String,
    pub location: String,
    pub calls_handled: u32,
    pub total_talk_secs: u64,
    pub total_hold_secs: u64,
    pub avg_handle_secs: f64,
    pub occupancy_pct: f64,
    pub adherence_pct: f64,
}

impl DailyStats {
    /// Snapshot an agent's current KPI bundle as the rollup for `date`
    pub fn from_agent(agent: &AgentRecord, date: NaiveDate) -> Self {
        Self {
            agent_id: agent.agent_id.clone(),
            date,
            department: agent.department.clone(),
            location: agent.location.clone(),
            calls_handled: agent.kpis.calls_handled,
            total_talk_secs: agent.kpis.total_talk_secs,
            total_hold_secs: agent.kpis.total_hold_secs,
            avg_handle_secs: agent.kpis.avg_handle_secs,
            occupancy_pct: agent.kpis.occupancy_pct,
            adherence_pct: agent.kpis.adherence_pct,
        }
    }
}

/// Durable history for finished calls and daily stats
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    /// Persist one finished call; the same call id overwrites
    async fn save_call(&self, summary: &CallSummary) -> Result<(), StoreError>;

    /// Upsert the rollup keyed by agent and date
    async fn save_daily_stats(&self, stats: &DailyStats) -> Result<(), StoreError>;

    /// Calls handled by one agent, newest first
    async fn calls_for_agent(&self, agent_id: &str) -> Result<Vec<CallSummary>, StoreError>;

    /// Calls finished on `date`, newest first
    async fn calls_on(&self, date: NaiveDate) -> Result<Vec<CallSummary>, StoreError>;

    /// Rollups for `date`, optionally for a single agent
    async fn daily_stats(
        &self,
        date: NaiveDate,
        agent_id: Option<&str>,
    ) -> Result<Vec<DailyStats>, StoreError>;

    /// Remove all history; returns the number of rows removed
    async fn truncate_all(&self) -> Result<u64, StoreError>;

    /// Cheap reachability probe used at startup and by `/health`
    async fn ping(&self) -> Result<(), StoreError>;
}
