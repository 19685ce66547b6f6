//! # CallPulse Engine
//!
//! Real-time agent state synchronization and call routing for a call center.
//!
//! This crate provides:
//! - An authoritative agent state store fed by agent WebSocket payloads
//! - Virtual queues with FIFO routing to the longest-idle available agent
//! - Periodic dashboard widgets fanned out to viewers, scoped by location
//! - Best-effort call history in SQLite (or memory)
//! - An admin control surface and an axum HTTP/WebSocket server
//!
//! ## Architecture
//!
//! ```text
//!  agent sockets ──► AgentConnectionHub ──► EventIngestion ──► AgentStateStore
//!                          ▲                      │                 │
//!                          │ call_assign          ▼                 │
//!                     RoutingLoop ◄──────── CallQueueManager ◄──────┘
//!                                                 │
//!  viewer sockets ◄── DashboardBroadcastHub ◄── SnapshotAggregator
//! ```
//!
//! [`CallCenterEngine`] builds and wires every component and owns the background
//! tasks. Components are explicit instances shared through `Arc`; there are no
//! process-wide globals.

pub mod agent;
pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod hub;
pub mod identity;
pub mod ingestion;
pub mod logging;
pub mod protocol;
pub mod queue;
pub mod routing;
pub mod server;
pub mod storage;

pub use agent::{AgentRecord, AgentState, AgentStateStore, ConnectionStatus};
pub use aggregator::{SnapshotAggregator, Widget};
pub use config::CallCenterConfig;
pub use engine::{CallCenterEngine, HealthReport, MaintenanceReport};
pub use error::{CallCenterError, Result};
pub use hub::{AgentConnectionHub, DashboardBroadcastHub};
pub use identity::{Identity, IdentityProvider, Role};
pub use ingestion::EventIngestion;
pub use protocol::{InboundMessage, OutboundMessage};
pub use queue::{Call, CallQueueManager, CallStatus, QueueSnapshot};
pub use routing::RoutingLoop;
pub use storage::{CallRecordStore, MemoryCallStore, SqliteCallStore};

/// Commonly used types
pub mod prelude {
    pub use crate::agent::{AgentProfile, AgentRecord, AgentState, ConnectionStatus, KpiBundle};
    pub use crate::config::CallCenterConfig;
    pub use crate::engine::CallCenterEngine;
    pub use crate::error::{CallCenterError, Result};
    pub use crate::identity::{Identity, Role};
    pub use crate::queue::{Call, CallStatus, QueueSnapshot};
}
