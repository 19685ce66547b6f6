//! # Connection Hubs
//!
//! Two registries of live connections built on the same bounded-sink registry:
//!
//! - [`AgentConnectionHub`] addresses connections by agent id and routes inbound
//!   agent frames to event ingestion.
//! - [`DashboardBroadcastHub`] fans widgets out to every viewer.
//!
//! Neither hub touches a socket. The server wraps each socket in a
//! [`ChannelSink`] and runs one writer task per connection with [`pump`].

pub mod agent;
pub mod dashboard;
pub mod sink;

pub use agent::{AgentConnectionHub, ConnectionMode};
pub use dashboard::{BroadcastReport, DashboardBroadcastHub};
pub use sink::{
    pump, ChannelSink, ConnectionId, FanOutReport, OutboundSink, SendOutcome, SinkReceiver,
    SinkRegistry, WriterExit,
};
