//! Error types for the call center engine

use thiserror::Error;

use crate::storage::StoreError;

/// Result type for call center operations
pub type Result<T> = std::result::Result<T, CallCenterError>;

/// Errors surfaced by the engine's public operations
///
/// Nothing on the continuous ingestion/routing/aggregation path returns these to a
/// caller that could abort the process; they exist for the admin surface and for
/// startup, where the HTTP layer maps them onto status codes.
#[derive(Debug, Error)]
pub enum CallCenterError {
    /// The named virtual queue is not configured
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// No waiting or active call carries this id
    #[error("Call not found: {0}")]
    CallNotFound(String),

    /// No agent record carries this id
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// A caller-supplied call id collides with a live or recently finished call
    #[error("Duplicate call id: {0}")]
    DuplicateCall(String),

    /// Bad input from an admin caller
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The storage collaborator failed or is unreachable
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Internal invariant breach
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallCenterError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True for the not-found family
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::QueueNotFound(_) | Self::CallNotFound(_) | Self::AgentNotFound(_)
        )
    }
}
