//! # HTTP and WebSocket surface
//!
//! ```text
//! GET    /health
//! GET    /ws/agent/:agent_id        per-agent socket
//! GET    /ws/agents                 multiplexed simulator socket
//! GET    /ws/dashboard              viewer socket
//! GET    /api/queues[/:name]
//! GET    /api/agents
//! GET    /api/history/...
//! POST   /api/admin/...             admin role only
//! DELETE /api/admin/history
//! ```
//!
//! Handlers are thin: they resolve the caller, call one engine operation and map
//! the result onto a status code through [`ApiError`].

pub mod api;
pub mod ws;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::engine::CallCenterEngine;
use crate::error::CallCenterError;
use crate::identity::{HeaderIdentityProvider, Identity, IdentityError, IdentityProvider};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CallCenterEngine>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    pub fn new(engine: Arc<CallCenterEngine>) -> Self {
        Self::with_identity(engine, Arc::new(HeaderIdentityProvider))
    }

    pub fn with_identity(engine: Arc<CallCenterEngine>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { engine, identity }
    }
}

/// Errors returned to HTTP callers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Storage(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CallCenterError> for ApiError {
    fn from(err: CallCenterError) -> Self {
        let message = err.to_string();
        match err {
            CallCenterError::QueueNotFound(_)
            | CallCenterError::CallNotFound(_)
            | CallCenterError::AgentNotFound(_) => Self::NotFound(message),
            CallCenterError::DuplicateCall(_) => Self::Conflict(message),
            CallCenterError::Validation(_) => Self::Validation(message),
            CallCenterError::Storage(_) => Self::Storage(message),
            CallCenterError::Configuration(_) | CallCenterError::Internal(_) => Self::Internal(message),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Storage(msg) | Self::Internal(msg) => error!(status = status.as_u16(), error = %msg, "Request failed"),
            Self::Unauthorized(msg) | Self::Forbidden(msg) => warn!(status = status.as_u16(), error = %msg, "Request refused"),
            _ => {}
        }
        let body = serde_json::json!({
            "status": "error",
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Any identified caller
pub struct Caller(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Caller(state.identity.resolve(&parts.headers)?))
    }
}

/// A caller holding the admin role
pub struct AdminCaller(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AdminCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = state.identity.resolve(&parts.headers)?;
        if !identity.is_admin() {
            return Err(ApiError::Forbidden(format!(
                "{} ({}) may not use admin actions",
                identity.user_id, identity.role
            )));
        }
        Ok(AdminCaller(identity))
    }
}

/// Build the full router
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/queues", get(api::list_queues))
        .route("/queues/:name", get(api::get_queue))
        .route("/agents", get(api::list_agents))
        .route("/history/agents/:agent_id/calls", get(api::agent_calls))
        .route("/history/calls", get(api::calls_on))
        .route("/history/stats", get(api::daily_stats))
        .route("/admin/calls", post(api::enqueue_call))
        .route("/admin/calls/wipe", post(api::wipe_calls))
        .route("/admin/calls/:call_id/force-end", post(api::force_end_call))
        .route("/admin/agents/:agent_id/logout", post(api::force_logout))
        .route("/admin/reset", post(api::reset_state))
        .route("/admin/scale", post(api::scale_agents))
        .route("/admin/history", delete(api::truncate_history));

    let ws_routes = Router::new()
        .route("/agent/:agent_id", get(ws::agent_socket))
        .route("/agents", get(ws::shared_agent_socket))
        .route("/dashboard", get(ws::dashboard_socket));

    Router::new()
        .route("/health", get(api::health))
        .nest("/api", api_routes)
        .nest("/ws", ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `signal` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(signal)
        .await
}
