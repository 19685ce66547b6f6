//! WebSocket endpoints
//!
//! Each socket is split: a writer task drains the connection's [`ChannelSink`]
//! with [`pump`] while this task reads inbound frames. Whichever side finishes
//! first ends the other.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, trace};

use super::{ApiError, AppState};
use crate::engine::CallCenterEngine;
use crate::hub::{pump, ChannelSink, ConnectionMode};
use crate::identity::Identity;

pub async fn agent_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Response {
    if agent_id.trim().is_empty() {
        return ApiError::Validation("agent id must not be empty".into()).into_response();
    }
    let engine = state.engine;
    ws.on_upgrade(move |socket| run_agent_socket(socket, engine, ConnectionMode::Dedicated(agent_id)))
}

pub async fn shared_agent_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let engine = state.engine;
    ws.on_upgrade(move |socket| run_agent_socket(socket, engine, ConnectionMode::Shared))
}

/// Identity is resolved before the upgrade so a refused viewer gets a status code
pub async fn dashboard_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let identity = state.identity.resolve(&headers)?;
    let engine = state.engine;
    Ok(ws.on_upgrade(move |socket| run_dashboard_socket(socket, engine, identity)))
}

async fn run_agent_socket(socket: WebSocket, engine: Arc<CallCenterEngine>, mode: ConnectionMode) {
    let hubs = &engine.config().hubs;
    let (sink, receiver) = ChannelSink::channel(hubs.agent_buffer);
    let closed = receiver.closed_token();
    let (outbound, mut inbound) = socket.split();
    let writer = tokio::spawn(pump(receiver, outbound, hubs.write_timeout(), Message::Text));

    let hub = Arc::clone(engine.agent_hub());
    let connection = hub.attach(mode, sink);

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    // Failures are counted and logged by ingestion; the socket stays open
                    if let Err(err) = hub.handle_inbound(connection, &text, Utc::now()) {
                        trace!(connection = %connection, error = %err, "Inbound frame dropped");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(connection = %connection, error = %err, "Agent socket read failed");
                    break;
                }
            }
        }
    }

    let agents = hub.connection_closed(connection, Utc::now());
    debug!(connection = %connection, agents = agents.len(), "Agent socket finished");
    let _ = writer.await;
}

async fn run_dashboard_socket(socket: WebSocket, engine: Arc<CallCenterEngine>, identity: Identity) {
    let hubs = &engine.config().hubs;
    let (sink, receiver) = ChannelSink::channel(hubs.dashboard_buffer);
    let closed = receiver.closed_token();
    let (outbound, mut inbound) = socket.split();
    let writer = tokio::spawn(pump(receiver, outbound, hubs.write_timeout(), Message::Text));

    let dashboards = Arc::clone(engine.dashboards());
    let viewer = dashboards.register(identity, sink);

    // Viewers only listen; anything they send besides a close is ignored
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    }

    dashboards.unregister(viewer);
    let _ = writer.await;
    debug!(connection = %viewer, "Dashboard socket finished");
}
