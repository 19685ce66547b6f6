//! REST handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{AdminCaller, ApiError, AppState, Caller};
use crate::agent::AgentRecord;
use crate::engine::{HealthReport, ResetReport, ScaleReport};
use crate::queue::{Call, QueueSnapshot};
use crate::storage::{CallSummary, DailyStats};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub date: NaiveDate,
    #[serde(default)]
    pub agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub queue: String,
    #[serde(default)]
    pub call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub count: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.engine.health().await)
}

pub async fn list_queues(State(state): State<AppState>, _caller: Caller) -> Json<Vec<QueueSnapshot>> {
    Json(state.engine.queue_snapshots())
}

pub async fn get_queue(
    State(state): State<AppState>,
    _caller: Caller,
    Path(name): Path<String>,
) -> ApiResult<Json<QueueSnapshot>> {
    Ok(Json(state.engine.queue_snapshot(&name)?))
}

pub async fn list_agents(State(state): State<AppState>, Caller(identity): Caller) -> Json<Vec<AgentRecord>> {
    Json(state.engine.agents_for(&identity))
}

pub async fn agent_calls(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Vec<CallSummary>>> {
    Ok(Json(state.engine.agent_call_history(&agent_id, &identity).await?))
}

pub async fn calls_on(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Vec<CallSummary>>> {
    Ok(Json(state.engine.calls_on(query.date, &identity).await?))
}

pub async fn daily_stats(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<Vec<DailyStats>>> {
    let stats = state
        .engine
        .daily_stats(query.date, query.agent_id.as_deref(), &identity)
        .await?;
    Ok(Json(stats))
}

pub async fn enqueue_call(
    State(state): State<AppState>,
    AdminCaller(admin): AdminCaller,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<(StatusCode, Json<Call>)> {
    if let Some(call_id) = &request.call_id {
        if call_id.trim().is_empty() {
            return Err(ApiError::Validation("callId must not be blank".into()));
        }
    }
    let call = state.engine.enqueue_call(&request.queue, request.call_id)?;
    info!(user_id = %admin.user_id, call_id = %call.call_id, "Admin enqueued call");
    Ok((StatusCode::CREATED, Json(call)))
}

pub async fn force_end_call(
    State(state): State<AppState>,
    AdminCaller(admin): AdminCaller,
    Path(call_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let report = state.engine.force_end_call(&call_id)?;
    info!(user_id = %admin.user_id, call_id = %call_id, "Admin force-ended call");
    Ok(Json(json!({
        "callId": report.call.call_id,
        "agentId": report.agent_id,
        "found": true,
        "status": report.call.status,
    })))
}

pub async fn wipe_calls(State(state): State<AppState>, AdminCaller(admin): AdminCaller) -> Json<Value> {
    let report = state.engine.wipe_all_calls();
    info!(user_id = %admin.user_id, cleared = report.cleared, "Admin wiped all calls");
    Json(json!({
        "cleared": report.cleared,
        "releasedAgents": report.released.len(),
    }))
}

pub async fn force_logout(
    State(state): State<AppState>,
    AdminCaller(admin): AdminCaller,
    Path(agent_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.force_logout(&agent_id)?;
    info!(user_id = %admin.user_id, agent_id = %agent_id, "Admin forced logout");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_state(State(state): State<AppState>, AdminCaller(admin): AdminCaller) -> Json<ResetReport> {
    let report = state.engine.reset_state();
    info!(user_id = %admin.user_id, "Admin reset in-memory state");
    Json(report)
}

pub async fn scale_agents(
    State(state): State<AppState>,
    AdminCaller(admin): AdminCaller,
    Json(request): Json<ScaleRequest>,
) -> Json<ScaleReport> {
    info!(user_id = %admin.user_id, count = request.count, "Admin scaled agents");
    Json(state.engine.scale_agents(request.count))
}

pub async fn truncate_history(
    State(state): State<AppState>,
    AdminCaller(admin): AdminCaller,
) -> ApiResult<Json<Value>> {
    let removed = state.engine.truncate_history().await?;
    info!(user_id = %admin.user_id, removed, "Admin truncated history");
    Ok(Json(json!({ "removed": removed })))
}
