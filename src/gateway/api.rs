//! Control-plane HTTP routes. Everything except `GET /api/health` sits behind
//! the [`AuthGate`] middleware.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use super::GatewayCoordinator;
use super::error::ApiError;
use crate::config::ToolServerConfig;
use crate::observability::ObserverEvent;
use crate::security::{AuthGate, HEALTH_PATH};
use crate::session::SessionKey;

#[derive(Clone)]
struct ApiState {
    coordinator: Arc<GatewayCoordinator>,
    auth: Arc<AuthGate>,
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

/// Build the control-plane router.
pub fn router(coordinator: Arc<GatewayCoordinator>, auth: AuthGate) -> Router {
    let state = ApiState {
        coordinator,
        auth: Arc::new(auth),
    };

    Router::new()
        .route(HEALTH_PATH, get(handle_health))
        .route("/api/status", get(handle_status))
        .route("/api/sessions", get(handle_sessions))
        .route("/api/sessions/{key}/reset", post(handle_session_reset))
        .route("/api/sessions/{key}/stop", post(handle_session_stop))
        .route("/api/workspace/validate", get(handle_workspace_validate))
        .route("/api/tools", get(handle_tools))
        .route("/api/tools/{name}", post(handle_tool_execute))
        .route(
            "/api/tool-servers",
            get(handle_tool_servers).put(handle_tool_servers_replace),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

async fn require_auth(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    if AuthGate::is_exempt(req.method(), req.uri().path()) {
        return next.run(req).await;
    }
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match state.auth.check(header) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            tracing::debug!(path = req.uri().path(), "rejected control-plane request: {e:?}");
            ApiError::from(e).into_response()
        }
    }
}

fn parse_key(raw: &str) -> Result<SessionKey, ApiError> {
    SessionKey::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("Invalid session key: {raw}")))
}

// ── Handlers ─────────────────────────────────────────────────────

async fn handle_health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(state.coordinator.health().snapshot_json())
}

async fn handle_status(State(state): State<ApiState>) -> ApiResult {
    let gw = &state.coordinator;
    Ok(Json(json!({
        "agent_id": gw.agent_id(),
        "queue": gw.queue().snapshot(),
        "sessions": gw.sessions().len(),
        "tool_servers": gw.tool_servers().len(),
        "tools": gw.tools().names(),
        "workspace": gw.sandbox().root(),
    })))
}

async fn handle_sessions(State(state): State<ApiState>) -> ApiResult {
    let queue = state.coordinator.queue();
    let sessions: Vec<serde_json::Value> = state
        .coordinator
        .sessions()
        .list()
        .into_iter()
        .map(|summary| {
            let status = queue.status(&summary.key);
            json!({
                "key": summary.key,
                "message_count": summary.message_count,
                "transcript_len": summary.transcript_len,
                "created_at": summary.created_at,
                "last_activity": summary.last_activity,
                "queue": status,
            })
        })
        .collect();
    Ok(Json(json!({ "sessions": sessions })))
}

async fn handle_session_reset(
    State(state): State<ApiState>,
    Path(raw_key): Path<String>,
) -> ApiResult {
    let key = parse_key(&raw_key)?;
    let existed = state.coordinator.reset_session(&key).await;
    tracing::info!(session_key = %key, "session reset via control plane");
    Ok(Json(json!({ "key": key, "reset": existed })))
}

async fn handle_session_stop(
    State(state): State<ApiState>,
    Path(raw_key): Path<String>,
) -> ApiResult {
    let key = parse_key(&raw_key)?;
    let stopped = state.coordinator.queue().abort(&key);
    Ok(Json(json!({ "key": key, "stopped": stopped })))
}

#[derive(Debug, Deserialize)]
struct ValidateQuery {
    path: String,
}

async fn handle_workspace_validate(
    State(state): State<ApiState>,
    Query(query): Query<ValidateQuery>,
) -> ApiResult {
    let validation = state.coordinator.sandbox().validate(&query.path);
    Ok(Json(json!({
        "path": query.path,
        "validation": validation,
    })))
}

async fn handle_tools(State(state): State<ApiState>) -> ApiResult {
    Ok(Json(json!({ "tools": state.coordinator.tools().specs() })))
}

async fn handle_tool_execute(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(args): Json<serde_json::Value>,
) -> ApiResult {
    let tool = state
        .coordinator
        .tools()
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown tool: {name}")))?;

    state.coordinator.observer().record_event(&ObserverEvent::ToolInvoked {
        session_key: "control-plane".into(),
        tool: name.clone(),
    });

    let result = tool
        .execute(args)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(json!({ "tool": name, "result": result })))
}

async fn handle_tool_servers(State(state): State<ApiState>) -> ApiResult {
    Ok(Json(json!({ "tool_servers": state.coordinator.tool_servers() })))
}

async fn handle_tool_servers_replace(
    State(state): State<ApiState>,
    Json(servers): Json<Vec<ToolServerConfig>>,
) -> ApiResult {
    let mut seen = HashSet::new();
    for server in &servers {
        if server.name.trim().is_empty() || server.command.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "Tool servers need a non-empty name and command".into(),
            ));
        }
        if !seen.insert(server.name.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "Duplicate tool server name: {}",
                server.name
            )));
        }
    }
    tracing::info!(count = servers.len(), "auxiliary tool servers replaced");
    state.coordinator.set_tool_servers(servers);
    Ok(Json(json!({ "tool_servers": state.coordinator.tool_servers() })))
}
