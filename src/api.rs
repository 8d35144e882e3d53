//! HTTP router for the relay
//!
//! ## Endpoint Map
//!
//! | Path                  | Auth            | Description                        |
//! |-----------------------|-----------------|------------------------------------|
//! | `/health`             | none            | Liveness and agent presence        |
//! | `/commands`           | bearer          | Recent commands (debugging)        |
//! | `/api/v1/tools`       | bearer*         | Tool catalog                       |
//! | `/api/v1/tools/call`  | bearer*         | Run a tool, plain JSON             |
//! | `/mcp`                | bearer*         | MCP JSON-RPC 2.0                   |
//! | `/ws/agent`           | `token` query   | Agent WebSocket                    |
//!
//! `*` only when `server.caller_auth` is on.

use crate::relay::{agent_router, call_tool, mcp, tool_definitions, RelayBridge, SessionInfo};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Default number of rows returned by `/commands`
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<RelayBridge>,
    /// Require the bearer token on caller routes
    pub caller_auth: bool,
    /// Characters of output shown per row in `/commands`
    pub output_preview: usize,
}

/// Build the complete relay HTTP application
pub fn build_app(state: AppState, cors_origins: &[String]) -> Router {
    let cors = build_cors(cors_origins);
    let connections = state.bridge.connections().clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/commands", get(list_commands))
        .route("/api/v1/tools", get(list_tools))
        .route("/api/v1/tools/call", post(invoke_tool))
        .route("/mcp", post(mcp_endpoint))
        .with_state(state)
        .merge(agent_router(connections))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

// =============================================================================
// Auth
// =============================================================================

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "Unauthorized"})),
    )
        .into_response()
}

fn bearer_ok(state: &AppState, headers: &HeaderMap) -> bool {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    state.bridge.connections().gate().check_bearer(header)
}

fn caller_ok(state: &AppState, headers: &HeaderMap) -> bool {
    !state.caller_auth || bearer_ok(state, headers)
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub agent_connected: bool,
    pub timestamp: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<SessionInfo>,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let agent = state.bridge.connections().session_info().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        agent_connected: agent.is_some(),
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        agent,
    })
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn list_commands(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Response {
    if !bearer_ok(&state, &headers) {
        return unauthorized();
    }

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let summaries: Vec<_> = state
        .bridge
        .store()
        .list_recent(limit)
        .await
        .iter()
        .map(|record| record.summary(state.output_preview))
        .collect();
    Json(summaries).into_response()
}

async fn list_tools(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !caller_ok(&state, &headers) {
        return unauthorized();
    }
    Json(serde_json::json!({ "tools": tool_definitions() })).into_response()
}

#[derive(Debug, Deserialize)]
struct ToolCallRequest {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub text: String,
}

async fn invoke_tool(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ToolCallRequest>,
) -> Response {
    if !caller_ok(&state, &headers) {
        return unauthorized();
    }
    let text = call_tool(&state.bridge, &request.name, &request.arguments).await;
    Json(ToolCallResponse { text }).into_response()
}

async fn mcp_endpoint(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    if !caller_ok(&state, &headers) {
        return unauthorized();
    }
    match mcp::handle_message(&state.bridge, &body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

// =============================================================================
// CORS
// =============================================================================

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandStore;
    use crate::protocol::{CommandKind, CommandPayload, CommandStatus};
    use crate::relay::{AdmissionGate, ConnectionManager};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn make_app(caller_auth: bool) -> (Router, Arc<RelayBridge>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CommandStore::open(dir.path()).await.unwrap());
        let connections = Arc::new(ConnectionManager::new(
            store.clone(),
            AdmissionGate::new(true, "secret"),
        ));
        let bridge = Arc::new(RelayBridge::new(store, connections, Duration::from_secs(1)));
        let state = AppState {
            bridge: bridge.clone(),
            caller_auth,
            output_preview: 5,
        };
        (build_app(state, &[]), bridge, dir)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _bridge, _dir) = make_app(true).await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["agent_connected"], false);
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_commands_requires_bearer() {
        let (app, _bridge, _dir) = make_app(false).await;
        let response = app
            .clone()
            .oneshot(Request::get("/commands").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/commands")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_commands_lists_recent_with_preview() {
        let (app, bridge, _dir) = make_app(true).await;
        let store = bridge.store();
        for i in 0..3 {
            let id = store
                .create(CommandKind::Shell, CommandPayload::shell(format!("cmd{}", i), None), 60)
                .await
                .unwrap();
            store.mark_running(&id).await.unwrap();
            store
                .complete(&id, CommandStatus::Completed, Some("0123456789".into()), None, Some(0))
                .await
                .unwrap();
        }

        let response = app
            .oneshot(
                Request::get("/commands?limit=2")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["command"], "cmd2");
        assert_eq!(rows[0]["type"], "shell");
        assert_eq!(rows[0]["output"], "01234");
    }

    #[tokio::test]
    async fn test_caller_auth() {
        let (app, _bridge, _dir) = make_app(true).await;
        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/api/v1/tools")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["tools"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_tool_call_without_agent() {
        let (app, bridge, _dir) = make_app(false).await;
        let response = app
            .oneshot(
                Request::post("/api/v1/tools/call")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"name":"run_shell_command","arguments":{"command":"ls"}}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["text"], crate::relay::NOT_CONNECTED_MESSAGE);
        assert!(bridge.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_mcp_notification_accepted() {
        let (app, _bridge, _dir) = make_app(false).await;
        let response = app
            .clone()
            .oneshot(
                Request::post("/mcp")
                    .body(Body::from(
                        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(
                Request::post("/mcp")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["id"], 1);
        assert!(json["result"].is_object());
    }

    #[test]
    fn test_build_cors_with_origins() {
        let _cors = build_cors(&["http://localhost:1420".to_string()]);
        let _cors = build_cors(&[]);
    }
}
