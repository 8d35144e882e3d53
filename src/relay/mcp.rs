//! MCP JSON-RPC 2.0 handling for the `/mcp` endpoint

use super::bridge::RelayBridge;
use super::tools::{call_tool, tool_definitions};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Handle one JSON-RPC message. Notifications get no response.
pub async fn handle_message(bridge: &RelayBridge, body: &str) -> Option<JsonRpcResponse> {
    let request: JsonRpcRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Malformed MCP message: {}", e);
            return Some(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            ));
        }
    };

    let Some(id) = request.id.clone().filter(|id| !id.is_null()) else {
        tracing::debug!(method = %request.method, "MCP notification");
        return None;
    };

    if request.jsonrpc != "2.0" {
        return Some(JsonRpcResponse::error(
            id,
            INVALID_REQUEST,
            format!("Unsupported jsonrpc version '{}'", request.jsonrpc),
        ));
    }

    let response = match request.method.as_str() {
        "initialize" => {
            tracing::info!("MCP session initialized");
            JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            )
        }
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tool_definitions() })),
        "tools/call" => {
            let Some(name) = request.params.get("name").and_then(Value::as_str) else {
                return Some(JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    "Missing 'name' parameter",
                ));
            };
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let text = call_tool(bridge, name, &arguments).await;
            JsonRpcResponse::success(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": false
                }),
            )
        }
        other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
    };

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandStore;
    use crate::relay::admission::AdmissionGate;
    use crate::relay::connection::ConnectionManager;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn make_bridge() -> (RelayBridge, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CommandStore::open(dir.path()).await.unwrap());
        let connections = Arc::new(ConnectionManager::new(
            store.clone(),
            AdmissionGate::new(true, "secret"),
        ));
        (
            RelayBridge::new(store, connections, Duration::from_secs(1)),
            dir,
        )
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let (bridge, _dir) = make_bridge().await;

        let init = handle_message(&bridge, r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let init = serde_json::to_value(init).unwrap();
        assert_eq!(init["id"], 1);
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(init.get("error").is_none());

        let list = handle_message(&bridge, r#"{"jsonrpc":"2.0","id":"a","method":"tools/list"}"#)
            .await
            .unwrap();
        let tools = list.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 5);
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let (bridge, _dir) = make_bridge().await;
        assert!(handle_message(&bridge, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_tools_call_without_agent() {
        let (bridge, _dir) = make_bridge().await;
        let response = handle_message(
            &bridge,
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"run_shell_command","arguments":{"command":"ls"}}}"#,
        )
        .await
        .unwrap();
        let result = response.result.unwrap();
        assert_eq!(
            result["content"][0]["text"],
            crate::relay::bridge::NOT_CONNECTED_MESSAGE
        );

        let response = handle_message(
            &bridge,
            r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{"name":"check_agent_status"}}"#,
        )
        .await
        .unwrap();
        assert_eq!(
            response.result.unwrap()["content"][0]["text"],
            crate::relay::tools::AGENT_MISSING_MESSAGE
        );
    }

    #[tokio::test]
    async fn test_errors() {
        let (bridge, _dir) = make_bridge().await;

        let parse = handle_message(&bridge, "{not json").await.unwrap();
        assert_eq!(parse.error.unwrap().code, PARSE_ERROR);

        let unknown = handle_message(&bridge, r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(unknown.error.unwrap().code, METHOD_NOT_FOUND);

        let no_name = handle_message(&bridge, r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{}}"#)
            .await
            .unwrap();
        assert_eq!(no_name.error.unwrap().code, INVALID_PARAMS);

        let version = handle_message(&bridge, r#"{"jsonrpc":"1.0","id":4,"method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(version.error.unwrap().code, INVALID_REQUEST);
    }
}
