//! Caller tool catalog
//!
//! One tool per command kind plus `check_agent_status`. Shared by the MCP
//! endpoint and the plain JSON tool API.

use super::bridge::RelayBridge;
use crate::protocol::{CommandKind, CommandPayload, DEFAULT_TIMEOUT_SECS};
use serde::Serialize;
use serde_json::{json, Value};

pub const AGENT_READY_MESSAGE: &str = "✓ Agent is connected and ready to receive commands";
pub const AGENT_MISSING_MESSAGE: &str = "✗ Agent is NOT connected - make sure it's running";

/// Tool definition as advertised to callers
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// All tools the relay exposes
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let path_arg = |what: &str| {
        json!({
            "type": "string",
            "description": format!("Path to the {}. Use ~ for home directory.", what)
        })
    };

    vec![
        ToolDefinition {
            name: "run_shell_command",
            description: "Execute a shell command on the connected machine. Use this to run any terminal command.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    },
                    "working_dir": {
                        "type": "string",
                        "description": "Optional working directory (defaults to home). Use ~ for home directory."
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Command timeout in seconds (default 60)",
                        "default": DEFAULT_TIMEOUT_SECS
                    }
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: "read_file",
            description: "Read the contents of a file on the connected machine.",
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_arg("file") },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "write_file",
            description: "Write content to a file on the connected machine. Creates parent directories if needed.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": path_arg("file"),
                    "content": {
                        "type": "string",
                        "description": "Content to write to the file"
                    }
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: "list_directory",
            description: "List contents of a directory on the connected machine.",
            input_schema: json!({
                "type": "object",
                "properties": { "path": path_arg("directory") },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "check_agent_status",
            description: "Check if the agent is connected and ready to receive commands.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

/// A validated tool invocation
#[derive(Debug, Clone, PartialEq)]
enum ToolCall {
    Run {
        kind: CommandKind,
        payload: CommandPayload,
        timeout: u64,
    },
    AgentStatus,
}

fn required_str(arguments: &Value, name: &str) -> Result<String, String> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("Error: missing required argument '{}'", name))
}

fn parse_call(name: &str, arguments: &Value) -> Result<ToolCall, String> {
    let call = match name {
        "run_shell_command" => {
            let command = required_str(arguments, "command")?;
            let working_dir = arguments
                .get("working_dir")
                .and_then(Value::as_str)
                .filter(|dir| !dir.is_empty())
                .map(str::to_string);
            let timeout = arguments
                .get("timeout")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_TIMEOUT_SECS);
            ToolCall::Run {
                kind: CommandKind::Shell,
                payload: CommandPayload::shell(command, working_dir),
                timeout,
            }
        }
        "read_file" => ToolCall::Run {
            kind: CommandKind::ReadFile,
            payload: CommandPayload::path(required_str(arguments, "path")?),
            timeout: DEFAULT_TIMEOUT_SECS,
        },
        "write_file" => {
            let path = required_str(arguments, "path")?;
            let content = required_str(arguments, "content")?;
            ToolCall::Run {
                kind: CommandKind::WriteFile,
                payload: CommandPayload::write(path, content),
                timeout: DEFAULT_TIMEOUT_SECS,
            }
        }
        "list_directory" => ToolCall::Run {
            kind: CommandKind::ListDir,
            payload: CommandPayload::path(required_str(arguments, "path")?),
            timeout: DEFAULT_TIMEOUT_SECS,
        },
        "check_agent_status" => ToolCall::AgentStatus,
        other => return Err(format!("Unknown tool: {}", other)),
    };
    Ok(call)
}

/// Execute a tool by name; every outcome is caller text
pub async fn call_tool(bridge: &RelayBridge, name: &str, arguments: &Value) -> String {
    tracing::info!(tool = %name, "Dispatching tool call");

    match parse_call(name, arguments) {
        Ok(ToolCall::Run {
            kind,
            payload,
            timeout,
        }) => bridge.invoke(kind, payload, timeout).await,
        Ok(ToolCall::AgentStatus) => {
            if bridge.connections().is_connected().await {
                AGENT_READY_MESSAGE.to_string()
            } else {
                AGENT_MISSING_MESSAGE.to_string()
            }
        }
        Err(message) => {
            tracing::warn!(tool = %name, "Rejected tool call: {}", message);
            message
        }
    }
}
