//! Wire protocol shared by the relay and the agent
//!
//! Every WebSocket text message is one JSON object tagged by `type`:
//!
//! ```text
//! relay → agent   {"type":"execute","id":..,"command_type":..,"timeout":..}
//! agent → relay   {"type":"result","id":..,"status":..,"output":..}
//! either way      {"type":"ping"} / {"type":"pong"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Command kinds and lifecycle
// =============================================================================

/// The four operations an agent can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Shell,
    ReadFile,
    WriteFile,
    ListDir,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Shell => "shell",
            CommandKind::ReadFile => "read_file",
            CommandKind::WriteFile => "write_file",
            CommandKind::ListDir => "list_dir",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Command lifecycle status
///
/// `Pending → Running → {Completed | Failed | Timeout}`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl CommandStatus {
    /// Whether the status is one of the three final states
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Running => "running",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Kind-specific command fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl CommandPayload {
    pub fn shell(command: impl Into<String>, working_dir: Option<String>) -> Self {
        Self {
            command: Some(command.into()),
            working_dir,
            ..Default::default()
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Name of the first field `kind` requires that is absent, if any
    pub fn missing_field(&self, kind: CommandKind) -> Option<&'static str> {
        match kind {
            CommandKind::Shell if self.command.is_none() => Some("command"),
            CommandKind::ReadFile | CommandKind::ListDir if self.path.is_none() => Some("path"),
            CommandKind::WriteFile if self.path.is_none() => Some("path"),
            CommandKind::WriteFile if self.content.is_none() => Some("content"),
            _ => None,
        }
    }
}

// =============================================================================
// Frames
// =============================================================================

/// Top-level frame exchanged over the agent WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Execute(ExecuteFrame),
    Result(ResultFrame),
    Ping,
    Pong,
}

impl Frame {
    /// Parse a text message into a frame
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Serialize the frame into a text message
    pub fn to_text(&self) -> String {
        // Frame contains only strings, integers and enums; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Relay → agent: run one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteFrame {
    pub id: String,
    pub command_type: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl ExecuteFrame {
    pub fn new(
        id: impl Into<String>,
        kind: CommandKind,
        payload: CommandPayload,
        timeout: u64,
    ) -> Self {
        Self {
            id: id.into(),
            command_type: kind,
            command: payload.command,
            path: payload.path,
            content: payload.content,
            working_dir: payload.working_dir,
            timeout,
        }
    }
}

/// Default per-command timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Agent → relay: outcome of one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFrame {
    pub id: String,
    #[serde(default = "default_result_status")]
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

fn default_result_status() -> CommandStatus {
    CommandStatus::Completed
}

impl ResultFrame {
    pub fn new(id: impl Into<String>, outcome: ExecutionResult) -> Self {
        Self {
            id: id.into(),
            status: outcome.status,
            output: outcome.output,
            error: outcome.error,
            exit_code: outcome.exit_code,
        }
    }
}

/// Uniform outcome of every agent-side handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: CommandStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    /// Successful outcome with exit code 0
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Completed,
            output: Some(output.into()),
            error: None,
            exit_code: Some(0),
        }
    }

    /// Failed outcome with exit code 1
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            output: None,
            error: Some(error.into()),
            exit_code: Some(1),
        }
    }

    /// Shell timeout outcome with exit code -1
    pub fn timed_out(error: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Timeout,
            output: None,
            error: Some(error.into()),
            exit_code: Some(-1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_frame_wire_format() {
        let frame = Frame::Execute(ExecuteFrame::new(
            "abc",
            CommandKind::ListDir,
            CommandPayload::path("~/src"),
            30,
        ));
        let value: serde_json::Value = serde_json::from_str(&frame.to_text()).unwrap();
        assert_eq!(value["type"], "execute");
        assert_eq!(value["id"], "abc");
        assert_eq!(value["command_type"], "list_dir");
        assert_eq!(value["path"], "~/src");
        assert_eq!(value["timeout"], 30);
        assert!(value.get("command").is_none());
        assert!(value.get("content").is_none());
    }

    #[test]
    fn test_execute_frame_accepts_explicit_nulls() {
        let text = r#"{"type":"execute","id":"x","command_type":"shell","command":"ls","path":null,"content":null,"working_dir":null,"timeout":5}"#;
        match Frame::parse(text).unwrap() {
            Frame::Execute(exec) => {
                assert_eq!(exec.command_type, CommandKind::Shell);
                assert_eq!(exec.command.as_deref(), Some("ls"));
                assert!(exec.path.is_none());
                assert_eq!(exec.timeout, 5);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_execute_frame_default_timeout() {
        let text = r#"{"type":"execute","id":"x","command_type":"read_file","path":"/tmp/a"}"#;
        match Frame::parse(text).unwrap() {
            Frame::Execute(exec) => assert_eq!(exec.timeout, DEFAULT_TIMEOUT_SECS),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_result_frame_minimal() {
        let text = r#"{"type":"result","id":"x"}"#;
        match Frame::parse(text).unwrap() {
            Frame::Result(result) => {
                assert_eq!(result.status, CommandStatus::Completed);
                assert!(result.output.is_none());
                assert!(result.exit_code.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_keepalive_frames() {
        assert_eq!(Frame::Ping.to_text(), r#"{"type":"ping"}"#);
        assert_eq!(Frame::parse(r#"{"type":"pong"}"#).unwrap(), Frame::Pong);
    }

    #[test]
    fn test_unknown_frames_are_errors() {
        assert!(Frame::parse(r#"{"type":"hello"}"#).is_err());
        assert!(Frame::parse(r#"{"type":"execute","id":"x","command_type":"rm"}"#).is_err());
        assert!(Frame::parse("not json").is_err());
    }

    #[test]
    fn test_missing_field() {
        assert_eq!(
            CommandPayload::default().missing_field(CommandKind::Shell),
            Some("command")
        );
        assert_eq!(
            CommandPayload::path("/tmp").missing_field(CommandKind::WriteFile),
            Some("content")
        );
        assert_eq!(
            CommandPayload::write("/tmp/a", "").missing_field(CommandKind::WriteFile),
            None
        );
        assert_eq!(
            CommandPayload::path("/tmp").missing_field(CommandKind::ListDir),
            None
        );
    }

    #[test]
    fn test_status_terminal() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::Running.is_terminal());
        assert!(CommandStatus::Completed.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(CommandStatus::Timeout.is_terminal());
    }

    #[test]
    fn test_result_frame_from_outcome() {
        let frame = ResultFrame::new("id-1", ExecutionResult::timed_out("slow"));
        assert_eq!(frame.status, CommandStatus::Timeout);
        assert_eq!(frame.exit_code, Some(-1));
        assert_eq!(frame.error.as_deref(), Some("slow"));
    }
}
