//! Command record types

use crate::protocol::{CommandKind, CommandPayload, CommandStatus, ExecuteFrame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Opaque unique token
    pub id: String,
    /// Creation sequence number, breaks `created_at` ties
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub status: CommandStatus,
    #[serde(default)]
    pub payload: CommandPayload,
    pub timeout_seconds: u64,
    /// Present only once the record is terminal
    #[serde(default)]
    pub result: Option<CommandResult>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Output of a terminal command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

impl CommandRecord {
    /// Build the execute frame that delivers this record to the agent
    pub fn to_execute_frame(&self) -> ExecuteFrame {
        ExecuteFrame::new(
            self.id.clone(),
            self.kind,
            self.payload.clone(),
            self.timeout_seconds,
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Debug listing view with output cut to `preview_chars` characters
    pub fn summary(&self, preview_chars: usize) -> CommandSummary {
        let result = self.result.clone().unwrap_or_default();
        CommandSummary {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            command: self.payload.command.clone(),
            path: self.payload.path.clone(),
            output: result
                .output
                .map(|o| o.chars().take(preview_chars).collect()),
            error: result.error,
            exit_code: result.exit_code,
            created_at: self.created_at,
        }
    }
}

/// Row of the debug command listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub status: CommandStatus,
    pub command: Option<String>,
    pub path: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CommandRecord {
        CommandRecord {
            id: "cmd-1".to_string(),
            seq: 1,
            kind: CommandKind::Shell,
            status: CommandStatus::Completed,
            payload: CommandPayload::shell("seq 1000", None),
            timeout_seconds: 60,
            result: Some(CommandResult {
                output: Some("x".repeat(2000)),
                error: None,
                exit_code: Some(0),
            }),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_summary_truncates_output() {
        let summary = record().summary(500);
        assert_eq!(summary.output.unwrap().len(), 500);
        assert_eq!(summary.command.as_deref(), Some("seq 1000"));
        assert_eq!(summary.exit_code, Some(0));
    }

    #[test]
    fn test_to_execute_frame() {
        let frame = record().to_execute_frame();
        assert_eq!(frame.id, "cmd-1");
        assert_eq!(frame.command_type, CommandKind::Shell);
        assert_eq!(frame.command.as_deref(), Some("seq 1000"));
        assert_eq!(frame.timeout, 60);
    }

    #[test]
    fn test_record_serializes_kind_as_type() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["type"], "shell");
        assert_eq!(json["status"], "completed");
    }
}
