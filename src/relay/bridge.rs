//! Caller-facing bridge: create, forward, wait, format

use super::connection::ConnectionManager;
use crate::commands::{CommandRecord, CommandStore};
use crate::error::{Error, Result};
use crate::protocol::{CommandKind, CommandPayload};
use std::sync::Arc;
use std::time::Duration;

pub const NOT_CONNECTED_MESSAGE: &str =
    "Error: Agent is not connected. Please ensure the agent is running.";
pub const SEND_FAILED_MESSAGE: &str = "Error: Failed to send command to agent";
pub const WAIT_EXHAUSTED_MESSAGE: &str = "Command timed out waiting for response";
pub const NO_OUTPUT_MESSAGE: &str = "(no output)";

/// Turns a caller request into a stored command and a formatted answer
pub struct RelayBridge {
    store: Arc<CommandStore>,
    connections: Arc<ConnectionManager>,
    grace: Duration,
}

impl RelayBridge {
    pub fn new(
        store: Arc<CommandStore>,
        connections: Arc<ConnectionManager>,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            connections,
            grace,
        }
    }

    pub fn store(&self) -> &Arc<CommandStore> {
        &self.store
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Wait budget for a command with the given timeout
    pub fn wait_budget(&self, timeout_secs: u64) -> Duration {
        Duration::from_secs(timeout_secs.saturating_mul(2)).saturating_add(self.grace)
    }

    /// Create a command and hand it to the agent. Returns the command id.
    ///
    /// Nothing is stored when no agent is connected. A command whose push
    /// fails stays `pending` for the next session.
    pub async fn submit(
        &self,
        kind: CommandKind,
        payload: CommandPayload,
        timeout_secs: u64,
    ) -> Result<String> {
        if !self.connections.is_connected().await {
            return Err(Error::AgentNotConnected);
        }

        let id = self.store.create(kind, payload, timeout_secs).await?;
        if !self.connections.push(&id).await {
            tracing::warn!(command_id = %id, "Command left pending, agent unreachable");
            return Err(Error::TransportClosed(format!("command {} not delivered", id)));
        }
        Ok(id)
    }

    /// Run one command on the agent and return its formatted result.
    ///
    /// Giving up on the wait does not cancel the command; a late result is
    /// still recorded by the store.
    pub async fn invoke(&self, kind: CommandKind, payload: CommandPayload, timeout_secs: u64) -> String {
        let id = match self.submit(kind, payload, timeout_secs).await {
            Ok(id) => id,
            Err(Error::AgentNotConnected) => return NOT_CONNECTED_MESSAGE.to_string(),
            Err(Error::TransportClosed(_)) => return SEND_FAILED_MESSAGE.to_string(),
            Err(e) => {
                tracing::error!(kind = %kind, "Failed to create command: {}", e);
                return format!("Error: {}", e);
            }
        };

        match self
            .store
            .wait_for_terminal(&id, self.wait_budget(timeout_secs))
            .await
        {
            Some(record) if record.is_terminal() => format_result(&record),
            _ => {
                tracing::warn!(command_id = %id, kind = %kind, "Gave up waiting for command result");
                WAIT_EXHAUSTED_MESSAGE.to_string()
            }
        }
    }
}

/// Render a terminal record as caller text
pub fn format_result(record: &CommandRecord) -> String {
    let mut text = String::new();
    if let Some(result) = &record.result {
        if let Some(output) = &result.output {
            text.push_str(output);
        }
        if let Some(error) = result.error.as_deref().filter(|e| !e.is_empty()) {
            text.push_str("\n[stderr]: ");
            text.push_str(error);
        }
        if let Some(code) = result.exit_code {
            text.push_str(&format!("\n[exit_code: {}]", code));
        }
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        NO_OUTPUT_MESSAGE.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandResult;
    use crate::protocol::{CommandStatus, Frame};
    use crate::relay::admission::AdmissionGate;
    use chrono::Utc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    async fn make_bridge() -> (RelayBridge, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CommandStore::open(dir.path()).await.unwrap());
        let connections = Arc::new(ConnectionManager::new(
            store.clone(),
            AdmissionGate::new(false, "secret"),
        ));
        (
            RelayBridge::new(store, connections, Duration::from_secs(5)),
            dir,
        )
    }

    fn record_with(result: Option<CommandResult>) -> CommandRecord {
        CommandRecord {
            id: "abc".to_string(),
            seq: 1,
            kind: CommandKind::Shell,
            status: CommandStatus::Completed,
            payload: CommandPayload::shell("true", None),
            timeout_seconds: 60,
            result,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_format_full_result() {
        let record = record_with(Some(CommandResult {
            output: Some("hello\n".to_string()),
            error: Some("warning".to_string()),
            exit_code: Some(3),
        }));
        assert_eq!(
            format_result(&record),
            "hello\n\n[stderr]: warning\n[exit_code: 3]"
        );
    }

    #[test]
    fn test_format_skips_empty_stderr() {
        let record = record_with(Some(CommandResult {
            output: Some("  hi  ".to_string()),
            error: Some(String::new()),
            exit_code: None,
        }));
        assert_eq!(format_result(&record), "hi");
    }

    #[test]
    fn test_format_placeholder() {
        assert_eq!(format_result(&record_with(None)), NO_OUTPUT_MESSAGE);
        let blank = record_with(Some(CommandResult {
            output: Some("\n \n".to_string()),
            ..Default::default()
        }));
        assert_eq!(format_result(&blank), NO_OUTPUT_MESSAGE);
    }

    #[tokio::test]
    async fn test_not_connected_creates_nothing() {
        let (bridge, _dir) = make_bridge().await;
        let text = bridge
            .invoke(CommandKind::Shell, CommandPayload::shell("ls", None), 10)
            .await;
        assert_eq!(text, NOT_CONNECTED_MESSAGE);
        assert!(bridge.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_send_failure_leaves_pending() {
        let (bridge, _dir) = make_bridge().await;
        let (tx, rx) = mpsc::channel(4);
        bridge.connections().attach("127.0.0.1", tx).await;
        drop(rx);

        let text = bridge
            .invoke(CommandKind::ReadFile, CommandPayload::path("/tmp/x"), 10)
            .await;
        assert_eq!(text, SEND_FAILED_MESSAGE);
        let pending = bridge.store().list_pending_oldest_first().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, CommandKind::ReadFile);
    }

    #[tokio::test]
    async fn test_invoke_returns_agent_result() {
        let (bridge, _dir) = make_bridge().await;
        let bridge = Arc::new(bridge);
        let (tx, mut rx) = mpsc::channel(4);
        let session = bridge.connections().attach("127.0.0.1", tx).await;

        let agent = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let Some(Frame::Execute(exec)) = rx.recv().await else {
                    panic!("expected execute frame");
                };
                let reply = format!(
                    r#"{{"type":"result","id":"{}","status":"completed","output":"hi\n","exit_code":0}}"#,
                    exec.id
                );
                bridge.connections().handle_inbound(&session, &reply).await;
            })
        };

        let text = bridge
            .invoke(CommandKind::Shell, CommandPayload::shell("echo hi", None), 10)
            .await;
        agent.await.unwrap();
        assert_eq!(text, "hi\n[exit_code: 0]");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_exhaustion_does_not_cancel() {
        let (bridge, _dir) = make_bridge().await;
        let (tx, mut rx) = mpsc::channel(4);
        bridge.connections().attach("127.0.0.1", tx).await;

        let started = tokio::time::Instant::now();
        let text = bridge
            .invoke(CommandKind::Shell, CommandPayload::shell("sleep 100", None), 1)
            .await;
        assert_eq!(text, WAIT_EXHAUSTED_MESSAGE);
        assert!(started.elapsed() >= Duration::from_secs(7));

        let Some(Frame::Execute(exec)) = rx.recv().await else {
            panic!("expected execute frame");
        };
        let record = bridge.store().get(&exec.id).await.unwrap();
        assert_eq!(record.status, CommandStatus::Running);
    }

    #[tokio::test]
    async fn test_wait_budget() {
        let (bridge, _dir) = make_bridge().await;
        assert_eq!(bridge.wait_budget(60), Duration::from_secs(125));
        assert_eq!(bridge.wait_budget(0), Duration::from_secs(5));
        assert_eq!(bridge.wait_budget(u64::MAX), Duration::MAX);
        assert_eq!(bridge.wait_budget(u64::MAX / 2 + 1), Duration::MAX);
    }

    #[tokio::test]
    async fn test_submit_reports_typed_errors() {
        let (bridge, _dir) = make_bridge().await;
        let err = bridge
            .submit(CommandKind::Shell, CommandPayload::shell("ls", None), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AgentNotConnected));

        let (tx, rx) = mpsc::channel(4);
        bridge.connections().attach("127.0.0.1", tx).await;
        drop(rx);
        let err = bridge
            .submit(CommandKind::Shell, CommandPayload::shell("ls", None), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportClosed(_)));

        let err = bridge
            .submit(CommandKind::ReadFile, CommandPayload::default(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn test_huge_timeout_still_waits_for_result() {
        let (bridge, _dir) = make_bridge().await;
        let bridge = Arc::new(bridge);
        let (tx, mut rx) = mpsc::channel(4);
        let session = bridge.connections().attach("127.0.0.1", tx).await;

        let agent = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let Some(Frame::Execute(exec)) = rx.recv().await else {
                    panic!("expected execute frame");
                };
                assert_eq!(exec.timeout, u64::MAX);
                let reply = format!(
                    r#"{{"type":"result","id":"{}","status":"completed","output":"ok","exit_code":0}}"#,
                    exec.id
                );
                bridge.connections().handle_inbound(&session, &reply).await;
            })
        };

        let text = bridge
            .invoke(CommandKind::Shell, CommandPayload::shell("ls", None), u64::MAX)
            .await;
        agent.await.unwrap();
        assert_eq!(text, "ok\n[exit_code: 0]");
    }
}
