//! Single-agent connection manager
//!
//! Owns the one live agent session. Pushes hold the session read lock for the
//! whole send, replacement and backlog flush hold the write lock, so a push
//! never straddles a reconnect and a command is never both flushed and pushed.

use super::admission::{AdmissionGate, Rejection};
use crate::commands::CommandStore;
use crate::error::Error;
use crate::protocol::{CommandStatus, Frame};
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, RwLock};

/// Longest a backlog flush waits on a stalled writer before giving up.
/// The flush holds the session write lock, so this bounds how long callers
/// and `/health` can be blocked by an agent that stops reading.
const FLUSH_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest raw frame excerpt logged for an unrecognized frame, in chars
const RAW_PREVIEW_CHARS: usize = 200;

/// Transient handle to the live agent connection
struct AgentSession {
    info: SessionInfo,
    /// Frames queued for the socket writer task
    outbound: mpsc::Sender<Frame>,
}

/// Public view of the active session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub peer: String,
    pub connected_at: DateTime<Utc>,
}

/// Admission control and message routing for the single agent session
pub struct ConnectionManager {
    store: Arc<CommandStore>,
    gate: AdmissionGate,
    session: RwLock<Option<AgentSession>>,
    next_session: AtomicU64,
}

impl ConnectionManager {
    pub fn new(store: Arc<CommandStore>, gate: AdmissionGate) -> Self {
        Self {
            store,
            gate,
            session: RwLock::new(None),
            next_session: AtomicU64::new(1),
        }
    }

    /// Admission gate (also used for the bearer-protected HTTP routes)
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Whether an agent session is active
    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Details of the active session, if any
    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.session.read().await.as_ref().map(|s| s.info.clone())
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Apply the network-origin and token gates to a connection attempt
    pub fn accept(&self, client_ip: &str, token: Option<&str>) -> Result<(), Rejection> {
        self.gate.check(client_ip, token).map_err(|rejection| {
            tracing::warn!(
                peer = %client_ip,
                reason = rejection.close_reason(),
                "Rejected agent connection: {}",
                Error::from(rejection.clone())
            );
            rejection
        })
    }

    /// Install an admitted connection as the active session and flush the
    /// pending backlog to it, oldest first.
    ///
    /// `outbound` must already be drained by a running writer task. A previous
    /// session is replaced without being closed.
    pub async fn attach(&self, peer: &str, outbound: mpsc::Sender<Frame>) -> String {
        let session_id = format!(
            "agent-{}",
            self.next_session.fetch_add(1, Ordering::Relaxed)
        );

        let mut slot = self.session.write().await;
        if let Some(previous) = slot.take() {
            tracing::warn!(
                previous = %previous.info.session_id,
                session_id = %session_id,
                "New agent connection replaces the active session"
            );
        }

        *slot = Some(AgentSession {
            info: SessionInfo {
                session_id: session_id.clone(),
                peer: peer.to_string(),
                connected_at: Utc::now(),
            },
            outbound: outbound.clone(),
        });
        tracing::info!(session_id = %session_id, peer = %peer, "Agent connected");

        let backlog = self.store.list_pending_oldest_first().await;
        if !backlog.is_empty() {
            tracing::info!(count = backlog.len(), "Redelivering pending commands");
        }
        for record in backlog {
            match outbound
                .send_timeout(Frame::Execute(record.to_execute_frame()), FLUSH_SEND_TIMEOUT)
                .await
            {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(
                        session_id = %session_id,
                        "Agent is not draining, remaining backlog stays pending"
                    );
                    break;
                }
                Err(SendTimeoutError::Closed(_)) => {
                    tracing::warn!(session_id = %session_id, "Agent went away during backlog flush");
                    break;
                }
            }
            if let Err(e) = self.store.mark_running(&record.id).await {
                tracing::warn!(command_id = %record.id, "Failed to mark command running: {}", e);
            }
        }

        session_id
    }

    /// Clear the session reference if it still points at `session_id`.
    /// Returns whether it was cleared.
    pub async fn detach(&self, session_id: &str) -> bool {
        let mut slot = self.session.write().await;
        match slot.as_ref() {
            Some(current) if current.info.session_id == session_id => {
                *slot = None;
                tracing::info!(session_id = %session_id, "Agent disconnected");
                true
            }
            _ => {
                tracing::debug!(session_id = %session_id, "Superseded agent session closed");
                false
            }
        }
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Deliver a stored command to the agent.
    ///
    /// Returns `false` without side effects when no session is active, and
    /// `false` when the send fails. A command that is no longer pending was
    /// already delivered by a backlog flush and counts as delivered.
    pub async fn push(&self, id: &str) -> bool {
        let slot = self.session.read().await;
        let Some(session) = slot.as_ref() else {
            return false;
        };
        let Some(record) = self.store.get(id).await else {
            tracing::warn!(command_id = %id, "Push for unknown command");
            return false;
        };
        if record.status != CommandStatus::Pending {
            return true;
        }

        if session
            .outbound
            .send(Frame::Execute(record.to_execute_frame()))
            .await
            .is_err()
        {
            tracing::warn!(
                command_id = %id,
                session_id = %session.info.session_id,
                "Error sending command to agent"
            );
            return false;
        }

        if let Err(e) = self.store.mark_running(id).await {
            tracing::warn!(command_id = %id, "Failed to mark command running: {}", e);
        }
        tracing::debug!(command_id = %id, kind = %record.kind, "Command pushed to agent");
        true
    }

    /// Handle one inbound text frame; returns the reply to send, if any
    pub async fn handle_inbound(&self, session_id: &str, text: &str) -> Option<Frame> {
        match Frame::parse(text) {
            Ok(Frame::Result(result)) => {
                match self
                    .store
                    .complete(
                        &result.id,
                        result.status,
                        result.output,
                        result.error,
                        result.exit_code,
                    )
                    .await
                {
                    Ok(true) => {
                        tracing::info!(
                            command_id = %result.id,
                            status = %result.status,
                            "Command completed"
                        );
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(command_id = %result.id, "Failed to record result: {}", e);
                    }
                }
                None
            }
            Ok(Frame::Ping) => Some(Frame::Pong),
            Ok(Frame::Pong) => None,
            Ok(Frame::Execute(exec)) => {
                tracing::warn!(
                    session_id = %session_id,
                    command_id = %exec.id,
                    "Ignoring execute frame sent by agent"
                );
                None
            }
            Err(e) => {
                let preview = text
                    .char_indices()
                    .nth(RAW_PREVIEW_CHARS)
                    .map_or(text, |(end, _)| &text[..end]);
                tracing::warn!(
                    session_id = %session_id,
                    "Ignoring unrecognized frame: {} (raw: {})",
                    e,
                    preview
                );
                None
            }
        }
    }

    /// Read frames until the socket closes or errors, then detach.
    pub async fn receive_loop<S>(&self, session_id: &str, mut inbound: S, outbound: mpsc::Sender<Frame>)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        while let Some(message) = inbound.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if let Some(reply) = self.handle_inbound(session_id, &text).await {
                        if outbound.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "Agent WebSocket error: {}", e);
                    break;
                }
            }
        }

        self.detach(session_id).await;
    }
}
