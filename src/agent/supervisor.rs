//! Agent connection supervisor
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!      ▲               │              │
//!      └── delay ◄─────┴──────────────┘  (failure or close)
//! ```
//!
//! While connected, execute frames run one at a time and each gets exactly one
//! result frame. Keepalive pings keep flowing during execution.

use super::dispatcher::Executor;
use super::transport::{Connector, Transport};
use crate::error::Error;
use crate::protocol::{ExecutionResult, Frame, ResultFrame};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Default delay between reconnection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default keepalive ping interval
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(25);

/// Connection state, observable through [`Supervisor::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// How long to wait before reconnection attempt `attempt` (1-based)
pub trait DelayPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same delay before every attempt
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl DelayPolicy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Why a connected session ended
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Closed,
    Failed(Error),
}

/// Keeps the agent connected to the relay and executes what it sends
pub struct Supervisor {
    connector: Arc<dyn Connector>,
    executor: Arc<dyn Executor>,
    delay: Box<dyn DelayPolicy>,
    keepalive: Duration,
    state: watch::Sender<ConnectionState>,
}

impl Supervisor {
    pub fn new(connector: Arc<dyn Connector>, executor: Arc<dyn Executor>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            executor,
            delay: Box::new(FixedDelay(DEFAULT_RECONNECT_DELAY)),
            keepalive: DEFAULT_KEEPALIVE,
            state,
        }
    }

    pub fn with_delay(mut self, policy: impl DelayPolicy + 'static) -> Self {
        self.delay = Box::new(policy);
        self
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = interval.max(Duration::from_millis(1));
        self
    }

    /// Watch connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "Connection state changed");
        }
    }

    /// Connect, serve and reconnect until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut shutdown = Box::pin(shutdown);
        let endpoint = self.connector.endpoint();
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            tracing::info!(relay = %endpoint, "Connecting to relay");

            let connected = tokio::select! {
                _ = &mut shutdown => break,
                connected = self.connector.connect() => connected,
            };

            match connected {
                Ok(mut transport) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(relay = %endpoint, "Connected to relay");

                    match self.serve(transport.as_mut(), &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Closed => tracing::warn!("Connection closed by relay"),
                        SessionEnd::Failed(e) => tracing::warn!("Connection lost: {}", e),
                    }
                }
                Err(e) => tracing::warn!(relay = %endpoint, "Connection failed: {}", e),
            }

            self.set_state(ConnectionState::Disconnected);
            attempt = attempt.saturating_add(1);
            let delay = self.delay.delay(attempt);
            tracing::info!(attempt, "Reconnecting in {:?}", delay);

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Agent stopped");
    }

    async fn serve<S>(&self, transport: &mut dyn Transport, shutdown: &mut S) -> SessionEnd
    where
        S: Future<Output = ()> + Unpin,
    {
        let mut keepalive = tokio::time::interval_at(Instant::now() + self.keepalive, self.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut *shutdown => return SessionEnd::Shutdown,
                _ = keepalive.tick() => {
                    if let Err(e) = transport.send(&Frame::Ping).await {
                        return SessionEnd::Failed(e);
                    }
                }
                message = transport.recv() => match message {
                    None => return SessionEnd::Closed,
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    Some(Ok(text)) => {
                        if let Some(end) = self.handle_text(transport, &text, &mut keepalive, shutdown).await {
                            return end;
                        }
                    }
                },
            }
        }
    }

    async fn handle_text<S>(
        &self,
        transport: &mut dyn Transport,
        text: &str,
        keepalive: &mut Interval,
        shutdown: &mut S,
    ) -> Option<SessionEnd>
    where
        S: Future<Output = ()> + Unpin,
    {
        let reply = match Frame::parse(text) {
            Ok(Frame::Execute(exec)) => {
                let id = exec.id.clone();
                tracing::info!(command_id = %id, kind = %exec.command_type, "Received command");

                let execution = self.executor.execute(exec);
                tokio::pin!(execution);
                let outcome = loop {
                    tokio::select! {
                        outcome = &mut execution => break outcome,
                        _ = keepalive.tick() => {
                            if let Err(e) = transport.send(&Frame::Ping).await {
                                return Some(SessionEnd::Failed(e));
                            }
                        }
                        _ = &mut *shutdown => return Some(SessionEnd::Shutdown),
                    }
                };

                tracing::info!(command_id = %id, status = %outcome.status, "Command finished");
                Frame::Result(ResultFrame::new(id, outcome))
            }
            Ok(Frame::Ping) => Frame::Pong,
            Ok(Frame::Pong) => return None,
            Ok(Frame::Result(result)) => {
                tracing::warn!(command_id = %result.id, "Ignoring result frame sent by relay");
                return None;
            }
            Err(e) => match unknown_command(text) {
                Some(reply) => reply,
                None => {
                    tracing::warn!("Ignoring unrecognized frame: {}", e);
                    return None;
                }
            },
        };

        transport.send(&reply).await.err().map(SessionEnd::Failed)
    }
}

/// Answer an execute frame whose `command_type` this agent does not know
fn unknown_command(text: &str) -> Option<Frame> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "execute" {
        return None;
    }
    let id = value.get("id")?.as_str()?;
    let kind = match value.get("command_type") {
        Some(serde_json::Value::String(kind)) => kind.clone(),
        Some(other) => other.to_string(),
        None => "None".to_string(),
    };

    tracing::warn!(command_id = %id, kind = %kind, "Unknown command type");
    Some(Frame::Result(ResultFrame::new(
        id,
        ExecutionResult::failed(format!("Unknown command type: {}", kind)),
    )))
}
