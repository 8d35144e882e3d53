//! Remote Relay error types

use thiserror::Error;

/// Remote Relay error type
#[derive(Error, Debug)]
pub enum Error {
    /// Path (or working directory) falls outside every allow-listed root
    #[error("{role} not allowed: {path}")]
    PathNotAllowed { role: &'static str, path: String },

    /// Target path does not exist
    #[error("{0}")]
    NotFound(String),

    /// Target exists but is not a regular file
    #[error("Not a file: {0}")]
    NotAFile(String),

    /// Target exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Shell command exceeded its own timeout
    #[error("Command timed out after {0} seconds")]
    CommandTimedOut(u64),

    /// No agent session is active
    #[error("Agent is not connected")]
    AgentNotConnected,

    /// Admission rejected (bad token or non-private origin)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Duplex connection closed or failed
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// Unexpected failure while executing a command
    #[error("{0}")]
    InternalExecutionFault(String),

    /// Command rejected at creation (missing required field, bad status)
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Command store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket client error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Remote Relay operations
pub type Result<T> = std::result::Result<T, Error>;
