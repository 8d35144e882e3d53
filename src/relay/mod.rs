//! Relay side: agent admission, the single agent session, and the
//! caller-facing bridge and tools.

pub mod admission;
mod bridge;
mod connection;
mod handler;
pub mod mcp;
mod server;
mod tools;

pub use admission::{AdmissionGate, Rejection, CLOSE_FORBIDDEN};
pub use bridge::{
    format_result, RelayBridge, NOT_CONNECTED_MESSAGE, NO_OUTPUT_MESSAGE, SEND_FAILED_MESSAGE,
    WAIT_EXHAUSTED_MESSAGE,
};
pub use connection::{ConnectionManager, SessionInfo};
pub use handler::agent_router;
pub use server::{RelayServer, RelayServerBuilder};
pub use tools::{call_tool, tool_definitions, ToolDefinition, AGENT_MISSING_MESSAGE, AGENT_READY_MESSAGE};
