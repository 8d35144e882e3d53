//! Remote Relay - command relay between tool callers and a remote agent
//!
//! A relay process brokers shell and filesystem commands from callers (MCP
//! clients or plain HTTP) to a single agent that holds an outbound WebSocket
//! connection. Every command is persisted before it is sent, so nothing is lost
//! while the agent is away.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────── Relay ─────────────────────────────────┐
//! │                                                                         │
//! │  /mcp, /api/v1/tools ──► RelayBridge ──► CommandStore (JSON on disk)    │
//! │                              │  ▲              │                        │
//! │                              │  └─ completion ─┘                        │
//! │                              ▼                                          │
//! │                      ConnectionManager ◄── /ws/agent (AdmissionGate)    │
//! └──────────────────────────────┼──────────────────────────────────────────┘
//!                                │ execute / result / ping / pong
//! ┌──────────────────────────────▼──────────────── Agent ──────────────────┐
//! │  Supervisor (reconnect, keepalive) ──► Dispatcher ──► PathSandbox       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Wire frames and command kinds
//! - [`commands`]: Command records and the durable store
//! - [`relay`]: Admission, agent session, bridge, tools and server
//! - [`agent`]: Supervisor, dispatcher and path sandbox
//! - [`api`]: HTTP router
//! - [`config`]: Configuration management

pub mod agent;
pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;

pub use config::RelayConfig;
pub use error::{Error, Result};
