//! Agent side: keeps one connection to the relay and executes commands locally
//!
//! ## Architecture
//!
//! ```text
//! Relay ──WS──► transport ──► supervisor ──► dispatcher ──► shell / filesystem
//!                                 │               └ sandbox (allow-listed roots)
//!                                 └ keepalive, reconnect
//! ```

pub mod dispatcher;
pub mod sandbox;
pub mod supervisor;
pub mod transport;

pub use dispatcher::{Dispatcher, Executor};
pub use sandbox::PathSandbox;
pub use supervisor::{ConnectionState, DelayPolicy, FixedDelay, Supervisor};
pub use transport::{Connector, Transport, WsConnector};

use crate::config::AgentConfig;
use crate::error::Result;
use std::sync::Arc;

/// Build a supervisor wired to the real relay and the local dispatcher
pub fn supervisor_from_config(config: &AgentConfig) -> Result<Supervisor> {
    config.validate()?;

    let connector = WsConnector::new(&config.relay_url, &config.auth_token)?;
    let dispatcher = Dispatcher::from_config(config);
    tracing::info!(
        shell = %config.shell(),
        roots = ?dispatcher.sandbox().roots(),
        "Agent sandbox ready"
    );

    Ok(Supervisor::new(Arc::new(connector), Arc::new(dispatcher))
        .with_delay(FixedDelay(config.reconnect_delay()))
        .with_keepalive(config.keepalive_interval()))
}
