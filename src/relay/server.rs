//! Relay server wiring

use super::admission::AdmissionGate;
use super::bridge::RelayBridge;
use super::connection::ConnectionManager;
use crate::api::{build_app, AppState};
use crate::commands::CommandStore;
use crate::config::{ServerConfig, StorageConfig};
use crate::error::Result;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// The relay process: command store, agent session and HTTP surface
pub struct RelayServer {
    config: ServerConfig,
    store: Arc<CommandStore>,
    connections: Arc<ConnectionManager>,
    bridge: Arc<RelayBridge>,
}

impl RelayServer {
    /// Open the command store and wire the components together
    pub async fn new(config: ServerConfig, storage: StorageConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(CommandStore::open(&storage.base_dir).await?);
        let gate = AdmissionGate::new(config.require_private_network, config.auth_token.clone());
        let connections = Arc::new(ConnectionManager::new(store.clone(), gate));
        let bridge = Arc::new(RelayBridge::new(
            store.clone(),
            connections.clone(),
            config.wait_grace(),
        ));

        tracing::info!(
            storage = %storage.base_dir.display(),
            commands = store.len().await,
            pending = store.list_pending_oldest_first().await.len(),
            "Command store opened"
        );
        if !config.require_private_network {
            tracing::warn!("Private network check disabled; agents may connect from any address");
        }

        Ok(Self {
            config,
            store,
            connections,
            bridge,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CommandStore> {
        &self.store
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn bridge(&self) -> &Arc<RelayBridge> {
        &self.bridge
    }

    /// The complete HTTP application
    pub fn router(&self) -> Router {
        let state = AppState {
            bridge: self.bridge.clone(),
            caller_auth: self.config.caller_auth,
            output_preview: self.config.debug_output_preview,
        };
        build_app(state, &self.config.cors_origins)
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        Ok(TcpListener::bind(&addr).await?)
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        tracing::info!("Relay listening on http://{}", local);
        tracing::info!("Agent endpoint: ws://{}/ws/agent", local);

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        tracing::info!("Relay stopped");
        Ok(())
    }
}

/// Builder for RelayServer
pub struct RelayServerBuilder {
    server: ServerConfig,
    storage: StorageConfig,
}

impl RelayServerBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
        }
    }

    /// Set the server configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.server = config;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.server.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.server.auth_token = token.into();
        self
    }

    pub fn require_private_network(mut self, required: bool) -> Self {
        self.server.require_private_network = required;
        self
    }

    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.base_dir = dir.into();
        self
    }

    /// Build the relay
    pub async fn build(self) -> Result<RelayServer> {
        RelayServer::new(self.server, self.storage).await
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_requires_token() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = RelayServerBuilder::new()
            .storage_dir(dir.path())
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_builder_applies_settings() {
        let dir = tempfile::TempDir::new().unwrap();
        let relay = RelayServerBuilder::new()
            .host("127.0.0.1")
            .port(0)
            .auth_token("secret")
            .require_private_network(false)
            .storage_dir(dir.path())
            .build()
            .await
            .unwrap();

        assert_eq!(relay.config().host, "127.0.0.1");
        assert!(!relay.config().require_private_network);
        assert!(!relay.connections().is_connected().await);
        assert!(dir.path().join("commands").is_dir());

        let listener = relay.bind().await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
