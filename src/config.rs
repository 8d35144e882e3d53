//! Remote Relay configuration management

use crate::commands::CommandStore;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration shared by the relay and the agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay server configuration
    pub server: ServerConfig,

    /// Agent configuration
    pub agent: AgentConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Shared secret the agent presents in its `token` query parameter.
    /// Also the bearer token for the debug and caller endpoints.
    pub auth_token: String,

    /// Only admit agents from loopback, CGNAT (100.64.0.0/10) or fdaa::/16
    pub require_private_network: bool,

    /// Seconds added to `2 * timeout` when a caller waits for a result
    pub wait_grace_secs: u64,

    /// Require the bearer token on the tool-call and MCP endpoints
    pub caller_auth: bool,

    /// Characters of output shown per command in the debug listing
    pub debug_output_preview: usize,

    /// Allowed CORS origins (empty = any)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth_token: String::new(),
            require_private_network: true,
            wait_grace_secs: 5,
            caller_auth: true,
            debug_output_preview: 500,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Check the settings the relay cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.auth_token.trim().is_empty() {
            return Err(Error::Config(
                "server.auth_token is not set (use --token or AUTH_TOKEN)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wait_grace(&self) -> Duration {
        Duration::from_secs(self.wait_grace_secs)
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Relay WebSocket endpoint, e.g. `wss://relay.example.com/ws/agent`
    pub relay_url: String,

    /// Shared secret sent as the `token` query parameter
    pub auth_token: String,

    /// Fixed delay between reconnection attempts, in seconds
    pub reconnect_delay_secs: u64,

    /// Interval between keepalive pings, in seconds
    pub keepalive_interval_secs: u64,

    /// Byte ceiling applied to each captured stream and file read
    pub max_output_bytes: usize,

    /// Shell used for `shell` commands (None = `$SHELL` or `/bin/sh`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Allow-listed roots (empty = home, /tmp, /var/tmp)
    pub allowed_roots: Vec<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay_url: String::new(),
            auth_token: String::new(),
            reconnect_delay_secs: 5,
            keepalive_interval_secs: 25,
            max_output_bytes: 1_000_000,
            shell: None,
            allowed_roots: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Check the settings the agent cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.relay_url.trim().is_empty() {
            return Err(Error::Config(
                "agent.relay_url is not set (use --relay-url or RELAY_URL)".to_string(),
            ));
        }
        if self.auth_token.trim().is_empty() {
            return Err(Error::Config(
                "agent.auth_token is not set (use --token or AUTH_TOKEN)".to_string(),
            ));
        }
        url::Url::parse(&self.relay_url)
            .map_err(|e| Error::Config(format!("invalid relay_url '{}': {}", self.relay_url, e)))?;
        Ok(())
    }

    /// Shell binary for `shell` commands
    pub fn shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for the command store
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: CommandStore::default_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.server.port, 8080);
        assert!(config.server.require_private_network);
        assert!(config.server.caller_auth);
        assert_eq!(config.agent.reconnect_delay_secs, 5);
        assert_eq!(config.agent.keepalive_interval_secs, 25);
        assert_eq!(config.agent.max_output_bytes, 1_000_000);
        assert!(config.storage.base_dir.ends_with("remote-relay"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            auth_token = "secret"

            [agent]
            relay_url = "ws://127.0.0.1:9000/ws/agent"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.wait_grace_secs, 5);
        assert_eq!(config.agent.reconnect_delay_secs, 5);
        assert!(config.server.validate().is_ok());
    }

    #[test]
    fn test_server_requires_token() {
        let config = ServerConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("auth_token"));
    }

    #[test]
    fn test_agent_validation() {
        let mut config = AgentConfig::default();
        assert!(config.validate().is_err());

        config.relay_url = "wss://relay.example.com/ws/agent".to_string();
        assert!(config.validate().is_err());

        config.auth_token = "secret".to_string();
        assert!(config.validate().is_ok());

        config.relay_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_shell_wins() {
        let config = AgentConfig {
            shell: Some("/bin/bash".to_string()),
            ..Default::default()
        };
        assert_eq!(config.shell(), "/bin/bash");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[storage]\nbase_dir = \"/var/lib/relay\"\n").unwrap();
        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.storage.base_dir, PathBuf::from("/var/lib/relay"));

        std::fs::write(&path, "[server\n").unwrap();
        assert!(RelayConfig::load(&path).is_err());
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let toml = toml::to_string_pretty(&RelayConfig::default()).unwrap();
        assert!(toml.contains("[server]"));
        assert!(toml.contains("[agent]"));
        assert!(toml.contains("[storage]"));
    }
}
