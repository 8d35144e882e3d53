//! Remote Relay - command relay between tool callers and a remote agent

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remote_relay::{
    agent::supervisor_from_config,
    api::HealthResponse,
    commands::CommandSummary,
    config::RelayConfig,
    relay::RelayServerBuilder,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "remote-relay")]
#[command(version)]
#[command(about = "Relay shell and file commands to a remote agent")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "REMOTE_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Relay {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// Shared secret for the agent and bearer-protected routes
        #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Base directory for the command store
        #[arg(long, env = "STORAGE_DIR")]
        storage_dir: Option<PathBuf>,

        /// Only admit agents from loopback or private overlay networks
        #[arg(long, env = "REQUIRE_PRIVATE_NETWORK")]
        require_private_network: Option<bool>,

        /// Admit agents from any address
        #[arg(long, conflicts_with = "require_private_network")]
        allow_public: bool,
    },

    /// Run the agent and keep it connected to the relay
    Agent {
        /// Relay WebSocket URL, e.g. wss://relay.example.com/ws/agent
        #[arg(long, env = "RELAY_URL")]
        relay_url: Option<String>,

        /// Shared secret presented to the relay
        #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Shell used for shell commands
        #[arg(long)]
        shell: Option<String>,

        /// Allow-listed root (repeatable; default: home, /tmp, /var/tmp)
        #[arg(long = "allowed-root")]
        allowed_roots: Vec<PathBuf>,
    },

    /// Show the health of a running relay
    Status {
        /// Relay base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },

    /// List recent commands on a running relay
    History {
        /// Relay base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Bearer token
        #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
        token: String,

        /// Number of commands to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("remote_relay={},tower_http=info", log_level).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(cli.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!cli.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    // Load configuration
    let config = match &cli.config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RelayConfig::default(),
    };

    match cli.command {
        Commands::Relay {
            host,
            port,
            token,
            storage_dir,
            require_private_network,
            allow_public,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(token) = token {
                config.server.auth_token = token;
            }
            if let Some(dir) = storage_dir {
                config.storage.base_dir = dir;
            }
            if let Some(required) = require_private_network {
                config.server.require_private_network = required;
            }
            if allow_public {
                config.server.require_private_network = false;
            }
            run_relay(config).await?;
        }
        Commands::Agent {
            relay_url,
            token,
            shell,
            allowed_roots,
        } => {
            let mut config = config;
            if let Some(url) = relay_url {
                config.agent.relay_url = url;
            }
            if let Some(token) = token {
                config.agent.auth_token = token;
            }
            if shell.is_some() {
                config.agent.shell = shell;
            }
            if !allowed_roots.is_empty() {
                config.agent.allowed_roots = allowed_roots;
            }
            run_agent(config).await?;
        }
        Commands::Status { url } => {
            show_status(&url).await?;
        }
        Commands::History { url, token, limit } => {
            show_history(&url, &token, limit).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}

async fn run_relay(config: RelayConfig) -> Result<()> {
    tracing::info!("Starting Remote Relay");

    let relay = RelayServerBuilder::new()
        .config(config.server)
        .storage_dir(config.storage.base_dir)
        .build()
        .await?;

    let listener = relay.bind().await?;
    tracing::info!("Remote Relay is running. Press Ctrl+C to stop.");
    relay.serve(listener, shutdown_signal()).await?;

    Ok(())
}

async fn run_agent(config: RelayConfig) -> Result<()> {
    tracing::info!("Starting agent");

    let supervisor = supervisor_from_config(&config.agent)?;
    supervisor.run(shutdown_signal()).await;

    Ok(())
}

async fn show_status(url: &str) -> Result<()> {
    let endpoint = format!("{}/health", url.trim_end_matches('/'));
    let health: HealthResponse = reqwest::get(&endpoint)
        .await
        .with_context(|| format!("requesting {}", endpoint))?
        .error_for_status()?
        .json()
        .await?;

    println!("Relay:   {} ({})", health.status, url);
    println!("Version: {}", health.version);
    match health.agent {
        Some(agent) => println!(
            "Agent:   ✓ connected from {} since {} ({})",
            agent.peer, agent.connected_at, agent.session_id
        ),
        None if health.agent_connected => println!("Agent:   ✓ connected"),
        None => println!("Agent:   ✗ not connected"),
    }
    Ok(())
}

async fn show_history(url: &str, token: &str, limit: usize) -> Result<()> {
    let endpoint = format!("{}/commands", url.trim_end_matches('/'));
    let commands: Vec<CommandSummary> = reqwest::Client::new()
        .get(&endpoint)
        .query(&[("limit", limit)])
        .bearer_auth(token)
        .send()
        .await
        .with_context(|| format!("requesting {}", endpoint))?
        .error_for_status()?
        .json()
        .await?;

    if commands.is_empty() {
        println!("No commands yet.");
        return Ok(());
    }

    for command in commands {
        let target = command
            .command
            .as_deref()
            .or(command.path.as_deref())
            .unwrap_or("");
        let exit = command
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {:<10} {:<9} exit={:<3} {}",
            command.created_at.format("%Y-%m-%d %H:%M:%S"),
            command.id,
            command.kind,
            command.status,
            exit,
            target
        );
    }
    Ok(())
}

fn show_config(config: Option<&RelayConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
