//! clich daemon - realtime relay hub
//!
//! Accepts peer connections, registers each peer after its identity
//! handshake and relays every frame a peer sends to all connected peers.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (127.0.0.1:7878)
//! clichd
//!
//! # Run with a config file and a different listen address
//! clichd --config /etc/clich.toml --listen 0.0.0.0:7878
//!
//! # Also serve WebSocket clients on ws://0.0.0.0:8080/ws
//! clichd --ws-listen 0.0.0.0:8080
//!
//! # Print the effective configuration and exit
//! clichd check-config
//!
//! # Enable debug logging
//! RUST_LOG=clichd=debug clichd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clichd::auth::StaticTokenVerifier;
use clichd::config::{DaemonConfig, CONFIG_ENV, LISTEN_ENV};
use clichd::hub::BroadcastHub;
use clichd::server::{HubServer, WsServer};

/// clich daemon - realtime relay hub
#[derive(Parser, Debug)]
#[command(name = "clichd", version, about)]
struct Args {
    /// Path to the TOML config file (default: $CLICH_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file and $CLICH_LISTEN)
    #[arg(short, long, global = true)]
    listen: Option<String>,

    /// Also accept WebSocket upgrades on this address
    #[arg(long, global = true)]
    ws_listen: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon in the foreground
    Run,
    /// Validate the configuration and print it
    CheckConfig,
}

/// Resolves the config from file, environment and flags (in rising priority).
fn load_config(args: &Args) -> Result<DaemonConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| env::var(CONFIG_ENV).ok().map(PathBuf::from));

    let config = match path {
        Some(path) => DaemonConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DaemonConfig::default(),
    };

    let mut config = config
        .with_listen_override(env::var(LISTEN_ENV).ok())
        .with_listen_override(args.listen.clone());
    if let Some(addr) = args.ws_listen.clone() {
        config.websocket.listen = Some(addr);
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config),
        Command::CheckConfig => {
            let rendered = render_config(&config).context("Failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

/// Renders the config for `check-config`, with credentials redacted.
fn render_config(config: &DaemonConfig) -> Result<String> {
    let mut shown = config.clone();
    for entry in &mut shown.auth.tokens {
        entry.token = "[REDACTED]".to_string();
    }
    Ok(toml::to_string_pretty(&shown)?)
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("clichd=info".parse()?)
                .add_directive("clich_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "clich daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let mut hub = BroadcastHub::new(config.hub.clone());
    match StaticTokenVerifier::from_config(&config.auth) {
        Some(verifier) => {
            info!(tokens = verifier.len(), "Admission requires a verified credential");
            hub = hub.with_verifier(Arc::new(verifier));
        }
        None => info!("No credentials configured, trusting client identities"),
    }

    info!(
        echo = config.hub.echo,
        max_connections = config.hub.max_connections,
        max_concurrent_writes = config.hub.max_concurrent_writes,
        "Broadcast hub ready"
    );

    let hub = Arc::new(hub);
    let server = HubServer::bind(&config.listen, Arc::clone(&hub), cancel_token.clone())
        .await
        .context("Failed to start server")?;

    let ws_server = match &config.websocket.listen {
        Some(addr) => Some(
            WsServer::bind(addr, &config.websocket.path, Arc::clone(&hub), cancel_token.clone())
                .await
                .context("Failed to start WebSocket listener")?,
        ),
        None => None,
    };

    // Each listener drains its own sessions before returning
    let result = match ws_server {
        Some(ws_server) => tokio::try_join!(server.run(), ws_server.run()).map(|_| ()),
        None => server.run().await,
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        cancel_token.cancel();
        return Err(e.into());
    }

    info!("clich daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
