//! # livehub
//!
//! Broadcast hub binary: loads settings, starts the WebSocket server, and
//! runs until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use livehub_core::constants::VERSION;
use livehub_core::logging::{LogFormat, init_subscriber};
use livehub_server::{LiveHubServer, ServerConfig, StaticTokenAuthenticator};
use livehub_settings::{HubSettings, load_settings_from_path, settings_path};

/// Real-time analytics broadcast hub.
#[derive(Parser, Debug)]
#[command(name = "livehub", version, about = "Real-time analytics broadcast hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.livehub/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// `compact` or `json` (overrides settings).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Command-line flags win over file and environment.
    fn apply(&self, settings: &mut HubSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = livehub_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let auth = StaticTokenAuthenticator::from_settings(&settings.auth);
    if auth.is_empty() {
        tracing::warn!(
            allow_anonymous = settings.auth.allow_anonymous,
            "no auth tokens configured"
        );
    }

    let server = Arc::new(
        LiveHubServer::new(ServerConfig::from(&settings), Arc::new(auth)).with_metrics(metrics),
    );
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        version = VERSION,
        settings = %path.display(),
        "livehub listening on ws://{addr}{}",
        server.config().ws_path
    );

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    server.shutdown().shutdown();
    handle
        .await
        .context("Server task panicked")?
        .context("Server failed")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}
