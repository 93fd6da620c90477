//! # warden-agent
//!
//! Moderation server binary: loads settings, wires stores, model clients and
//! the turn service, and serves HTTP until Ctrl-C.

#![deny(unsafe_code)]

mod wiring;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use warden_server::{ServerConfig, WardenServer};
use warden_settings::WardenSettings;

/// Warden moderation server.
#[derive(Parser, Debug, Default)]
#[command(name = "warden-agent", about = "Policy-gated agent turn server")]
struct Cli {
    /// Settings file (default `~/.warden/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// `SQLite` database path.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Directory holding policy documents.
    #[arg(long)]
    policies_dir: Option<PathBuf>,

    /// Log level filter (`RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Overlay command-line values on loaded settings.
    fn apply(&self, settings: &mut WardenSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.storage.db_path = path.display().to_string();
        }
        if let Some(dir) = &self.policies_dir {
            settings.policies.dir = dir.display().to_string();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.config.clone().unwrap_or_else(warden_settings::settings_path);
    let mut settings = warden_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    warden_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    info!(path = %settings_path.display(), "settings loaded");

    let service = wiring::build_service(&settings).context("Failed to build turn service")?;
    let server = Arc::new(WardenServer::new(
        ServerConfig::from(&settings.server),
        Arc::new(service),
    ));

    let addr = server.config().bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let serve_task = {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!(error = %e, "server exited with error");
            }
        })
    };

    server.shutdown().wait_for_signal().await;
    let drained = server
        .shutdown()
        .graceful_shutdown(vec![serve_task], server.config().shutdown_timeout())
        .await;
    info!(drained, "shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "warden-agent",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--json-logs",
        ]);
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.port, Some(9000));
        assert!(cli.json_logs);
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli {
            port: Some(0),
            db_path: Some(PathBuf::from("/tmp/w.db")),
            policies_dir: Some(PathBuf::from("/etc/warden/policies")),
            log_level: Some("debug".into()),
            ..Cli::default()
        };
        let mut settings = WardenSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.storage.db_path, "/tmp/w.db");
        assert_eq!(settings.policies.dir, "/etc/warden/policies");
        assert_eq!(settings.logging.level, "debug");
        assert!(!settings.logging.json);
    }
}
