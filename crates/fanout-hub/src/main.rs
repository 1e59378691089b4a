//! # fanout-hub
//!
//! Fan-out hub server binary: loads settings, installs logging, serves the
//! WebSocket hub, and drains on Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fanout_server::config::ServerConfig;
use fanout_server::server::FanoutServer;
use fanout_settings::{FanoutSettings, LogLevel};
use tracing::{info, warn};

/// Real-time WebSocket fan-out hub.
#[derive(Parser, Debug)]
#[command(name = "fanout-hub", about = "Real-time WebSocket fan-out hub")]
struct Cli {
    /// Settings file (defaults to `~/.fanout/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error (overrides settings).
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,
}

fn parse_log_level(s: &str) -> std::result::Result<LogLevel, String> {
    LogLevel::parse(s).ok_or_else(|| format!("unknown log level `{s}`"))
}

impl Cli {
    /// Load layered settings, then apply command-line overrides.
    fn settings(&self) -> Result<FanoutSettings> {
        let mut settings = match &self.config {
            Some(path) => fanout_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => fanout_settings::load_settings().with_context(|| {
                format!(
                    "Failed to load settings from {}",
                    fanout_settings::settings_path().display()
                )
            })?,
        };

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;

    fanout_logging::init_subscriber(&settings.logging)
        .context("Failed to initialize logging")?;

    let server = FanoutServer::new(ServerConfig::from(&settings));
    let (addr, handle) = server
        .listen()
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;
    info!(%addr, "fan-out hub ready");

    shutdown_signal().await?;

    info!("Shutting down...");
    if server
        .shutdown()
        .drain(handle, settings.server.shutdown_timeout())
        .await
    {
        info!("server stopped");
    } else {
        warn!("server did not stop within the shutdown timeout");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("fanout-hub").chain(args.iter().copied()))
    }

    #[test]
    fn cli_defaults_to_no_overrides() {
        let cli = cli(&[]);
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn cli_custom_port_and_host() {
        let cli = cli(&["--port", "9000", "--host", "127.0.0.1"]);
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn cli_log_level_parsed() {
        let cli = cli(&["--log-level", "DEBUG"]);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn cli_rejects_unknown_log_level() {
        let result = Cli::try_parse_from(["fanout-hub", "--log-level", "loud"]);
        assert!(result.is_err());
    }

    #[test]
    fn overrides_apply_over_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":7000,"host":"10.0.0.1"}}"#).unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let settings = cli(&["--config", &path_str, "--port", "7001"])
            .settings()
            .unwrap();
        assert_eq!(settings.server.port, 7001);
        assert_eq!(settings.server.host, "10.0.0.1");
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"session":{"sendQueueCapacity":0}}"#).unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let err = cli(&["--config", &path_str]).settings().unwrap_err();
        assert!(format!("{err:#}").contains("sendQueueCapacity"));
    }

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let path_str = path.to_string_lossy().into_owned();

        let settings = cli(&["--config", &path_str]).settings().unwrap();
        assert_eq!(settings.session.send_queue_capacity, 256);
    }
}
