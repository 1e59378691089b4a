//! # fanout-logging
//!
//! Structured logging with `tracing`.
//!
//! Installs a global subscriber with an `EnvFilter` (the `RUST_LOG`
//! environment variable wins over the configured level) and either a
//! human-readable or a JSON formatting layer.

#![deny(unsafe_code)]

use fanout_settings::{LogFormat, LogLevel, LoggingSettings};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Maximum number of payload bytes rendered by [`payload_preview`].
pub const PAYLOAD_PREVIEW_LIMIT: usize = 256;

/// Errors from subscriber installation.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Build the filter: `RUST_LOG` if set and valid, otherwise `default_level`.
pub fn env_filter(default_level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_filter_str()))
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_subscriber(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = env_filter(settings.level);

    let fmt_layer = match settings.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(fmt_layer).try_init()?;
    Ok(())
}

/// Render a payload for trace logs: lossy UTF-8, cut at
/// [`PAYLOAD_PREVIEW_LIMIT`] bytes with a `…(+N bytes)` suffix.
pub fn payload_preview(payload: &[u8]) -> String {
    if payload.len() <= PAYLOAD_PREVIEW_LIMIT {
        return String::from_utf8_lossy(payload).into_owned();
    }
    let head = String::from_utf8_lossy(&payload[..PAYLOAD_PREVIEW_LIMIT]);
    format!("{head}…(+{} bytes)", payload.len() - PAYLOAD_PREVIEW_LIMIT)
}
