//! Settings error types.
//!
//! Every variant names where the problem is: the file that failed to load,
//! or the camelCase key (as written in `settings.json`) that was rejected.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file {}: {source}", .path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The settings file is not valid JSON, or a key has the wrong type.
    #[error("failed to parse settings file {}: {source}", .path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying decode failure.
        source: serde_json::Error,
    },

    /// Compiled defaults could not round-trip through JSON.
    #[error("failed to convert settings: {0}")]
    Convert(#[from] serde_json::Error),

    /// A capacity, size or timeout was zero.
    #[error("{field} must be greater than zero")]
    Zero {
        /// Offending key, e.g. `session.sendQueueCapacity`.
        field: &'static str,
    },

    /// Probes would not arrive before the liveness deadline expires.
    #[error(
        "session.pingIntervalMs ({ping_interval_ms}) must be shorter than \
         session.pongWaitMs ({pong_wait_ms})"
    )]
    ProbeAfterDeadline {
        /// Configured probe interval.
        ping_interval_ms: u64,
        /// Configured liveness window.
        pong_wait_ms: u64,
    },
}

impl SettingsError {
    /// The settings key this error is about, if it concerns a single key.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Zero { field } => Some(*field),
            Self::ProbeAfterDeadline { .. } => Some("session.pingIntervalMs"),
            Self::Read { .. } | Self::Parse { .. } | Self::Convert(_) => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
