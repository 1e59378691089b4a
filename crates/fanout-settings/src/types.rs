//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file only needs the keys it wants to change.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the hub.
///
/// # JSON Format
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "session": { "sendQueueCapacity": 512 },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanoutSettings {
    /// Listener and shutdown settings.
    pub server: ServerSettings,
    /// Hub owner-loop settings.
    pub hub: HubSettings,
    /// Per-connection session settings.
    pub session: SessionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl FanoutSettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hub.request_queue_capacity == 0 {
            return Err(SettingsError::Zero {
                field: "hub.requestQueueCapacity",
            });
        }
        self.session.validate()
    }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks an ephemeral port).
    pub port: u16,
    /// How long to wait for the server to drain on shutdown.
    pub shutdown_timeout_ms: u64,
}

impl ServerSettings {
    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// Hub owner-loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Capacity of the bounded request queue feeding the hub.
    pub request_queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            request_queue_capacity: 1024,
        }
    }
}

/// Per-connection session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Outbound queue capacity. A full queue evicts the connection.
    pub send_queue_capacity: usize,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Time allowed for a single outbound write.
    pub write_wait_ms: u64,
    /// Liveness window: time allowed between pongs before the read times out.
    pub pong_wait_ms: u64,
    /// Interval between liveness probes. Must be shorter than `pong_wait_ms`.
    pub ping_interval_ms: u64,
}

impl SessionSettings {
    /// Write deadline.
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Liveness read window.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Probe interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.send_queue_capacity == 0 {
            return Err(SettingsError::Zero {
                field: "session.sendQueueCapacity",
            });
        }
        if self.max_message_size == 0 {
            return Err(SettingsError::Zero {
                field: "session.maxMessageSize",
            });
        }
        if self.write_wait_ms == 0 {
            return Err(SettingsError::Zero {
                field: "session.writeWaitMs",
            });
        }
        if self.ping_interval_ms == 0 {
            return Err(SettingsError::Zero {
                field: "session.pingIntervalMs",
            });
        }
        if self.ping_interval_ms >= self.pong_wait_ms {
            return Err(SettingsError::ProbeAfterDeadline {
                ping_interval_ms: self.ping_interval_ms,
                pong_wait_ms: self.pong_wait_ms,
            });
        }
        Ok(())
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            max_message_size: 512,
            write_wait_ms: 10_000,
            pong_wait_ms: 60_000,
            ping_interval_ms: 30_000,
        }
    }
}

/// Log level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level (most verbose).
    Trace,
    /// Debug-level.
    Debug,
    /// Info-level (default).
    #[default]
    Info,
    /// Warning-level.
    Warn,
    /// Error-level.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parse a level name (case-insensitive, `warning` accepted).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
    /// Include (truncated) message payloads in trace logs.
    pub log_payloads: bool,
}
