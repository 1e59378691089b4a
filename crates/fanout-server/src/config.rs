//! Runtime configuration for the server and its sessions.

use std::time::Duration;

use fanout_settings::FanoutSettings;

/// Per-session limits and timers.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Largest inbound data frame, in bytes.
    pub max_message_size: usize,
    /// Deadline for a single outbound write.
    pub write_wait: Duration,
    /// Liveness window.
    pub pong_wait: Duration,
    /// Probe period. Shorter than `pong_wait`.
    pub ping_interval: Duration,
    /// Log payload previews at trace level.
    pub log_payloads: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            max_message_size: 512,
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            log_payloads: false,
        }
    }
}

/// Configuration for [`FanoutServer`](crate::server::FanoutServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Hub request queue capacity.
    pub request_queue_capacity: usize,
    /// Session settings applied to every upgraded connection.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            request_queue_capacity: 1024,
            session: SessionConfig::default(),
        }
    }
}

impl From<&FanoutSettings> for ServerConfig {
    fn from(settings: &FanoutSettings) -> Self {
        let s = &settings.session;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            request_queue_capacity: settings.hub.request_queue_capacity,
            session: SessionConfig {
                send_queue_capacity: s.send_queue_capacity,
                max_message_size: s.max_message_size,
                write_wait: s.write_wait(),
                pong_wait: s.pong_wait(),
                ping_interval: s.ping_interval(),
                log_payloads: settings.logging.log_payloads,
            },
        }
    }
}
