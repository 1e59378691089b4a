//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::websocket::hub::HubStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the hub is running, `"degraded"` if it has stopped.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections.
    pub connections: usize,
    /// Distinct non-anonymous users.
    pub users: usize,
}

/// Build a health response. `stats` is `None` when the hub is not running.
pub fn health_check(start_time: Instant, stats: Option<HubStats>) -> HealthResponse {
    let (status, stats) = match stats {
        Some(stats) => ("ok", stats),
        None => ("degraded", HubStats::default()),
    };
    HealthResponse {
        status: status.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.connections,
        users: stats.users,
    }
}
