//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Cancelling the token stops the HTTP listener and closes every session
//! linked to it. The caller then waits a bounded time for the server task.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the process-wide shutdown signal.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown and wait up to `timeout` for `server` to finish.
    ///
    /// Returns `false` if the deadline passed; the task is aborted then.
    pub async fn drain(&self, server: JoinHandle<()>, timeout: Duration) -> bool {
        self.shutdown();
        info!(timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "draining server");

        let abort = server.abort_handle();
        match tokio::time::timeout(timeout, server).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "server task failed during shutdown");
                true
            }
            Err(_) => {
                warn!("shutdown timed out after {timeout:?}, aborting server");
                abort.abort();
                false
            }
        }
    }
}
