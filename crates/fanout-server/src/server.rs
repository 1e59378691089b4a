//! `FanoutServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use fanout_logging::payload_preview;
use serde::Deserialize;
use serde_json::value::RawValue;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, trace, warn};

use crate::config::{ServerConfig, SessionConfig};
use crate::errors::AdminError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::{BroadcastRequest, Hub, HubHandle};
use crate::websocket::protocol::raw_if_present;
use crate::websocket::session::Session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub request handle.
    pub hub: HubHandle,
    /// Settings for new sessions.
    pub session: SessionConfig,
    /// Parent of every session's close signal.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
}

/// The fan-out hub server.
pub struct FanoutServer {
    config: ServerConfig,
    hub: HubHandle,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl FanoutServer {
    /// Create a server and start its hub task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let (hub, handle) = Hub::new(config.request_queue_capacity);
        drop(tokio::spawn(
            hub.with_payload_logging(config.session.log_payloads).run(),
        ));
        Self {
            config,
            hub: handle,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            session: self.config.session.clone(),
            shutdown: self.shutdown.token(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/broadcast", post(broadcast_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the listener and serve until shutdown is signalled.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server error");
            }
            info!("http listener stopped");
        });

        info!(%addr, "fan-out hub listening");
        Ok((addr, handle))
    }

    /// Hub request handle.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[derive(Debug, Deserialize)]
struct WsParams {
    #[serde(default)]
    user: String,
}

/// GET /ws?user=<id>
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.session.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let session = Session::linked(params.user, state.hub, state.session, &state.shutdown);
            let _ = session.run(socket).await;
        })
}

/// Body of `POST /broadcast`.
#[derive(Debug, Deserialize)]
struct AdminBroadcast {
    #[serde(default)]
    targets: Option<Vec<String>>,
    #[serde(default, deserialize_with = "raw_if_present")]
    payload: Option<Box<RawValue>>,
}

impl AdminBroadcast {
    fn parse(body: &[u8]) -> Result<BroadcastRequest, AdminError> {
        let req: Self = serde_json::from_slice(body)?;
        Ok(BroadcastRequest {
            targets: req.targets.unwrap_or_default(),
            payload: req
                .payload
                .map(|p| Bytes::copy_from_slice(p.get().as_bytes()))
                .unwrap_or_default(),
        })
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// POST /broadcast
async fn broadcast_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, AdminError> {
    let request = AdminBroadcast::parse(&body).inspect_err(|e| {
        warn!(error = %e, "rejected broadcast request");
    })?;
    info!(
        targets = request.targets.len(),
        bytes = request.payload.len(),
        "admin broadcast accepted"
    );
    if state.session.log_payloads {
        trace!(payload = %payload_preview(&request.payload), "admin broadcast payload");
    }
    state.hub.broadcast(request).await;
    Ok(StatusCode::ACCEPTED)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.hub.stats().await))
}
