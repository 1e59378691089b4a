//! Error types for the transport and protocol layers.

use thiserror::Error;

/// Failures reported by a [`FrameSink`](crate::websocket::transport::FrameSink)
/// or [`FrameStream`](crate::websocket::transport::FrameStream).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying socket is gone.
    #[error("transport closed")]
    Closed,
    /// WebSocket protocol or I/O failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
}

/// Inbound frame could not be read as a command envelope.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a JSON object with the envelope shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Rejections from the `/broadcast` admin endpoint.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Request body is not a valid broadcast request.
    #[error("invalid broadcast request: {0}")]
    InvalidBody(#[from] serde_json::Error),
}
