//! # fanout-server
//!
//! Axum HTTP + `WebSocket` fan-out hub.
//!
//! - `WebSocket` gateway at `/ws?user=<id>`: one duplex session per client
//! - Hub actor owning the connection set and the user index
//! - Bounded per-connection send queues; a full queue evicts the client
//! - Ping/Pong liveness with a read deadline
//! - Admin `POST /broadcast` and `GET /health`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;
