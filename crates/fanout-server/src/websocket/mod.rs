//! WebSocket connection registry, sessions, liveness, and message decoding.

pub mod connection;
pub mod heartbeat;
pub mod hub;
pub mod protocol;
pub mod session;
pub mod transport;
