//! Frame-level transport abstraction.
//!
//! Sessions talk to a [`Transport`] split into a [`FrameSink`] (outbound
//! duty) and a [`FrameStream`] (inbound duty). The production transport is
//! axum's [`WebSocket`]; tests use the channel-backed `memory` transport.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::errors::TransportError;

/// A single WebSocket frame as seen by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 data frame.
    Text(Bytes),
    /// Binary data frame.
    Binary(Bytes),
    /// Liveness probe.
    Ping(Bytes),
    /// Liveness acknowledgment.
    Pong(Bytes),
    /// Close handshake.
    Close,
}

impl Frame {
    /// Wrap an application payload: text when it is valid UTF-8, binary
    /// otherwise.
    pub fn data(payload: Bytes) -> Self {
        if std::str::from_utf8(&payload).is_ok() {
            Self::Text(payload)
        } else {
            Self::Binary(payload)
        }
    }
}

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Flush and release the write half.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a transport.
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Next frame, or `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// A full-duplex frame transport that can be split into independent halves.
pub trait Transport: Send + 'static {
    /// Write half.
    type Sink: FrameSink;
    /// Read half.
    type Stream: FrameStream;

    /// Split into write and read halves.
    fn split(self) -> (Self::Sink, Self::Stream);
}

// ── axum WebSocket ──────────────────────────────────────────────────────────

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(payload) => match std::str::from_utf8(&payload) {
                Ok(text) => Message::Text(text.into()),
                Err(_) => Message::Binary(payload),
            },
            Frame::Binary(payload) => Message::Binary(payload),
            Frame::Ping(payload) => Message::Ping(payload),
            Frame::Pong(payload) => Message::Pong(payload),
            Frame::Close => Message::Close(None),
        }
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::Text(Bytes::copy_from_slice(text.as_str().as_bytes())),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
        }
    }
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        SinkExt::send(self, Message::from(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self).await?;
        Ok(())
    }
}

#[async_trait]
impl FrameStream for SplitStream<WebSocket> {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        let next = StreamExt::next(self).await?;
        Some(next.map(Frame::from).map_err(TransportError::from))
    }
}

impl Transport for WebSocket {
    type Sink = SplitSink<WebSocket, Message>;
    type Stream = SplitStream<WebSocket>;

    fn split(self) -> (Self::Sink, Self::Stream) {
        StreamExt::split(self)
    }
}

// ── In-memory transport ─────────────────────────────────────────────────────
