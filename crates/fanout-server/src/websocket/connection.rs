//! Per-connection state shared between a session and the hub.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque, unique connection identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(Uuid);

impl ConnId {
    /// Generate a fresh, time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0.simple())
    }
}

/// Session lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Created, not yet registered.
    Connecting = 0,
    /// Registered and serving traffic.
    Active = 1,
    /// Teardown started.
    Closing = 2,
    /// Unregistered, queue closed, transport released.
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Result of [`Connection::enqueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueue {
    /// Payload is waiting for the writer.
    Queued,
    /// Queue was full: payload dropped and the connection evicted.
    Evicted,
    /// Connection is closing; payload dropped.
    Closed,
}

/// A connected client as the hub sees it.
///
/// The outbound queue is bounded. Producers never wait on it: a full queue
/// means the client is too slow, so the payload is dropped and the
/// transport is closed.
pub struct Connection {
    id: ConnId,
    user: String,
    tx: mpsc::Sender<Bytes>,
    state: AtomicU8,
    /// Cancelled when the transport must close. Either duty may trigger it.
    closed: CancellationToken,
    /// Cancelled when no further payloads will be accepted.
    queue_closed: CancellationToken,
    dropped: AtomicU64,
    connected_at: Instant,
}

impl Connection {
    /// Create a connection with a fresh id and an outbound queue of
    /// `capacity` payloads. Returns the queue's receiving end.
    pub fn new(user: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        Self::with_close_token(user, capacity, CancellationToken::new())
    }

    /// Like [`Connection::new`], but the transport also closes when
    /// `parent` is cancelled.
    pub fn linked(
        user: impl Into<String>,
        capacity: usize,
        parent: &CancellationToken,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        Self::with_close_token(user, capacity, parent.child_token())
    }

    fn with_close_token(
        user: impl Into<String>,
        capacity: usize,
        closed: CancellationToken,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Self {
            id: ConnId::new(),
            user: user.into(),
            tx,
            state: AtomicU8::new(SessionState::Connecting as u8),
            closed,
            queue_closed: CancellationToken::new(),
            dropped: AtomicU64::new(0),
            connected_at: Instant::now(),
        };
        (conn, rx)
    }

    /// Connection identity.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Declared user id; empty for anonymous connections.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Whether the connection declared no user id.
    pub fn is_anonymous(&self) -> bool {
        self.user.is_empty()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless the connection is already further along.
    pub fn advance(&self, next: SessionState) {
        let _ = self.state.fetch_max(next as u8, Ordering::AcqRel);
    }

    /// Offer a payload without waiting.
    ///
    /// A full queue drops the payload and closes the transport.
    pub fn enqueue(&self, payload: Bytes) -> Enqueue {
        if self.state() >= SessionState::Closing || self.queue_closed.is_cancelled() {
            return Enqueue::Closed;
        }
        match self.tx.try_send(payload) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(payload)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    conn_id = %self.id,
                    user = %self.user,
                    dropped_bytes = payload.len(),
                    "send buffer full, evicting connection"
                );
                self.close();
                Enqueue::Evicted
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %self.id, "outbound queue closed, dropping payload");
                Enqueue::Closed
            }
        }
    }

    /// Ask the transport to close. Idempotent.
    pub fn close(&self) {
        self.advance(SessionState::Closing);
        self.closed.cancel();
    }

    /// Stop accepting payloads. Already-queued payloads are still written.
    pub fn close_queue(&self) {
        self.queue_closed.cancel();
    }

    /// Whether the transport has been asked to close.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the transport has been asked to close.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Resolves once the outbound queue has been closed.
    pub fn queue_closed(&self) -> WaitForCancellationFuture<'_> {
        self.queue_closed.cancelled()
    }

    /// Payloads dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
