//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.
//!
//! A session registers its [`Connection`] with the hub, then runs two duties
//! over the split transport:
//!
//! - **inbound** reads frames under a liveness deadline, enforces the size
//!   limit, and either forwards broadcast commands to the hub or echoes the
//!   frame back through the connection's own queue;
//! - **outbound** drains the queue to the transport with a bounded write
//!   deadline and sends a Ping every probe interval.
//!
//! When inbound ends the session unregisters, closes the queue, lets
//! outbound flush what is left and send a Close frame, then releases the
//! transport. If outbound fails first it closes the transport, which ends
//! inbound.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fanout_logging::payload_preview;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, trace, warn};

use super::connection::{Connection, SessionState};
use super::heartbeat::{self, Liveness};
use super::hub::HubHandle;
use super::protocol::{self, Command};
use super::transport::{Frame, FrameSink, FrameStream, Transport};
use crate::config::SessionConfig;

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent Close or the stream ended.
    PeerClosed,
    /// No Pong within the liveness window.
    ReadTimeout,
    /// Inbound data frame over the size limit.
    MessageTooLarge {
        /// Frame size in bytes.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// Transport read failed.
    ReadError(String),
    /// Outbound queue overflowed; the client was too slow.
    Evicted,
    /// An outbound write failed.
    WriteFailed,
    /// An outbound write missed its deadline.
    WriteTimeout,
    /// Closed from outside the session (server shutdown).
    Closed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::ReadTimeout => f.write_str("liveness timeout"),
            Self::MessageTooLarge { size, limit } => {
                write!(f, "message too large ({size} > {limit} bytes)")
            }
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::Evicted => f.write_str("send buffer overflow"),
            Self::WriteFailed => f.write_str("write failed"),
            Self::WriteTimeout => f.write_str("write timeout"),
            Self::Closed => f.write_str("closed by server"),
        }
    }
}

/// How the outbound duty stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutboundExit {
    /// Queue closed and fully flushed; Close frame sent.
    Drained,
    /// Transport closed before the queue was drained.
    Closed,
    WriteFailed,
    WriteTimeout,
}

/// A client session, ready to run over a transport.
pub struct Session {
    conn: Arc<Connection>,
    rx: mpsc::Receiver<Bytes>,
    hub: HubHandle,
    config: SessionConfig,
}

impl Session {
    /// Create a session for `user` (empty for anonymous).
    pub fn new(user: impl Into<String>, hub: HubHandle, config: SessionConfig) -> Self {
        let (conn, rx) = Connection::new(user, config.send_queue_capacity);
        Self {
            conn: Arc::new(conn),
            rx,
            hub,
            config,
        }
    }

    /// Create a session that is closed when `shutdown` is cancelled.
    pub fn linked(
        user: impl Into<String>,
        hub: HubHandle,
        config: SessionConfig,
        shutdown: &CancellationToken,
    ) -> Self {
        let (conn, rx) = Connection::linked(user, config.send_queue_capacity, shutdown);
        Self {
            conn: Arc::new(conn),
            rx,
            hub,
            config,
        }
    }

    /// The session's connection, as registered with the hub.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Run until the client goes away or is evicted.
    pub async fn run<T: Transport>(self, transport: T) -> CloseReason {
        let Self {
            conn,
            rx,
            hub,
            config,
        } = self;
        run_session(conn, rx, hub, config, transport).await
    }
}

#[instrument(skip_all, fields(conn_id = %conn.id(), user = conn.user()))]
async fn run_session<T: Transport>(
    conn: Arc<Connection>,
    rx: mpsc::Receiver<Bytes>,
    hub: HubHandle,
    config: SessionConfig,
    transport: T,
) -> CloseReason {
    let (sink, stream) = transport.split();

    hub.register(Arc::clone(&conn)).await;
    conn.advance(SessionState::Active);
    info!("client connected");

    let mut outbound = tokio::spawn(
        outbound_duty(Arc::clone(&conn), sink, rx, config.clone()).in_current_span(),
    );

    let inbound = inbound_duty(&conn, stream, &hub, &config).await;

    conn.advance(SessionState::Closing);
    hub.unregister(Arc::clone(&conn)).await;
    conn.close_queue();

    let joined = match tokio::time::timeout(config.write_wait, &mut outbound).await {
        Ok(joined) => joined,
        Err(_) => {
            debug!("outbound flush timed out, closing transport");
            conn.close();
            outbound.await
        }
    };
    let exit = match joined {
        Ok(exit) => Some(exit),
        Err(e) => {
            warn!(error = %e, "outbound task failed");
            None
        }
    };

    conn.close();
    conn.advance(SessionState::Closed);

    let reason = close_reason(inbound, exit, conn.drop_count());
    info!(
        %reason,
        dropped = conn.drop_count(),
        age_ms = u64::try_from(conn.age().as_millis()).unwrap_or(u64::MAX),
        "client disconnected"
    );
    reason
}

/// When inbound stopped because the transport was closed under it, the
/// outbound side knows the real cause.
fn close_reason(inbound: CloseReason, exit: Option<OutboundExit>, dropped: u64) -> CloseReason {
    if inbound != CloseReason::Closed {
        return inbound;
    }
    if dropped > 0 {
        return CloseReason::Evicted;
    }
    match exit {
        Some(OutboundExit::WriteFailed) => CloseReason::WriteFailed,
        Some(OutboundExit::WriteTimeout) => CloseReason::WriteTimeout,
        _ => CloseReason::Closed,
    }
}

async fn inbound_duty<S: FrameStream>(
    conn: &Connection,
    mut stream: S,
    hub: &HubHandle,
    config: &SessionConfig,
) -> CloseReason {
    let mut liveness = Liveness::start(config.pong_wait);

    loop {
        let read = tokio::select! {
            biased;
            () = conn.closed() => return CloseReason::Closed,
            read = tokio::time::timeout_at(liveness.deadline(), stream.recv()) => read,
        };

        let frame = match read {
            Err(_) => {
                warn!(acks = liveness.acks(), "no pong within liveness window");
                return CloseReason::ReadTimeout;
            }
            Ok(None) => return CloseReason::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read error");
                return CloseReason::ReadError(e.to_string());
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let payload = match frame {
            Frame::Pong(_) => {
                liveness.acknowledge();
                continue;
            }
            // The transport answers pings itself.
            Frame::Ping(_) => continue,
            Frame::Close => return CloseReason::PeerClosed,
            Frame::Text(payload) | Frame::Binary(payload) => payload,
        };

        if payload.len() > config.max_message_size {
            warn!(
                size = payload.len(),
                limit = config.max_message_size,
                "inbound message over size limit"
            );
            return CloseReason::MessageTooLarge {
                size: payload.len(),
                limit: config.max_message_size,
            };
        }
        if config.log_payloads {
            trace!(payload = %payload_preview(&payload), "message received");
        }

        match protocol::decode(payload) {
            Command::Broadcast(request) => hub.broadcast(request).await,
            Command::Echo(payload) => {
                let _ = conn.enqueue(payload);
            }
        }
    }
}

async fn outbound_duty<K: FrameSink>(
    conn: Arc<Connection>,
    mut sink: K,
    mut rx: mpsc::Receiver<Bytes>,
    config: SessionConfig,
) -> OutboundExit {
    let mut probes = heartbeat::probe_interval(config.ping_interval);
    let mut draining = false;

    let exit = loop {
        tokio::select! {
            biased;
            () = conn.closed() => break OutboundExit::Closed,
            () = conn.queue_closed(), if !draining => {
                rx.close();
                draining = true;
            }
            // Probes ahead of data: a saturated queue must not starve liveness.
            _ = probes.tick() => {
                if let Err(exit) = write(&conn, &mut sink, Frame::Ping(Bytes::new()), config.write_wait).await {
                    break exit;
                }
            }
            next = rx.recv() => {
                let Some(payload) = next else {
                    let _ = write(&conn, &mut sink, Frame::Close, config.write_wait).await;
                    break OutboundExit::Drained;
                };
                if config.log_payloads {
                    trace!(payload = %payload_preview(&payload), "message sent");
                }
                if let Err(exit) = write(&conn, &mut sink, Frame::data(payload), config.write_wait).await {
                    break exit;
                }
            }
        }
    };

    // Once closed, the sink is dropped without a flush.
    if !conn.is_closed() {
        if let Ok(Err(e)) = tokio::time::timeout(config.write_wait, sink.close()).await {
            debug!(error = %e, "transport close failed");
        }
    }
    conn.close();
    exit
}

/// Write one frame within `wait`, abandoning it as soon as the connection
/// is closed.
async fn write<K: FrameSink>(
    conn: &Connection,
    sink: &mut K,
    frame: Frame,
    wait: Duration,
) -> Result<(), OutboundExit> {
    let kind = match &frame {
        Frame::Ping(_) => "ping",
        Frame::Close => "close",
        _ => "data",
    };
    let sent = tokio::select! {
        biased;
        () = conn.closed() => {
            debug!(kind, "write abandoned, connection closed");
            return Err(OutboundExit::Closed);
        }
        sent = tokio::time::timeout(wait, sink.send(frame)) => sent,
    };
    match sent {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!(kind, error = %e, "write failed");
            Err(OutboundExit::WriteFailed)
        }
        Err(_) => {
            warn!(kind, timeout_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX), "write timed out");
            Err(OutboundExit::WriteTimeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::hub::{BroadcastRequest, Hub};
    use crate::websocket::transport::memory::{self, Peer};
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    const QUIET: Duration = Duration::from_millis(100);

    fn start_hub() -> HubHandle {
        let (hub, handle) = Hub::new(64);
        drop(tokio::spawn(hub.run()));
        handle
    }

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    fn spawn_session(
        user: &str,
        hub: &HubHandle,
        config: SessionConfig,
        write_capacity: usize,
    ) -> (Arc<Connection>, Peer, JoinHandle<CloseReason>) {
        let (transport, peer) = memory::pair(write_capacity);
        let session = Session::new(user, hub.clone(), config);
        let conn = Arc::clone(session.connection());
        let task = tokio::spawn(session.run(transport));
        (conn, peer, task)
    }

    async fn wait_for_connections(hub: &HubHandle, n: usize) {
        for _ in 0..200 {
            if hub.stats().await.map(|s| s.connections) == Some(n) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("hub never reached {n} connections");
    }

    #[tokio::test]
    async fn plain_frame_is_echoed() {
        let hub = start_hub();
        let (_conn, mut peer, task) = spawn_session("alice", &hub, config(), 16);

        peer.send_text("hello").await;
        assert_eq!(
            peer.next_data().await,
            Some(Frame::Text(Bytes::from_static(b"hello")))
        );

        peer.send(Frame::Binary(Bytes::from_static(&[0xff, 0x01]))).await;
        assert_eq!(
            peer.next_data().await,
            Some(Frame::Binary(Bytes::from_static(&[0xff, 0x01])))
        );

        drop(peer.to_server);
        assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn broadcast_command_is_routed_not_echoed() {
        let hub = start_hub();
        let (_a, mut peer_a, task_a) = spawn_session("a", &hub, config(), 16);
        let (_b, mut peer_b, task_b) = spawn_session("b", &hub, config(), 16);
        let (_c, mut peer_c, task_c) = spawn_session("c", &hub, config(), 16);
        wait_for_connections(&hub, 3).await;

        peer_a
            .send_text(r#"{"type":"broadcast","to":["b"],"body":{"x":1}}"#)
            .await;
        assert_eq!(
            peer_b.next_data().await,
            Some(Frame::Text(Bytes::from_static(br#"{"x":1}"#)))
        );
        assert!(tokio::time::timeout(QUIET, peer_a.next_data()).await.is_err());
        assert!(tokio::time::timeout(QUIET, peer_c.next_data()).await.is_err());

        for (peer, task) in [(peer_a, task_a), (peer_b, task_b), (peer_c, task_c)] {
            drop(peer);
            assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);
        }
        wait_for_connections(&hub, 0).await;
    }

    #[tokio::test]
    async fn peer_close_unregisters_and_sends_close_frame() {
        let hub = start_hub();
        let (conn, mut peer, task) = spawn_session("alice", &hub, config(), 16);
        wait_for_connections(&hub, 1).await;
        assert_eq!(conn.state(), SessionState::Active);

        peer.send(Frame::Close).await;
        assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);
        assert_eq!(peer.next_data().await, Some(Frame::Close));
        assert_eq!(conn.state(), SessionState::Closed);

        let snap = hub.snapshot().await.unwrap();
        assert!(snap.connections.is_empty());
        assert!(snap.users.is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_ends_session() {
        let hub = start_hub();
        let cfg = SessionConfig {
            max_message_size: 8,
            ..config()
        };
        let (_conn, peer, task) = spawn_session("alice", &hub, cfg, 16);

        peer.send_text("this is longer than eight bytes").await;
        assert_eq!(
            task.await.unwrap(),
            CloseReason::MessageTooLarge { size: 31, limit: 8 }
        );
        wait_for_connections(&hub, 0).await;
    }

    #[tokio::test]
    async fn queued_echoes_flush_before_close() {
        let hub = start_hub();
        let (_conn, mut peer, task) = spawn_session("alice", &hub, config(), 16);

        for text in ["one", "two", "three"] {
            peer.send_text(text).await;
        }
        peer.send(Frame::Close).await;
        assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);

        let mut got = Vec::new();
        while let Some(frame) = peer.next_data().await {
            got.push(frame);
        }
        assert_eq!(
            got,
            vec![
                Frame::Text(Bytes::from_static(b"one")),
                Frame::Text(Bytes::from_static(b"two")),
                Frame::Text(Bytes::from_static(b"three")),
                Frame::Close,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_is_evicted_after_liveness_window() {
        let hub = start_hub();
        let cfg = config();
        let window = cfg.pong_wait;
        let started = Instant::now();
        let (_conn, mut peer, task) = spawn_session("ghost", &hub, cfg, 16);

        let reason = task.await.unwrap();
        assert_eq!(reason, CloseReason::ReadTimeout);
        let elapsed = started.elapsed();
        assert!(elapsed >= window, "closed early: {elapsed:?}");
        assert!(elapsed < window + Duration::from_secs(1), "closed late: {elapsed:?}");

        assert!(matches!(peer.from_server.recv().await, Some(Frame::Ping(_))));
        assert_eq!(hub.stats().await.unwrap().connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn answering_probes_keeps_session_alive() {
        let hub = start_hub();
        let (conn, peer, task) = spawn_session("alice", &hub, config(), 16);
        let Peer {
            to_server,
            mut from_server,
        } = peer;

        let responder = tokio::spawn(async move {
            while let Some(frame) = from_server.recv().await {
                if let Frame::Ping(data) = frame {
                    if to_server.send(Ok(Frame::Pong(data))).await.is_err() {
                        break;
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(conn.state(), SessionState::Active);
        assert_eq!(hub.stats().await.unwrap().connections, 1);

        responder.abort();
        assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reader_is_evicted() {
        let hub = start_hub();
        let cfg = SessionConfig {
            send_queue_capacity: 1,
            ..config()
        };
        // Peer never reads and its buffer holds one frame.
        let (conn, _peer, task) = spawn_session("slow", &hub, cfg, 1);
        wait_for_connections(&hub, 1).await;

        for i in 0..4u8 {
            hub.broadcast(BroadcastRequest::to_users(["slow"], vec![b'0' + i]))
                .await;
        }

        assert_eq!(task.await.unwrap(), CloseReason::Evicted);
        assert!(conn.drop_count() >= 1);
        assert_eq!(hub.stats().await.unwrap().connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_cancels_stalled_write() {
        let hub = start_hub();
        let cfg = SessionConfig {
            send_queue_capacity: 1,
            ..config()
        };
        let (conn, _peer, task) = spawn_session("slow", &hub, cfg, 1);
        wait_for_connections(&hub, 1).await;

        for i in 0..4u8 {
            hub.broadcast(BroadcastRequest::to_users(["slow"], vec![b'0' + i]))
                .await;
        }
        // Requests apply in order, so every broadcast has been offered.
        let _ = hub.stats().await;
        assert!(conn.is_closed());

        let evicted_at = Instant::now();
        assert_eq!(task.await.unwrap(), CloseReason::Evicted);
        let elapsed = evicted_at.elapsed();
        assert!(elapsed < Duration::from_secs(1), "session lingered {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_stalled_write() {
        let hub = start_hub();
        let shutdown = CancellationToken::new();
        let (transport, peer) = memory::pair(1);
        let session = Session::linked("alice", hub.clone(), config(), &shutdown);
        let task = tokio::spawn(session.run(transport));
        wait_for_connections(&hub, 1).await;

        // Two echoes: the first fills the peer's buffer, the second stalls.
        peer.send_text("one").await;
        peer.send_text("two").await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cancelled_at = Instant::now();
        shutdown.cancel();
        assert_eq!(task.await.unwrap(), CloseReason::Closed);
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn shutdown_token_closes_linked_session() {
        let hub = start_hub();
        let shutdown = CancellationToken::new();
        let (transport, _peer) = memory::pair(16);
        let session = Session::linked("alice", hub.clone(), config(), &shutdown);
        let task = tokio::spawn(session.run(transport));
        wait_for_connections(&hub, 1).await;

        shutdown.cancel();
        assert_eq!(task.await.unwrap(), CloseReason::Closed);
        wait_for_connections(&hub, 0).await;
    }

    #[test]
    fn outbound_cause_wins_when_inbound_was_cut_off() {
        assert_eq!(
            close_reason(CloseReason::Closed, Some(OutboundExit::WriteTimeout), 0),
            CloseReason::WriteTimeout
        );
        assert_eq!(
            close_reason(CloseReason::Closed, Some(OutboundExit::WriteTimeout), 2),
            CloseReason::Evicted
        );
        assert_eq!(
            close_reason(CloseReason::PeerClosed, Some(OutboundExit::WriteFailed), 0),
            CloseReason::PeerClosed
        );
        assert_eq!(
            close_reason(CloseReason::Closed, Some(OutboundExit::Closed), 0),
            CloseReason::Closed
        );
    }

    #[test]
    fn close_reason_display() {
        assert_eq!(
            CloseReason::MessageTooLarge { size: 600, limit: 512 }.to_string(),
            "message too large (600 > 512 bytes)"
        );
        assert_eq!(CloseReason::ReadTimeout.to_string(), "liveness timeout");
    }
}
