//! Connection registry and fan-out dispatcher.
//!
//! [`Hub`] is a single task that owns the connection set and the user index.
//! Everything else talks to it through a cloneable [`HubHandle`] that feeds a
//! bounded request queue. Requests are applied one at a time in arrival
//! order, so a broadcast never observes a half-applied registration.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use fanout_logging::payload_preview;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use super::connection::{ConnId, Connection, Enqueue};

/// A payload and the users it is addressed to. Empty `targets` means every
/// registered connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastRequest {
    /// Target user ids.
    pub targets: Vec<String>,
    /// Opaque payload, delivered as-is.
    pub payload: Bytes,
}

impl BroadcastRequest {
    /// Address `payload` to every connection.
    pub fn all(payload: impl Into<Bytes>) -> Self {
        Self {
            targets: Vec::new(),
            payload: payload.into(),
        }
    }

    /// Address `payload` to the connections of the named users.
    pub fn to_users<I, S>(targets: I, payload: impl Into<Bytes>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            payload: payload.into(),
        }
    }
}

/// Registry counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Registered connections.
    pub connections: usize,
    /// Distinct non-anonymous users.
    pub users: usize,
}

/// Point-in-time copy of the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    /// Every registered connection.
    pub connections: BTreeSet<ConnId>,
    /// User index.
    pub users: BTreeMap<String, BTreeSet<ConnId>>,
}

/// Delivery outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the targets resolved to.
    pub recipients: usize,
    /// Recipients whose queue accepted the payload.
    pub queued: usize,
    /// Recipients evicted because their queue was full.
    pub evicted: usize,
}

enum HubCommand {
    Register(Arc<Connection>),
    Unregister(Arc<Connection>),
    Broadcast(BroadcastRequest),
    Stats(oneshot::Sender<HubStats>),
    Snapshot(oneshot::Sender<HubSnapshot>),
}

/// Owner task for registry state. Run it with [`Hub::run`].
pub struct Hub {
    connections: HashMap<ConnId, Arc<Connection>>,
    users: HashMap<String, HashMap<ConnId, Arc<Connection>>>,
    rx: mpsc::Receiver<HubCommand>,
    log_payloads: bool,
}

impl Hub {
    /// Create a hub whose request queue holds `capacity` pending requests.
    pub fn new(capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let hub = Self {
            connections: HashMap::new(),
            users: HashMap::new(),
            rx,
            log_payloads: false,
        };
        (hub, HubHandle { tx })
    }

    /// Include payload previews in trace logs.
    #[must_use]
    pub fn with_payload_logging(mut self, enabled: bool) -> Self {
        self.log_payloads = enabled;
        self
    }

    /// Apply requests until every [`HubHandle`] is dropped.
    pub async fn run(mut self) {
        info!("hub started");
        while let Some(cmd) = self.rx.recv().await {
            self.apply(cmd);
        }
        info!(connections = self.connections.len(), "hub stopped");
    }

    fn apply(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register(conn) => self.register(conn),
            HubCommand::Unregister(conn) => self.unregister(&conn),
            HubCommand::Broadcast(request) => {
                let _ = self.broadcast(&request);
            }
            HubCommand::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            HubCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn register(&mut self, conn: Arc<Connection>) {
        let id = conn.id();
        if !conn.is_anonymous() {
            let _ = self
                .users
                .entry(conn.user().to_owned())
                .or_default()
                .insert(id, Arc::clone(&conn));
        }
        info!(
            user = conn.user(),
            conn_id = %id,
            total = self.connections.len() + 1,
            "connection registered"
        );
        let _ = self.connections.insert(id, conn);
    }

    fn unregister(&mut self, conn: &Connection) {
        let id = conn.id();
        if self.connections.remove(&id).is_none() {
            debug!(conn_id = %id, "unregister of unknown connection ignored");
            return;
        }
        if let Some(bucket) = self.users.get_mut(conn.user()) {
            let _ = bucket.remove(&id);
            if bucket.is_empty() {
                let _ = self.users.remove(conn.user());
            }
        }
        info!(
            user = conn.user(),
            conn_id = %id,
            total = self.connections.len(),
            "connection unregistered"
        );
    }

    fn broadcast(&self, request: &BroadcastRequest) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for conn in self.resolve(&request.targets) {
            report.recipients += 1;
            match conn.enqueue(request.payload.clone()) {
                Enqueue::Queued => report.queued += 1,
                Enqueue::Evicted => report.evicted += 1,
                Enqueue::Closed => {}
            }
        }
        debug!(
            target_users = request.targets.len(),
            recipients = report.recipients,
            queued = report.queued,
            evicted = report.evicted,
            bytes = request.payload.len(),
            "broadcast applied"
        );
        if self.log_payloads {
            trace!(payload = %payload_preview(&request.payload), "broadcast payload");
        }
        report
    }

    /// Connections addressed by `targets`, each at most once.
    fn resolve(&self, targets: &[String]) -> Vec<&Arc<Connection>> {
        if targets.is_empty() {
            return self.connections.values().collect();
        }
        let mut seen = HashSet::new();
        targets
            .iter()
            .filter_map(|user| self.users.get(user))
            .flat_map(HashMap::iter)
            .filter(|(id, _)| seen.insert(**id))
            .map(|(_, conn)| conn)
            .collect()
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            users: self.users.len(),
        }
    }

    fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            connections: self.connections.keys().copied().collect(),
            users: self
                .users
                .iter()
                .map(|(user, bucket)| (user.clone(), bucket.keys().copied().collect()))
                .collect(),
        }
    }
}

/// Cloneable sender side of the hub's request queue.
///
/// Requests are fire-and-forget: they return once queued, and the hub
/// applies them later on its own task.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Add a connection to the registry.
    pub async fn register(&self, conn: Arc<Connection>) {
        self.submit(HubCommand::Register(conn)).await;
    }

    /// Remove a connection. Unknown connections are ignored.
    pub async fn unregister(&self, conn: Arc<Connection>) {
        self.submit(HubCommand::Unregister(conn)).await;
    }

    /// Deliver a payload to the resolved targets.
    pub async fn broadcast(&self, request: BroadcastRequest) {
        self.submit(HubCommand::Broadcast(request)).await;
    }

    /// Registry counters, or `None` if the hub has stopped.
    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubCommand::Stats(reply)).await;
        rx.await.ok()
    }

    /// Registry contents, or `None` if the hub has stopped.
    pub async fn snapshot(&self) -> Option<HubSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubCommand::Snapshot(reply)).await;
        rx.await.ok()
    }

    async fn submit(&self, cmd: HubCommand) {
        if self.tx.send(cmd).await.is_err() {
            warn!("hub is not running, request dropped");
        }
    }
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register(conn) => f.debug_tuple("Register").field(&conn.id()).finish(),
            Self::Unregister(conn) => f.debug_tuple("Unregister").field(&conn.id()).finish(),
            Self::Broadcast(req) => f
                .debug_struct("Broadcast")
                .field("targets", &req.targets.len())
                .field("bytes", &req.payload.len())
                .finish(),
            Self::Stats(_) => f.write_str("Stats"),
            Self::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}
