//! Connection handles and the live connection table.
//!
//! A [`ConnectionHandle`] is the non-owning reference through which the
//! router and supervisor reach one peer. It wraps a bounded outbound queue;
//! the session task in the server drains the queue and writes to the socket,
//! so enqueueing never blocks on a slow peer. A full queue is treated as a
//! liveness failure: the handle closes itself and the session tears down
//! through the normal disconnect path.

use banter_protocol::ServerEnvelope;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

/// Counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{timestamp:x}_{counter:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the session's writer half consumes from the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A protocol envelope, encoded to a text frame by the writer.
    Envelope(ServerEnvelope),
    /// A liveness probe, written as a WebSocket ping frame.
    Ping,
    /// Reply to a peer-initiated ping.
    Pong(Vec<u8>),
}

/// Handle to one live connection.
///
/// Cheap to clone behind an [`Arc`]; the server owns the receiving half of
/// the queue for the connection's lifetime.
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its session task drains.
    #[must_use]
    pub fn new(queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = Arc::new(Self {
            id: ConnectionId::generate(),
            outbound: tx,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        });
        (handle, rx)
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Best-effort enqueue of an outbound envelope.
    ///
    /// Returns `false` if the envelope was dropped. Failures are logged, not
    /// propagated; a full queue closes the connection (overflow is a liveness
    /// failure, not backpressure on the caller).
    pub fn send(&self, envelope: ServerEnvelope) -> bool {
        self.enqueue(Outbound::Envelope(envelope))
    }

    /// Enqueue a liveness probe.
    pub fn send_probe(&self) -> bool {
        self.enqueue(Outbound::Ping)
    }

    /// Enqueue a pong reply to a peer-initiated ping.
    pub fn send_pong(&self, payload: Vec<u8>) -> bool {
        self.enqueue(Outbound::Pong(payload))
    }

    fn enqueue(&self, item: Outbound) -> bool {
        if self.is_closed() {
            trace!(connection = %self.id, "Dropping outbound message for closed connection");
            return false;
        }
        match self.outbound.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %self.id, "Outbound queue overflow, closing connection");
                self.close();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection = %self.id, "Outbound queue receiver gone");
                self.close();
                false
            }
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// Wakes the session task via [`ConnectionHandle::closed`]; the task
    /// performs the transport close and the registry cleanup.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(connection = %self.id, "Connection handle closed");
            self.close_signal.notify_one();
        }
    }

    /// Check whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until the connection is closed.
    ///
    /// Single-waiter: only the owning session task should await this.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_signal.notified().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The set of all live connections, identified and not.
///
/// Owned by the server. Broadcast fan-outs iterate a [`snapshot`] so a
/// connection added or removed mid-broadcast is deterministically included
/// or excluded, never double-notified.
///
/// [`snapshot`]: ConnectionTable::snapshot
#[derive(Default)]
pub struct ConnectionTable {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
}

impl ConnectionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection.
    pub fn insert(&self, handle: Arc<ConnectionHandle>) {
        self.connections.insert(handle.id().clone(), handle);
    }

    /// Remove a connection. Idempotent.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(id).map(|(_, handle)| handle)
    }

    /// Point lookup.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot the current connections for fan-out.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// All tracked connection IDs.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Close every connection. Used during shutdown.
    pub fn close_all(&self) {
        for entry in self.connections.iter() {
            entry.value().close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("conn_"));
    }

    #[tokio::test]
    async fn test_send_delivers_to_receiver() {
        let (handle, mut rx) = ConnectionHandle::new(4);
        assert!(handle.send(ServerEnvelope::Joined));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Envelope(ServerEnvelope::Joined))
        );
    }

    #[tokio::test]
    async fn test_overflow_closes_connection() {
        let (handle, _rx) = ConnectionHandle::new(1);
        assert!(handle.send(ServerEnvelope::Joined));
        // Queue is full; this send is dropped and the handle closes.
        assert!(!handle.send(ServerEnvelope::Joined));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_dropped() {
        let (handle, _rx) = ConnectionHandle::new(4);
        handle.close();
        assert!(!handle.send(ServerEnvelope::Joined));
    }

    #[tokio::test]
    async fn test_close_idempotent_and_wakes_waiter() {
        let (handle, _rx) = ConnectionHandle::new(4);
        handle.close();
        handle.close();
        // Close happened before the wait; must not hang.
        handle.closed().await;
    }

    #[tokio::test]
    async fn test_closed_wakes_pending_waiter() {
        let (handle, _rx) = ConnectionHandle::new(4);
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.closed().await })
        };
        tokio::task::yield_now().await;
        handle.close();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_table_snapshot_and_close_all() {
        let table = ConnectionTable::new();
        let (a, _rx_a) = ConnectionHandle::new(4);
        let (b, _rx_b) = ConnectionHandle::new(4);
        table.insert(a.clone());
        table.insert(b.clone());

        assert_eq!(table.len(), 2);
        assert_eq!(table.snapshot().len(), 2);

        table.close_all();
        assert!(a.is_closed());
        assert!(b.is_closed());

        table.remove(a.id());
        assert_eq!(table.len(), 1);
        assert!(table.get(a.id()).is_none());
        assert!(table.get(b.id()).is_some());
    }
}
