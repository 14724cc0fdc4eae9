//! Per-connection state shared between the session tasks and the hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use modhub_core::ConnectionId;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One live module connection.
pub struct ModuleConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Module identity declared when the connection opened.
    pub identity: String,
    /// Send channel to the connection's write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the module last sent anything (frame, ping or pong).
    last_seen: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed channel.
    dropped_messages: AtomicU64,
    /// Cancelled when the hub wants this session to end.
    kicked: CancellationToken,
}

impl std::fmt::Debug for ModuleConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleConnection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl ModuleConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, identity: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            identity,
            tx,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            kicked: CancellationToken::new(),
        }
    }

    /// Queue a text frame without waiting.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Queue an owned string.
    pub fn send_text(&self, message: String) -> bool {
        self.send(Arc::new(message))
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity (or connection establishment).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Whether the write side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Ask the session to disconnect this connection.
    pub fn kick(&self) {
        self.kicked.cancel();
    }

    /// Resolves once [`kick`](Self::kick) has been called.
    pub async fn kicked(&self) {
        self.kicked.cancelled().await;
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
