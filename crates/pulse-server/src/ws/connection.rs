//! Per-connection state: send queue, liveness, drop accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use pulse_core::{ConnectionId, ServerMessage, SubjectId};

/// Result of enqueuing a message on a connection's send queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was enqueued; the outbound pump will deliver it in order.
    Delivered,
    /// The queue is full; the message was dropped and counted.
    QueueFull,
    /// The receiving side is gone; the connection is dead.
    Closed,
}

/// One authenticated, open duplex channel.
pub struct ClientConnection {
    /// Unique connection ID, never reused while referenced.
    pub id: ConnectionId,
    /// Verified identity owning the connection; immutable after admission.
    pub subject: SubjectId,
    /// Send channel to the connection's socket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was admitted (diagnostics only).
    pub connected_at: Instant,
    /// Whether the client has responded since the last heartbeat check.
    pub is_alive: AtomicBool,
    /// When the last pong (or any activity) was observed.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to a full queue.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection around its send queue.
    pub fn new(id: ConnectionId, subject: SubjectId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            subject,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue a pre-serialized text message.
    ///
    /// Non-blocking: a full queue drops the message and increments the drop
    /// counter rather than stalling the caller.
    pub fn send(&self, message: Arc<String>) -> SendOutcome {
        match self.tx.try_send(message) {
            Ok(()) => SendOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Serialize a server message and enqueue it.
    pub fn send_json(&self, message: &ServerMessage) -> SendOutcome {
        match message.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                // Nothing was enqueued; not a transport failure.
                warn!(conn_id = %self.id, error = %e, "failed to serialize outbound message");
                SendOutcome::Delivered
            }
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
