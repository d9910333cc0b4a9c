//! Per-connection push state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_core::ids::{ConnectionId, UserId};
use tokio::sync::mpsc;

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The bounded queue is at capacity.
    QueueFull,
    /// The writer task has gone away.
    Closed,
}

/// A live push connection owned by one authenticated user.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub user_id: UserId,
    /// Frames waiting for the writer task.
    tx: mpsc::Sender<Arc<String>>,
    connected_at: Instant,
    /// Set on every pong, cleared by the heartbeat.
    alive: AtomicBool,
    dropped: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, user_id: UserId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            user_id,
            tx,
            connected_at: Instant::now(),
            alive: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a serialised frame without waiting.
    pub fn send(&self, frame: Arc<String>) -> Result<(), SendFailure> {
        self.tx.try_send(frame).map_err(|e| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => SendFailure::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
            }
        })
    }

    /// Frames refused since the connection opened.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Read and reset the alive flag. `true` if a pong arrived since the last check.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}
