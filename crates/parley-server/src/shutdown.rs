//! Graceful shutdown coordination via `CancellationToken`.
//!
//! The HTTP listener and every push session hold a child of one token, so a
//! single `shutdown()` closes sockets and stops accepting in one step.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track a background task to be awaited during shutdown.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, then wait up to `timeout` for tracked tasks to finish.
    /// Returns `false` if the drain timed out.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();

        let handles = std::mem::take(&mut *self.tasks.lock());
        info!(task_count = handles.len(), timeout_secs = timeout.as_secs(), "draining tasks");

        let drain = futures::future::join_all(handles);
        match tokio::time::timeout(timeout, drain).await {
            Ok(_) => true,
            Err(_) => {
                warn!("shutdown timed out after {timeout:?}");
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let child = token.child_token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(token.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn drains_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        coord.track(tokio::spawn(async move { token.cancelled().await }));
        assert!(coord.graceful_shutdown(None).await);
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn drain_times_out_on_stuck_task() {
        let coord = ShutdownCoordinator::new();
        coord.track(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }));
        assert!(!coord.graceful_shutdown(Some(Duration::from_millis(50))).await);
    }
}
