//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Shutdown is a sweep: the token is cancelled, every session observes it,
//! sends a Close frame, and tears itself down. [`wait_for_drain`] then waits
//! until the registry is empty or a bounded grace period elapses.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ws::registry::ConnectionRegistry;

/// How often the drain loop re-checks the registry.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Coordinates graceful shutdown across all server tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for every open connection to tear down.
///
/// Returns `true` if the registry drained within the grace period, `false`
/// if connections were still open when it elapsed.
pub async fn wait_for_drain(registry: &ConnectionRegistry, grace: Duration) -> bool {
    let drained = tokio::time::timeout(grace, async {
        while registry.count() > 0 {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    })
    .await
    .is_ok();

    if drained {
        info!("all connections drained");
    } else {
        warn!(
            remaining = registry.count(),
            grace_secs = grace.as_secs(),
            "grace period elapsed with connections still open"
        );
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use pulse_core::{ConnectionId, SubjectId};

    use crate::ws::connection::ClientConnection;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_sets_flag() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        assert!(token.is_cancelled());
    }

    #[test]
    fn multiple_shutdown_calls_idempotent() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn token_cancelled_future_resolves() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();

        let handle = tokio::spawn(async move {
            token.cancelled().await;
            true
        });

        coord.shutdown();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn drain_on_empty_registry_is_immediate() {
        let registry = ConnectionRegistry::new();
        assert!(wait_for_drain(&registry, Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_with_open_connections() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(
            ConnectionId::from("c1"),
            SubjectId::from("u1"),
            tx,
        ));
        registry.admit(conn).await.unwrap();

        assert!(!wait_for_drain(&registry, Duration::from_millis(200)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_completes_when_connections_close() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, _rx) = mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(
            ConnectionId::from("c1"),
            SubjectId::from("u1"),
            tx,
        ));
        registry.admit(conn).await.unwrap();

        let sweeper = registry.clone();
        let teardown = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = sweeper.teardown(&ConnectionId::from("c1")).await;
        });

        assert!(wait_for_drain(&registry, Duration::from_secs(5)).await);
        teardown.await.unwrap();
    }
}
