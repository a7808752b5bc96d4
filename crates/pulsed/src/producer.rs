//! Runtime metrics producer.
//!
//! Reports live server-side counters. This is the collaborator the metrics
//! publisher queries on every tick; a deployment with a real analytics store
//! swaps in its own `MetricsProducer`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use pulse_core::{MetricsProducer, MetricsSnapshot, ProducerError};
use pulse_server::ws::registry::ConnectionRegistry;

/// Snapshots live registry and uptime counters.
pub struct RuntimeMetricsProducer {
    registry: Arc<ConnectionRegistry>,
    started_at: Instant,
}

impl RuntimeMetricsProducer {
    /// Create a producer over the server's registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
        }
    }
}

#[async_trait]
impl MetricsProducer for RuntimeMetricsProducer {
    async fn snapshot(&self) -> Result<MetricsSnapshot, ProducerError> {
        let mut snap = MetricsSnapshot::new();
        snap.insert("activeUsers", json!(self.registry.subject_count().await));
        snap.insert("activeConnections", json!(self.registry.count()));
        snap.insert("activeTopics", json!(self.registry.topic_count().await));
        snap.insert("uptimeSecs", json!(self.started_at.elapsed().as_secs()));
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    use pulse_core::{ConnectionId, SubjectId, Topic};
    use pulse_server::ws::connection::ClientConnection;

    #[tokio::test]
    async fn snapshot_reports_registry_counters() {
        let registry = Arc::new(ConnectionRegistry::new());
        let producer = RuntimeMetricsProducer::new(registry.clone());

        let (tx, _rx) = mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(
            ConnectionId::from("c1"),
            SubjectId::from("alice"),
            tx,
        ));
        registry.admit(conn).await.unwrap();
        registry
            .subscribe(&ConnectionId::from("c1"), Topic::notifications())
            .await
            .unwrap();

        let snap = producer.snapshot().await.unwrap();
        assert_eq!(snap.get("activeUsers"), Some(&json!(1)));
        assert_eq!(snap.get("activeConnections"), Some(&json!(1)));
        assert_eq!(snap.get("activeTopics"), Some(&json!(1)));
        assert!(snap.get("uptimeSecs").is_some());
    }

    #[tokio::test]
    async fn snapshot_on_empty_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let producer = RuntimeMetricsProducer::new(registry);

        let snap = producer.snapshot().await.unwrap();
        assert_eq!(snap.get("activeUsers"), Some(&json!(0)));
        assert_eq!(snap.get("activeConnections"), Some(&json!(0)));
    }
}
