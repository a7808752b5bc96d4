//! Per-connection recurring metric snapshot streams.
//!
//! Each `subscribe_metrics` request owns exactly one recurring task; a
//! repeat request cancels the previous task before starting the new one.
//! Cancellation is a first-class operation: the handle lives in the
//! connection's registry entry and is cancelled exactly once at teardown.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pulse_core::{
    ConnectionId, MetricsFilter, MetricsProducer, MetricsSnapshot, ProducerError, ServerMessage,
    Topic,
};

use crate::config::ServerConfig;
use crate::metrics::{METRICS_TICKS_TOTAL, METRICS_TICK_ERRORS_TOTAL};

use super::connection::SendOutcome;
use super::registry::{ConnectionRegistry, RegistryError};

/// Cancellable handle for one connection's recurring publisher task.
pub struct PublisherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// Wrap a spawned publish loop.
    #[must_use]
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    /// Cancel the task. A tick already in flight completes; no further tick
    /// fires.
    pub fn cancel(self) {
        self.cancel.cancel();
        drop(self.task);
    }

    /// Whether the underlying task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Starts and replaces per-connection metric snapshot streams.
pub struct MetricsPublisher {
    registry: Arc<ConnectionRegistry>,
    producer: Arc<dyn MetricsProducer>,
    default_interval_ms: u64,
    min_interval_ms: u64,
}

impl MetricsPublisher {
    /// Create a publisher over the registry and the external producer.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        producer: Arc<dyn MetricsProducer>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry,
            producer,
            default_interval_ms: config.metrics_default_interval_ms,
            min_interval_ms: config.metrics_min_interval_ms,
        }
    }

    /// Clamp a requested interval to the configured floor, applying the
    /// default when the request omitted it.
    #[must_use]
    pub fn effective_interval_ms(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_interval_ms)
            .max(self.min_interval_ms)
    }

    /// Start (or replace) the metrics stream for a connection.
    ///
    /// Subscribes the connection to the reserved `metrics` topic, spawns the
    /// recurring task, and cancels any previous task for the same
    /// connection. Returns the effective filter and interval for the
    /// confirmation reply.
    pub async fn subscribe(
        &self,
        conn_id: &ConnectionId,
        metrics: Option<Vec<String>>,
        interval_ms: Option<u64>,
    ) -> Result<(MetricsFilter, u64), RegistryError> {
        self.registry.subscribe(conn_id, Topic::metrics()).await?;

        let interval_ms = self.effective_interval_ms(interval_ms);
        let filter = MetricsFilter::from_request(metrics);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_publish_loop(
            self.registry.clone(),
            self.producer.clone(),
            conn_id.clone(),
            filter.clone(),
            Duration::from_millis(interval_ms),
            cancel.clone(),
        ));

        // Replace semantics: at most one live timer per connection.
        if let Some(previous) = self
            .registry
            .set_publisher(conn_id, PublisherHandle::new(cancel, task))
            .await?
        {
            debug!(conn_id = %conn_id, "replacing existing metrics stream");
            previous.cancel();
        }
        Ok((filter, interval_ms))
    }

    /// Take a one-shot snapshot without starting a stream.
    pub async fn snapshot_now(&self) -> Result<MetricsSnapshot, ProducerError> {
        self.producer.snapshot().await
    }
}

/// The recurring publish loop for one connection.
///
/// Exits when cancelled, when the connection leaves the registry (a stale
/// tick is a silent no-op), or when the connection's send queue closes.
async fn run_publish_loop(
    registry: Arc<ConnectionRegistry>,
    producer: Arc<dyn MetricsProducer>,
    conn_id: ConnectionId,
    filter: MetricsFilter,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; the stream starts one period in.
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(conn) = registry.get(&conn_id).await else {
                    break;
                };
                let snapshot = match producer.snapshot().await {
                    Ok(s) => s,
                    Err(e) => {
                        counter!(METRICS_TICK_ERRORS_TOTAL).increment(1);
                        debug!(conn_id = %conn_id, error = %e, "metrics tick skipped");
                        continue;
                    }
                };
                let snapshot = match filter.names() {
                    Some(names) => snapshot.filter_to(names),
                    None => snapshot,
                };
                counter!(METRICS_TICKS_TOTAL).increment(1);
                match conn.send_json(&ServerMessage::metrics_update(snapshot)) {
                    SendOutcome::Closed => {
                        warn!(conn_id = %conn_id, "metrics push failed, tearing down connection");
                        let _ = registry.teardown(&conn_id).await;
                        break;
                    }
                    SendOutcome::Delivered | SendOutcome::QueueFull => {}
                }
            }
        }
    }
}
