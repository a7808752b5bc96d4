//! Metric snapshots and the producer collaborator.
//!
//! The broadcast core does not compute metrics itself; it asks an external
//! [`MetricsProducer`] for a point-in-time snapshot and optionally filters
//! it down to the names a client asked for.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A point-in-time mapping of metric names to numeric/structured values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsSnapshot(BTreeMap<String, Value>);

impl MetricsSnapshot {
    /// Create an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a metric value, replacing any previous value for the name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let _ = self.0.insert(name.into(), value);
    }

    /// Look up a metric by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Number of metrics in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the snapshot carries no metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reduce the snapshot to only the named metrics.
    ///
    /// Names absent from the snapshot are skipped, not errors: the client
    /// asked for something the producer does not currently report.
    #[must_use]
    pub fn filter_to(&self, names: &[String]) -> Self {
        let filtered = names
            .iter()
            .filter_map(|n| self.0.get(n).map(|v| (n.clone(), v.clone())))
            .collect();
        Self(filtered)
    }

    /// Iterate over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for MetricsSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Error returned by a [`MetricsProducer`] when a snapshot cannot be taken.
///
/// A failed tick is skipped for that connection; the publisher cadence
/// continues.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// The backing data source could not be queried.
    #[error("snapshot unavailable: {0}")]
    Unavailable(String),
}

/// External collaborator computing metric snapshots on request.
#[async_trait]
pub trait MetricsProducer: Send + Sync {
    /// Produce a full snapshot of all currently-known metrics.
    async fn snapshot(&self) -> Result<MetricsSnapshot, ProducerError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> MetricsSnapshot {
        let mut snap = MetricsSnapshot::new();
        snap.insert("activeUsers", json!(57));
        snap.insert("revenueToday", json!(1023.5));
        snap.insert(
            "performanceMetrics",
            json!({"responseTime": 120, "uptime": 99.9}),
        );
        snap
    }

    #[test]
    fn insert_and_get() {
        let snap = sample();
        assert_eq!(snap.get("activeUsers"), Some(&json!(57)));
        assert!(snap.get("missing").is_none());
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn empty_snapshot() {
        let snap = MetricsSnapshot::new();
        assert!(snap.is_empty());
        assert_eq!(snap.len(), 0);
    }

    #[test]
    fn filter_keeps_only_requested_names() {
        let snap = sample();
        let filtered = snap.filter_to(&["activeUsers".to_owned()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("activeUsers"), Some(&json!(57)));
        assert!(filtered.get("revenueToday").is_none());
    }

    #[test]
    fn filter_skips_unknown_names() {
        let snap = sample();
        let filtered = snap.filter_to(&["activeUsers".to_owned(), "noSuchMetric".to_owned()]);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn filter_with_empty_list_yields_empty() {
        let snap = sample();
        assert!(snap.filter_to(&[]).is_empty());
    }

    #[test]
    fn serde_is_transparent_object() {
        let snap = sample();
        let json = serde_json::to_string(&snap).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert!(value.is_object());
        assert_eq!(value["activeUsers"], 57);
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn structured_values_survive() {
        let snap = sample();
        let perf = snap.get("performanceMetrics").unwrap();
        assert_eq!(perf["responseTime"], 120);
    }

    #[test]
    fn from_iterator() {
        let snap: MetricsSnapshot =
            [("a".to_owned(), json!(1)), ("b".to_owned(), json!(2))].into_iter().collect();
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn producer_error_display() {
        let err = ProducerError::Unavailable("db down".to_owned());
        assert_eq!(err.to_string(), "snapshot unavailable: db down");
    }
}
