//! Topic fan-out.
//!
//! A broadcast serializes the message once and attempts delivery to every
//! connection subscribed at the instant of dispatch. One bad connection
//! never blocks fan-out to the rest: failures are collected and those
//! connections torn down after the loop.

use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use pulse_core::{ConnectionId, ServerMessage, SubjectId, Topic};

use crate::metrics::{BROADCAST_MESSAGES_TOTAL, BROADCAST_SEND_FAILURES_TOTAL};

use super::connection::{ClientConnection, SendOutcome};
use super::registry::ConnectionRegistry;

/// Maximum lifetime message drops before a persistently slow client is
/// disconnected.
const MAX_TOTAL_DROPS: u64 = 100;

/// Delivers messages to every subscriber of a topic.
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastDispatcher {
    /// Create a dispatcher over the registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Broadcast a message to every current subscriber of a topic.
    ///
    /// Returns the number of connections the message was enqueued for.
    /// Broadcasting to a topic with no subscribers is a no-op.
    pub async fn broadcast(&self, topic: &Topic, message: &ServerMessage) -> usize {
        let subscribers = self.registry.subscribers_of(topic).await;
        if subscribers.is_empty() {
            debug!(topic = %topic, "broadcast to topic with no subscribers");
            return 0;
        }
        let delivered = self.fan_out(&subscribers, message).await;
        counter!(BROADCAST_MESSAGES_TOTAL).increment(1);
        debug!(topic = %topic, recipients = delivered, "broadcast delivered");
        delivered
    }

    /// Push a message directly to every open connection of a subject.
    pub async fn send_to_subject(&self, subject: &SubjectId, message: &ServerMessage) -> usize {
        let connections = self.registry.connections_for_subject(subject).await;
        if connections.is_empty() {
            return 0;
        }
        self.fan_out(&connections, message).await
    }

    /// Broadcast a server-originated notification to the `notifications`
    /// topic.
    pub async fn broadcast_notification(&self, payload: Value) -> usize {
        self.broadcast(&Topic::notifications(), &ServerMessage::notification(payload))
            .await
    }

    /// Serialize once, enqueue for each target, tear down dead targets.
    async fn fan_out(&self, targets: &[Arc<ClientConnection>], message: &ServerMessage) -> usize {
        let json = match message.to_json() {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast message");
                return 0;
            }
        };
        let mut delivered = 0;
        let mut failed: Vec<ConnectionId> = Vec::new();
        for conn in targets {
            match conn.send(Arc::clone(&json)) {
                SendOutcome::Delivered => delivered += 1,
                SendOutcome::Closed => {
                    counter!(BROADCAST_SEND_FAILURES_TOTAL).increment(1);
                    warn!(conn_id = %conn.id, "send failed, tearing down connection");
                    failed.push(conn.id.clone());
                }
                SendOutcome::QueueFull => {
                    counter!(BROADCAST_SEND_FAILURES_TOTAL).increment(1);
                    let drops = conn.drop_count();
                    if drops >= MAX_TOTAL_DROPS {
                        warn!(conn_id = %conn.id, drops, "disconnecting slow client");
                        failed.push(conn.id.clone());
                    } else {
                        warn!(conn_id = %conn.id, total_drops = drops, "send queue full, message dropped");
                    }
                }
            }
        }
        // Failure containment: the failed connections are removed after the
        // loop so the remaining subscribers were never blocked on them.
        for id in &failed {
            let _ = self.registry.teardown(id).await;
        }
        delivered
    }
}
