//! Control-message dispatch.
//!
//! Parses an inbound text frame and routes it to the registry, dispatcher,
//! or publisher. Returns the direct reply to the sender, if the message has
//! one; broadcasts happen as side effects.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use pulse_core::{
    ClientMessage, ConnectionId, ParseOutcome, ServerMessage, SubjectId, Topic,
    parse_client_message,
};

use super::dispatcher::BroadcastDispatcher;
use super::publisher::MetricsPublisher;
use super::registry::ConnectionRegistry;

/// Everything a session needs to dispatch one message.
pub struct MessageContext {
    /// The sending connection.
    pub connection_id: ConnectionId,
    /// Verified identity behind the connection.
    pub subject: SubjectId,
    /// Shared connection/topic state.
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out path for tracked events.
    pub dispatcher: Arc<BroadcastDispatcher>,
    /// Metrics stream management.
    pub publisher: Arc<MetricsPublisher>,
}

/// Handle one inbound text frame, returning the reply to send (if any).
///
/// A malformed frame yields an `error` reply and mutates nothing. An
/// unknown `type` is logged and dropped with no reply. Registry misses
/// (the connection raced its own teardown) are silently ignored.
#[instrument(skip_all, fields(conn_id = %ctx.connection_id))]
pub async fn handle_message(text: &str, ctx: &MessageContext) -> Option<ServerMessage> {
    let outcome = match parse_client_message(text) {
        Ok(o) => o,
        Err(e) => {
            warn!(error = %e, "failed to parse client message");
            return Some(ServerMessage::error("Invalid message format"));
        }
    };
    let message = match outcome {
        ParseOutcome::Unknown(kind) => {
            debug!(kind, "unknown message type, ignoring");
            return None;
        }
        ParseOutcome::Message(m) => m,
    };

    match message {
        ClientMessage::SubscribeMetrics {
            metrics,
            interval_ms,
        } => match ctx
            .publisher
            .subscribe(&ctx.connection_id, metrics, interval_ms)
            .await
        {
            Ok((filter, interval)) => {
                Some(ServerMessage::metrics_subscription_confirmed(filter, interval))
            }
            Err(e) => {
                debug!(error = %e, "metrics subscription ignored");
                None
            }
        },
        ClientMessage::SubscribeNotifications => {
            match ctx
                .registry
                .subscribe(&ctx.connection_id, Topic::notifications())
                .await
            {
                Ok(()) => Some(ServerMessage::subscription_confirmed(Topic::notifications())),
                Err(e) => {
                    debug!(error = %e, "subscription ignored");
                    None
                }
            }
        }
        ClientMessage::SubscribeChat { session_id } => {
            // No confirmation for chat subscriptions.
            if let Err(e) = ctx
                .registry
                .subscribe(&ctx.connection_id, Topic::chat(&session_id))
                .await
            {
                debug!(error = %e, "chat subscription ignored");
            }
            None
        }
        ClientMessage::Subscribe { topic } => match Topic::parse(&topic) {
            Some(topic) => match ctx.registry.subscribe(&ctx.connection_id, topic.clone()).await {
                Ok(()) => Some(ServerMessage::subscription_confirmed(topic)),
                Err(e) => {
                    debug!(error = %e, "subscription ignored");
                    None
                }
            },
            None => Some(ServerMessage::error(format!("unknown topic: {topic}"))),
        },
        ClientMessage::Unsubscribe { topic } => match Topic::parse(&topic) {
            Some(topic) => {
                if let Err(e) = ctx.registry.unsubscribe(&ctx.connection_id, &topic).await {
                    debug!(error = %e, "unsubscription ignored");
                    return None;
                }
                Some(ServerMessage::subscription_cancelled(topic))
            }
            None => Some(ServerMessage::error(format!("unknown topic: {topic}"))),
        },
        ClientMessage::TrackEvent { event, data } => {
            let update = ServerMessage::analytics_update(event, data, ctx.subject.clone());
            let _ = ctx.dispatcher.broadcast(&Topic::analytics(), &update).await;
            None
        }
        ClientMessage::GetMetrics => match ctx.publisher.snapshot_now().await {
            Ok(snapshot) => Some(ServerMessage::metrics_update(snapshot)),
            Err(e) => Some(ServerMessage::error(format!("metrics unavailable: {e}"))),
        },
        ClientMessage::Ping => Some(ServerMessage::pong()),
    }
}
