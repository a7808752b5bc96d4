//! Wire-format types for the client/server message protocol.
//!
//! Every message is a JSON `{type, payload}` envelope. Inbound control
//! messages parse into [`ClientMessage`] — one variant per recognized type,
//! each with its own validated payload shape. Outbound traffic is
//! [`ServerMessage`], serialized with the `type` tag inline.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::ids::{ConnectionId, SubjectId};
use crate::snapshot::MetricsSnapshot;
use crate::topic::Topic;

/// Current UTC time as an ISO-8601 string with millisecond precision.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// Raw inbound envelope before the payload is validated.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

/// A recognized control message from a client.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// Start (or replace) the periodic metrics stream for this connection.
    SubscribeMetrics {
        /// Metric names to include; absent or empty means the full snapshot.
        metrics: Option<Vec<String>>,
        /// Requested interval in milliseconds; clamped by the server.
        interval_ms: Option<u64>,
    },
    /// Subscribe to the `notifications` topic.
    SubscribeNotifications,
    /// Subscribe to the chat topic of a session.
    SubscribeChat {
        /// Chat session identifier.
        session_id: String,
    },
    /// Subscribe to an arbitrary (validated) topic by name.
    Subscribe {
        /// Requested topic name.
        topic: String,
    },
    /// Unsubscribe from a topic by name.
    Unsubscribe {
        /// Topic name to leave.
        topic: String,
    },
    /// Report an event for fan-out to `analytics` subscribers.
    TrackEvent {
        /// Event name.
        event: String,
        /// Arbitrary event data.
        data: Value,
    },
    /// Request a one-shot metrics snapshot.
    GetMetrics,
    /// Application-level ping; answered with `pong`.
    Ping,
}

/// Outcome of parsing an inbound text frame.
#[derive(Clone, Debug, PartialEq)]
pub enum ParseOutcome {
    /// A recognized, validated control message.
    Message(ClientMessage),
    /// A well-formed envelope with an unrecognized `type`; logged and
    /// dropped without a reply.
    Unknown(String),
}

#[derive(Deserialize)]
struct SubscribeMetricsPayload {
    #[serde(default)]
    metrics: Option<Vec<String>>,
    #[serde(default, rename = "interval")]
    interval_ms: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeChatPayload {
    session_id: String,
}

#[derive(Deserialize)]
struct TopicPayload {
    topic: String,
}

#[derive(Deserialize)]
struct TrackEventPayload {
    event: String,
    #[serde(default)]
    data: Value,
}

fn payload_for(kind: &str, payload: Option<Value>) -> Result<Value, ProtocolError> {
    payload.ok_or_else(|| ProtocolError::InvalidPayload {
        kind: kind.to_owned(),
        reason: "missing payload".to_owned(),
    })
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        kind: kind.to_owned(),
        reason: e.to_string(),
    })
}

/// Parse an inbound text frame.
///
/// Distinguishes three cases: a malformed envelope or payload (`Err` — the
/// session replies with an `error` message), an unknown `type`
/// ([`ParseOutcome::Unknown`] — silently dropped), and a valid control
/// message.
pub fn parse_client_message(text: &str) -> Result<ParseOutcome, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let message = match envelope.kind.as_str() {
        "subscribe_metrics" => {
            let payload = payload_for("subscribe_metrics", envelope.payload)?;
            let p: SubscribeMetricsPayload = decode("subscribe_metrics", payload)?;
            ClientMessage::SubscribeMetrics {
                metrics: p.metrics,
                interval_ms: p.interval_ms,
            }
        }
        "subscribe_notifications" => ClientMessage::SubscribeNotifications,
        "subscribe_chat" => {
            let payload = payload_for("subscribe_chat", envelope.payload)?;
            let p: SubscribeChatPayload = decode("subscribe_chat", payload)?;
            ClientMessage::SubscribeChat {
                session_id: p.session_id,
            }
        }
        "subscribe" => {
            let payload = payload_for("subscribe", envelope.payload)?;
            let p: TopicPayload = decode("subscribe", payload)?;
            ClientMessage::Subscribe { topic: p.topic }
        }
        "unsubscribe" => {
            let payload = payload_for("unsubscribe", envelope.payload)?;
            let p: TopicPayload = decode("unsubscribe", payload)?;
            ClientMessage::Unsubscribe { topic: p.topic }
        }
        "track_event" => {
            let payload = payload_for("track_event", envelope.payload)?;
            let p: TrackEventPayload = decode("track_event", payload)?;
            ClientMessage::TrackEvent {
                event: p.event,
                data: p.data,
            }
        }
        "get_metrics" => ClientMessage::GetMetrics,
        "ping" => ClientMessage::Ping,
        other => return Ok(ParseOutcome::Unknown(other.to_owned())),
    };
    Ok(ParseOutcome::Message(message))
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Which metrics a subscription covers, as echoed in the confirmation.
///
/// Serializes as the string `"all"` or as an array of names, matching the
/// confirmation payload shape clients already parse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetricsFilter {
    /// The full snapshot.
    All,
    /// Only the named metrics.
    Named(Vec<String>),
}

impl MetricsFilter {
    /// Build from the client's requested list: absent or empty means all.
    #[must_use]
    pub fn from_request(metrics: Option<Vec<String>>) -> Self {
        match metrics {
            Some(names) if !names.is_empty() => Self::Named(names),
            _ => Self::All,
        }
    }

    /// The explicit name list, if any.
    #[must_use]
    pub fn names(&self) -> Option<&[String]> {
        match self {
            Self::All => None,
            Self::Named(names) => Some(names),
        }
    }
}

impl Serialize for MetricsFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Named(names) => names.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MetricsFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) if s == "all" => Ok(Self::All),
            Value::Array(_) => serde_json::from_value(value)
                .map(Self::Named)
                .map_err(D::Error::custom),
            _ => Err(D::Error::custom("expected \"all\" or an array of names")),
        }
    }
}

/// Payload of the `connected` handshake acknowledgment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// Connection identifier assigned to the client.
    pub client_id: ConnectionId,
    /// When the connection was admitted.
    pub timestamp: String,
}

/// Payload of a `subscription_confirmed` reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfirmedPayload {
    /// The topic the connection now receives.
    pub topic: Topic,
    /// For metrics subscriptions, which metrics the stream covers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsFilter>,
    /// For metrics subscriptions, the effective interval in milliseconds.
    #[serde(rename = "interval", skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

/// Payload of a `subscription_cancelled` reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionCancelledPayload {
    /// The topic the connection no longer receives.
    pub topic: Topic,
}

/// Payload of an `analytics_update` broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsPayload {
    /// Event name as reported by the sender.
    pub event: String,
    /// Arbitrary event data.
    pub data: Value,
    /// When the event was ingested.
    pub timestamp: String,
    /// Verified identity of the sender.
    pub subject_id: SubjectId,
}

/// A message pushed from the server to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake acknowledgment carrying the assigned client ID.
    Connected {
        /// Acknowledgment payload.
        payload: ConnectedPayload,
    },
    /// A subscribe request took effect.
    SubscriptionConfirmed {
        /// Confirmation payload.
        payload: SubscriptionConfirmedPayload,
    },
    /// An unsubscribe request took effect.
    SubscriptionCancelled {
        /// Cancellation payload.
        payload: SubscriptionCancelledPayload,
    },
    /// A metrics snapshot, targeted at one connection.
    MetricsUpdate {
        /// The (possibly filtered) snapshot.
        payload: MetricsSnapshot,
        /// When the snapshot was taken.
        timestamp: String,
    },
    /// A tracked event fanned out to `analytics` subscribers.
    AnalyticsUpdate {
        /// Event payload.
        payload: AnalyticsPayload,
    },
    /// A server-originated notification.
    Notification {
        /// Arbitrary notification payload.
        payload: Value,
    },
    /// Reply to an application-level `ping`.
    Pong {
        /// Server time of the reply.
        timestamp: String,
    },
    /// The previous inbound message could not be processed.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl ServerMessage {
    /// Build the handshake acknowledgment.
    #[must_use]
    pub fn connected(client_id: ConnectionId) -> Self {
        Self::Connected {
            payload: ConnectedPayload {
                client_id,
                timestamp: now_timestamp(),
            },
        }
    }

    /// Confirm a plain topic subscription.
    #[must_use]
    pub fn subscription_confirmed(topic: Topic) -> Self {
        Self::SubscriptionConfirmed {
            payload: SubscriptionConfirmedPayload {
                topic,
                metrics: None,
                interval_ms: None,
            },
        }
    }

    /// Confirm a metrics subscription with its effective parameters.
    #[must_use]
    pub fn metrics_subscription_confirmed(filter: MetricsFilter, interval_ms: u64) -> Self {
        Self::SubscriptionConfirmed {
            payload: SubscriptionConfirmedPayload {
                topic: Topic::metrics(),
                metrics: Some(filter),
                interval_ms: Some(interval_ms),
            },
        }
    }

    /// Confirm an unsubscribe.
    #[must_use]
    pub fn subscription_cancelled(topic: Topic) -> Self {
        Self::SubscriptionCancelled {
            payload: SubscriptionCancelledPayload { topic },
        }
    }

    /// Wrap a snapshot for delivery.
    #[must_use]
    pub fn metrics_update(snapshot: MetricsSnapshot) -> Self {
        Self::MetricsUpdate {
            payload: snapshot,
            timestamp: now_timestamp(),
        }
    }

    /// Build the analytics broadcast for a tracked event.
    #[must_use]
    pub fn analytics_update(event: String, data: Value, subject_id: SubjectId) -> Self {
        Self::AnalyticsUpdate {
            payload: AnalyticsPayload {
                event,
                data,
                timestamp: now_timestamp(),
                subject_id,
            },
        }
    }

    /// Wrap a server-originated notification payload.
    #[must_use]
    pub fn notification(payload: Value) -> Self {
        Self::Notification { payload }
    }

    /// Reply to an application-level ping.
    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_timestamp(),
        }
    }

    /// Build an error reply.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to the wire representation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── inbound parsing ─────────────────────────────────────────────

    #[test]
    fn parse_subscribe_metrics_full() {
        let raw = r#"{"type":"subscribe_metrics","payload":{"metrics":["activeUsers"],"interval":2000}}"#;
        let outcome = parse_client_message(raw).unwrap();
        assert_eq!(
            outcome,
            ParseOutcome::Message(ClientMessage::SubscribeMetrics {
                metrics: Some(vec!["activeUsers".to_owned()]),
                interval_ms: Some(2000),
            })
        );
    }

    #[test]
    fn parse_subscribe_metrics_empty_payload_defaults() {
        let raw = r#"{"type":"subscribe_metrics","payload":{}}"#;
        let outcome = parse_client_message(raw).unwrap();
        assert_eq!(
            outcome,
            ParseOutcome::Message(ClientMessage::SubscribeMetrics {
                metrics: None,
                interval_ms: None,
            })
        );
    }

    #[test]
    fn parse_subscribe_metrics_missing_payload_is_invalid() {
        let raw = r#"{"type":"subscribe_metrics"}"#;
        let err = parse_client_message(raw).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
    }

    #[test]
    fn parse_subscribe_notifications_needs_no_payload() {
        let raw = r#"{"type":"subscribe_notifications"}"#;
        let outcome = parse_client_message(raw).unwrap();
        assert_eq!(
            outcome,
            ParseOutcome::Message(ClientMessage::SubscribeNotifications)
        );
    }

    #[test]
    fn parse_subscribe_chat() {
        let raw = r#"{"type":"subscribe_chat","payload":{"sessionId":"sess_9"}}"#;
        let outcome = parse_client_message(raw).unwrap();
        assert_eq!(
            outcome,
            ParseOutcome::Message(ClientMessage::SubscribeChat {
                session_id: "sess_9".to_owned(),
            })
        );
    }

    #[test]
    fn parse_subscribe_chat_missing_session_is_invalid() {
        let raw = r#"{"type":"subscribe_chat","payload":{}}"#;
        let err = parse_client_message(raw).unwrap_err();
        match err {
            ProtocolError::InvalidPayload { kind, .. } => assert_eq!(kind, "subscribe_chat"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_generic_subscribe_and_unsubscribe() {
        let sub = parse_client_message(r#"{"type":"subscribe","payload":{"topic":"analytics"}}"#)
            .unwrap();
        assert_eq!(
            sub,
            ParseOutcome::Message(ClientMessage::Subscribe {
                topic: "analytics".to_owned(),
            })
        );
        let unsub =
            parse_client_message(r#"{"type":"unsubscribe","payload":{"topic":"notifications"}}"#)
                .unwrap();
        assert_eq!(
            unsub,
            ParseOutcome::Message(ClientMessage::Unsubscribe {
                topic: "notifications".to_owned(),
            })
        );
    }

    #[test]
    fn parse_track_event() {
        let raw = r#"{"type":"track_event","payload":{"event":"page_view","data":{"path":"/"}}}"#;
        let outcome = parse_client_message(raw).unwrap();
        match outcome {
            ParseOutcome::Message(ClientMessage::TrackEvent { event, data }) => {
                assert_eq!(event, "page_view");
                assert_eq!(data["path"], "/");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn parse_track_event_data_defaults_to_null() {
        let raw = r#"{"type":"track_event","payload":{"event":"x"}}"#;
        let outcome = parse_client_message(raw).unwrap();
        assert_eq!(
            outcome,
            ParseOutcome::Message(ClientMessage::TrackEvent {
                event: "x".to_owned(),
                data: Value::Null,
            })
        );
    }

    #[test]
    fn parse_ping_and_get_metrics() {
        assert_eq!(
            parse_client_message(r#"{"type":"ping"}"#).unwrap(),
            ParseOutcome::Message(ClientMessage::Ping)
        );
        assert_eq!(
            parse_client_message(r#"{"type":"get_metrics"}"#).unwrap(),
            ParseOutcome::Message(ClientMessage::GetMetrics)
        );
    }

    #[test]
    fn parse_unknown_type_is_not_an_error() {
        let outcome = parse_client_message(r#"{"type":"dance","payload":{}}"#).unwrap();
        assert_eq!(outcome, ParseOutcome::Unknown("dance".to_owned()));
    }

    #[test]
    fn parse_garbage_is_malformed() {
        let err = parse_client_message("not json at all").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn parse_non_object_is_malformed() {
        let err = parse_client_message("[1,2,3]").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn parse_missing_type_is_malformed() {
        let err = parse_client_message(r#"{"payload":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    // ── metrics filter ──────────────────────────────────────────────

    #[test]
    fn filter_from_request_empty_means_all() {
        assert_eq!(MetricsFilter::from_request(None), MetricsFilter::All);
        assert_eq!(
            MetricsFilter::from_request(Some(vec![])),
            MetricsFilter::All
        );
    }

    #[test]
    fn filter_from_request_names() {
        let filter = MetricsFilter::from_request(Some(vec!["a".to_owned()]));
        assert_eq!(filter.names(), Some(&["a".to_owned()][..]));
    }

    #[test]
    fn filter_serializes_all_as_string() {
        let json = serde_json::to_string(&MetricsFilter::All).unwrap();
        assert_eq!(json, "\"all\"");
    }

    #[test]
    fn filter_serializes_names_as_array() {
        let filter = MetricsFilter::Named(vec!["a".to_owned(), "b".to_owned()]);
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
    }

    #[test]
    fn filter_roundtrip() {
        for filter in [
            MetricsFilter::All,
            MetricsFilter::Named(vec!["x".to_owned()]),
        ] {
            let json = serde_json::to_string(&filter).unwrap();
            let back: MetricsFilter = serde_json::from_str(&json).unwrap();
            assert_eq!(back, filter);
        }
    }

    #[test]
    fn filter_rejects_other_shapes() {
        assert!(serde_json::from_str::<MetricsFilter>("42").is_err());
        assert!(serde_json::from_str::<MetricsFilter>("\"some\"").is_err());
    }

    // ── outbound serialization ──────────────────────────────────────

    #[test]
    fn connected_wire_shape() {
        let msg = ServerMessage::connected(ConnectionId::from("u1-abc"));
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "connected");
        assert_eq!(v["payload"]["clientId"], "u1-abc");
        assert!(v["payload"]["timestamp"].is_string());
    }

    #[test]
    fn subscription_confirmed_plain_topic() {
        let msg = ServerMessage::subscription_confirmed(Topic::notifications());
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "subscription_confirmed");
        assert_eq!(v["payload"]["topic"], "notifications");
        assert!(v["payload"].get("metrics").is_none());
        assert!(v["payload"].get("interval").is_none());
    }

    #[test]
    fn subscription_confirmed_metrics_shape() {
        let msg = ServerMessage::metrics_subscription_confirmed(MetricsFilter::All, 5000);
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["payload"]["topic"], "metrics");
        assert_eq!(v["payload"]["metrics"], "all");
        assert_eq!(v["payload"]["interval"], 5000);
    }

    #[test]
    fn subscription_cancelled_shape() {
        let msg = ServerMessage::subscription_cancelled(Topic::notifications());
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "subscription_cancelled");
        assert_eq!(v["payload"]["topic"], "notifications");
    }

    #[test]
    fn metrics_update_shape() {
        let mut snap = MetricsSnapshot::new();
        snap.insert("activeUsers", json!(3));
        let msg = ServerMessage::metrics_update(snap);
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "metrics_update");
        assert_eq!(v["payload"]["activeUsers"], 3);
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn analytics_update_carries_subject() {
        let msg = ServerMessage::analytics_update(
            "signup".to_owned(),
            json!({"plan": "pro"}),
            SubjectId::from("user_7"),
        );
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "analytics_update");
        assert_eq!(v["payload"]["event"], "signup");
        assert_eq!(v["payload"]["data"]["plan"], "pro");
        assert_eq!(v["payload"]["subjectId"], "user_7");
    }

    #[test]
    fn pong_shape() {
        let msg = ServerMessage::pong();
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "pong");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn error_shape() {
        let msg = ServerMessage::error("Invalid message format");
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["message"], "Invalid message format");
    }

    #[test]
    fn notification_shape() {
        let msg = ServerMessage::notification(json!({"title": "maintenance"}));
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "notification");
        assert_eq!(v["payload"]["title"], "maintenance");
    }

    #[test]
    fn outbound_roundtrip() {
        let msg = ServerMessage::metrics_subscription_confirmed(
            MetricsFilter::Named(vec!["activeUsers".to_owned()]),
            1000,
        );
        let json = msg.to_json().unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn timestamp_is_rfc3339_utc() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
