//! Topic names.
//!
//! Connections subscribe to topics to receive broadcasts sent to that name.
//! The vocabulary is closed: the reserved topics plus the `chat:{sessionId}`
//! family. Client-supplied names outside it are rejected at the subscribe
//! boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved topic for periodic metric snapshots.
pub const METRICS: &str = "metrics";
/// Reserved topic for server-originated notifications.
pub const NOTIFICATIONS: &str = "notifications";
/// Reserved topic client-tracked events are broadcast to.
pub const ANALYTICS: &str = "analytics";
/// Prefix of per-session chat topics.
pub const CHAT_PREFIX: &str = "chat:";

/// A named broadcast channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// The reserved `metrics` topic.
    #[must_use]
    pub fn metrics() -> Self {
        Self(METRICS.to_owned())
    }

    /// The reserved `notifications` topic.
    #[must_use]
    pub fn notifications() -> Self {
        Self(NOTIFICATIONS.to_owned())
    }

    /// The reserved `analytics` topic.
    #[must_use]
    pub fn analytics() -> Self {
        Self(ANALYTICS.to_owned())
    }

    /// The chat topic for a session (`chat:{session_id}`).
    #[must_use]
    pub fn chat(session_id: &str) -> Self {
        Self(format!("{CHAT_PREFIX}{session_id}"))
    }

    /// Parse a client-supplied topic name, rejecting names outside the
    /// vocabulary.
    ///
    /// Valid: `metrics`, `notifications`, `analytics`, and `chat:{id}` with a
    /// non-empty id.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            METRICS | NOTIFICATIONS | ANALYTICS => Some(Self(name.to_owned())),
            _ => match name.strip_prefix(CHAT_PREFIX) {
                Some(id) if !id.is_empty() => Some(Self(name.to_owned())),
                _ => None,
            },
        }
    }

    /// The topic name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
