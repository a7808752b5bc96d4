//! Protocol error types.

/// Errors raised while parsing an inbound client message.
///
/// Neither variant transitions connection state: the session replies with a
/// single `error`-typed message and stays active.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The text frame is not a valid `{type, payload}` envelope.
    #[error("invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope parsed but the payload does not match the shape the
    /// message type requires.
    #[error("invalid payload for `{kind}`: {reason}")]
    InvalidPayload {
        /// The recognized message type.
        kind: String,
        /// What was wrong with the payload.
        reason: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
