//! Auth error types.

/// Errors that can occur while verifying a presented credential.
///
/// Every variant results in the same externally-visible behavior: the
/// handshake is rejected before a connection is admitted.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No token was presented on the connection URI.
    #[error("no token provided")]
    MissingToken,

    /// The token failed signature, structure, or expiry validation.
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// The token verified but carries no subject identity.
    #[error("token carries no subject identity")]
    MissingSubject,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
