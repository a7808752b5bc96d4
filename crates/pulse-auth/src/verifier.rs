//! Token verification.
//!
//! Verification is synchronous from the caller's point of view (it gates
//! admission) but runs inside the per-handshake task, so a pending
//! verification never stalls other connections.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use pulse_core::SubjectId;

use crate::errors::AuthError;

/// Claims carried by a Pulse bearer token.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Identity of the token holder.
    pub user_id: String,
    /// Expiry as a Unix timestamp (seconds).
    pub exp: u64,
}

/// External collaborator that turns an opaque token into a verified subject.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify the presented token, yielding the subject identity it belongs
    /// to or the reason it was rejected.
    async fn verify(&self, token: &str) -> Result<SubjectId, AuthError>;
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier from a shared HMAC secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<SubjectId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        if data.claims.user_id.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        debug!(subject = %data.claims.user_id, "token verified");
        Ok(SubjectId::from_string(data.claims.user_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
