//! # pulse-auth
//!
//! Credential verification for Pulse connections.
//!
//! The broadcast core treats verification as an external collaborator: it
//! hands over the bearer token presented on the connection URI and receives
//! either a verified [`pulse_core::SubjectId`] or a rejection. [`JwtVerifier`]
//! is the production implementation (HS256 JWT with a `userId` claim).

#![deny(unsafe_code)]

pub mod errors;
pub mod verifier;

pub use errors::AuthError;
pub use verifier::{Claims, JwtVerifier, TokenVerifier};
