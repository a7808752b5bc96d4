//! # pulse-server
//!
//! The Pulse real-time broadcast server.
//!
//! - Axum HTTP + `WebSocket` endpoints: `/ws` (token-gated upgrade),
//!   `/health`, `/metrics`
//! - Connection registry and topic index as one single-lock owned structure
//! - Broadcast dispatcher: O(subscribers) fan-out with per-connection failure
//!   containment
//! - Metrics publisher: per-connection recurring snapshot streams with
//!   first-class cancellation
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod ws;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{AppState, PulseServer};
pub use shutdown::ShutdownCoordinator;
