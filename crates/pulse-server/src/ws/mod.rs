//! WebSocket connection management, topic subscriptions, and broadcasting.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-connection send queue and liveness state |
//! | `registry` | Connection registry + topic index (single-lock shared state) |
//! | `dispatcher` | Topic fan-out with per-subscriber failure containment |
//! | `publisher` | Per-connection recurring metric snapshot streams |
//! | `handler` | Control-message dispatch |
//! | `session` | Per-client lifecycle: admit, pump, dispatch, teardown |
//!
//! ## Data flow
//!
//! `session` → `handler` → registry/dispatcher/publisher → per-connection
//! send queues → each session's outbound pump.

pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod publisher;
pub mod registry;
pub mod session;
