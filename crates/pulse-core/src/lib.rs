//! # pulse-core
//!
//! Shared vocabulary for the Pulse real-time broadcast service:
//!
//! - Branded ID newtypes ([`SubjectId`], [`ConnectionId`])
//! - Topic names with a validated vocabulary ([`Topic`])
//! - The client/server wire protocol as tagged unions ([`ClientMessage`],
//!   [`ServerMessage`])
//! - The metrics-producer collaborator seam ([`MetricsProducer`],
//!   [`MetricsSnapshot`])

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod protocol;
pub mod snapshot;
pub mod topic;

pub use errors::ProtocolError;
pub use ids::{ConnectionId, SubjectId};
pub use protocol::{
    ClientMessage, MetricsFilter, ParseOutcome, ServerMessage, now_timestamp,
    parse_client_message,
};
pub use snapshot::{MetricsProducer, MetricsSnapshot, ProducerError};
pub use topic::Topic;
