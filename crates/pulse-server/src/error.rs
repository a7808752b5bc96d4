//! Server error types.

/// Errors that can abort the server itself.
///
/// Per-connection failures never surface here; they are contained to the
/// connection that caused them.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not bind. The only process-fatal startup failure.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// I/O failure while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
