use thiserror::Error;

/// Failures surfaced by the stream core.
///
/// Closing a session twice is not an error and has no variant here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The snapshot read at connect time failed; no session was started.
    #[error("failed to read stored readings: {0}")]
    StoreRead(String),

    /// Sending to the subscriber failed or timed out; only that session closes.
    #[error("failed to emit reading to subscriber: {0}")]
    Emit(String),

    #[error("stream manager is shutting down")]
    ShuttingDown,
}
