//! Error types for the coordination core.

/// Top-level error type for the coordination core.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    /// Transient network failure (timeout, 5xx, connection refused).
    ///
    /// Retryable via [`BackoffController`](crate::backoff::BackoffController);
    /// never surfaced as fatal by the probes.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend refused the request (no token issued, insufficient rank).
    ///
    /// Terminal — not retried automatically.
    #[error("permission denied: {0}")]
    Denied(String),

    /// Voice infrastructure unreachable or misconfigured.
    ///
    /// Triggers the simulated-roster fallback rather than failure.
    #[error("voice infrastructure unavailable: {0}")]
    Unavailable(String),

    /// Push-to-talk rejected by net discipline rules.
    #[error("transmit denied: {0}")]
    TransmitDenied(String),

    /// No active voice session for the requested operation.
    #[error("no active session: {0}")]
    NoSession(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed backend response payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CoordError>;

impl CoordError {
    /// Returns `true` for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
