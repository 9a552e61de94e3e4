use thiserror::Error;

/// Failures at the broadcast-transport boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not be established for the requested channel.
    /// Fatal to session construction; the only runtime error that
    /// propagates to callers.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The transport handle was already released.
    #[error("transport closed")]
    Closed,
}

/// Top-level error type for the relay crate.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A decoded frame had no recognized kind or was missing required
    /// fields. Never propagated out of the receive path; surfaced through
    /// the diagnostic log and dropped.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
