//! Errors raised by the live log client.

use thiserror::Error;

/// Errors surfaced by [`super::LogClient`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LogError {
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(String),
    /// The request never received a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The service answered with a status of 300 or above.
    #[error("live log service returned {status}: {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// `message` field of the JSON body, the raw body, or the status
        /// reason.
        message: String,
    },
    /// The request body could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(String),
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
}

impl LogError {
    /// Returns `true` for failures worth retrying: transport errors and 5xx
    /// answers.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}
