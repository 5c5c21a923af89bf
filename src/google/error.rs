//! Errors raised by the Google Compute Engine driver.

use thiserror::Error;

use super::api::ApiError;
use crate::cloud_init::CloudInitError;
use crate::config::ConfigError;
use crate::driver::DriverError;

/// Errors surfaced by [`super::GoogleDriver`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GoogleDriverError {
    /// The driver configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
    /// A creation request is missing a required field.
    #[error("invalid request: {0}")]
    Validation(String),
    /// `destroy` was called with an empty identifier list.
    #[error("no instance IDs provided")]
    NoInstanceIds,
    /// No configured zone contains the instance.
    #[error("instance {instance_id} not found in any configured zone")]
    InstanceNotFound {
        /// Identifier that was looked up.
        instance_id: String,
    },
    /// A provider operation finished with an error.
    #[error("operation {operation} failed: {message}")]
    OperationFailed {
        /// Operation name.
        operation: String,
        /// First error message the provider reported.
        message: String,
    },
    /// The provider no longer knows the operation being polled.
    #[error("operation {operation} not found")]
    OperationNotFound {
        /// Operation name.
        operation: String,
    },
    /// The operation did not finish within the configured bound.
    #[error("timed out waiting for operation {operation}")]
    OperationTimeout {
        /// Operation name.
        operation: String,
    },
    /// The health check received a non-success status.
    #[error("ping returned HTTP {status}")]
    PingFailed {
        /// Status returned by the region listing.
        status: u16,
    },
    /// The bootstrap payload could not be rendered.
    #[error("bootstrap payload error: {0}")]
    Bootstrap(String),
    /// Credentials could not be loaded or exchanged for a token.
    #[error("authentication error: {0}")]
    Auth(String),
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
    /// The operation is not supported by this driver.
    #[error("{operation} is not supported by the google driver")]
    Unsupported {
        /// Driver operation name.
        operation: &'static str,
    },
    /// A provider call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl GoogleDriverError {
    /// Returns `true` when the error means the resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        match self {
            Self::InstanceNotFound { .. } | Self::OperationNotFound { .. } => true,
            Self::Api(err) => err.is_not_found(),
            _ => false,
        }
    }
}

impl From<DriverError> for GoogleDriverError {
    fn from(value: DriverError) -> Self {
        match value {
            DriverError::Validation(field) => Self::Validation(field),
        }
    }
}

impl From<ConfigError> for GoogleDriverError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<CloudInitError> for GoogleDriverError {
    fn from(value: CloudInitError) -> Self {
        Self::Bootstrap(value.to_string())
    }
}
