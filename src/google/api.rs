//! Seam between the driver's lifecycle logic and the Compute Engine API.
//!
//! [`ComputeApi`] abstracts the handful of REST calls the driver issues so
//! the lifecycle code can be exercised against a scripted fake.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use super::types::{ComputeInstance, Firewall, Metadata, Operation};

/// Failure reported by a Compute Engine API call.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub struct ApiError {
    /// HTTP status when the provider answered; `None` for transport and
    /// decoding failures.
    pub status: Option<u16>,
    /// Provider or transport message.
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "compute API returned {code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl ApiError {
    /// Error carrying the provider's HTTP status.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Error raised before a status was received.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Returns `true` when the provider reported the resource as absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status, Some(404))
    }
}

/// Future returned by [`ComputeApi`] calls.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Compute Engine calls used by the Google driver.
pub trait ComputeApi: Send + Sync {
    /// Submits an instance insert and returns the zone operation.
    fn insert_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        instance: &'a ComputeInstance,
    ) -> ApiFuture<'a, Operation>;

    /// Fetches an instance by name or numeric identifier.
    fn get_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        instance: &'a str,
    ) -> ApiFuture<'a, ComputeInstance>;

    /// Submits an instance delete and returns the zone operation.
    fn delete_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        instance: &'a str,
    ) -> ApiFuture<'a, Operation>;

    /// Replaces instance metadata; the fingerprint must match the current one.
    fn set_metadata<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        instance: &'a str,
        metadata: &'a Metadata,
    ) -> ApiFuture<'a, Operation>;

    /// Fetches the state of a zone operation.
    fn get_zone_operation<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        operation: &'a str,
    ) -> ApiFuture<'a, Operation>;

    /// Fetches the state of a global operation.
    fn get_global_operation<'a>(
        &'a self,
        project: &'a str,
        operation: &'a str,
    ) -> ApiFuture<'a, Operation>;

    /// Fetches a firewall rule by name.
    fn get_firewall<'a>(&'a self, project: &'a str, name: &'a str) -> ApiFuture<'a, Firewall>;

    /// Submits a firewall insert and returns the global operation.
    fn insert_firewall<'a>(
        &'a self,
        project: &'a str,
        firewall: &'a Firewall,
    ) -> ApiFuture<'a, Operation>;

    /// Lists regions and returns the HTTP status of the response.
    fn list_regions<'a>(&'a self, project: &'a str) -> ApiFuture<'a, u16>;
}
