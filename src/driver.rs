//! Provider-agnostic contract for provisioning disposable build VMs.
//!
//! Each cloud provider implements [`Driver`]; callers depend only on the
//! trait and on the value types defined here.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Fixed port the build agent listens on inside every VM.
pub const AGENT_PORT: u16 = 9079;

/// Lifecycle state of a provisioned VM.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// The provider confirmed the VM exists.
    Created,
    /// The VM is executing a build.
    Running,
    /// The VM is suspended and can be resumed.
    Hibernated,
    /// The VM failed and should be discarded.
    Error,
}

/// Identifies which driver produced an [`Instance`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Google Compute Engine.
    Google,
}

impl DriverKind {
    /// Stable lowercase name used in logs and records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guest operating system family.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Linux guests bootstrapped with cloud-config.
    #[default]
    Linux,
    /// Windows guests bootstrapped with PowerShell.
    Windows,
}

/// Operating system and CPU architecture of the requested VM.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Platform {
    /// Guest operating system family.
    pub os: Os,
    /// CPU architecture (for example `amd64`).
    pub arch: String,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            os: Os::Linux,
            arch: String::from("amd64"),
        }
    }
}

/// Immutable request describing the VM a caller wants.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceCreateOpts {
    /// Name of the runner requesting the VM.
    pub runner_name: String,
    /// Pool the VM belongs to.
    pub pool_name: String,
    /// Requested platform.
    pub platform: Platform,
    /// CA certificate injected into the VM.
    pub ca_cert: Vec<u8>,
    /// CA private key injected into the VM.
    pub ca_key: Vec<u8>,
    /// Server certificate injected into the VM.
    pub tls_cert: Vec<u8>,
    /// Server private key injected into the VM.
    pub tls_key: Vec<u8>,
    /// Request time in epoch seconds.
    pub timestamp: i64,
}

impl InstanceCreateOpts {
    /// Starts a builder for an [`InstanceCreateOpts`].
    #[must_use]
    pub fn builder() -> InstanceCreateOptsBuilder {
        InstanceCreateOptsBuilder::default()
    }

    /// Validates that the naming inputs are present.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] when the runner or pool name is
    /// blank.
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.runner_name.trim().is_empty() {
            return Err(DriverError::Validation(String::from("runner_name")));
        }
        if self.pool_name.trim().is_empty() {
            return Err(DriverError::Validation(String::from("pool_name")));
        }
        Ok(())
    }
}

/// Builder for [`InstanceCreateOpts`].
#[derive(Clone, Debug, Default)]
pub struct InstanceCreateOptsBuilder {
    opts: InstanceCreateOpts,
}

impl InstanceCreateOptsBuilder {
    /// Sets the runner name.
    #[must_use]
    pub fn runner_name(mut self, value: impl Into<String>) -> Self {
        self.opts.runner_name = value.into();
        self
    }

    /// Sets the pool name.
    #[must_use]
    pub fn pool_name(mut self, value: impl Into<String>) -> Self {
        self.opts.pool_name = value.into();
        self
    }

    /// Sets the platform.
    #[must_use]
    pub fn platform(mut self, value: Platform) -> Self {
        self.opts.platform = value;
        self
    }

    /// Sets the CA certificate and key.
    #[must_use]
    pub fn ca(mut self, cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        self.opts.ca_cert = cert.into();
        self.opts.ca_key = key.into();
        self
    }

    /// Sets the server certificate and key.
    #[must_use]
    pub fn tls(mut self, cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        self.opts.tls_cert = cert.into();
        self.opts.tls_key = key.into();
        self
    }

    /// Sets the request timestamp in epoch seconds.
    #[must_use]
    pub const fn timestamp(mut self, value: i64) -> Self {
        self.opts.timestamp = value;
        self
    }

    /// Trims the naming inputs and validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] when a required field is blank.
    pub fn build(mut self) -> Result<InstanceCreateOpts, DriverError> {
        self.opts.runner_name = self.opts.runner_name.trim().to_owned();
        self.opts.pool_name = self.opts.pool_name.trim().to_owned();
        self.opts.validate()?;
        Ok(self.opts)
    }
}

/// Domain record of a provisioned VM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Provider-assigned identifier; the only key for destroy and tag calls.
    pub id: String,
    /// Provider-visible name.
    pub name: String,
    /// Driver that created the VM.
    pub provider: DriverKind,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Owning pool.
    pub pool: String,
    /// Boot image identifier.
    pub image: String,
    /// Zone the VM runs in.
    pub zone: String,
    /// Machine size.
    pub size: String,
    /// Platform the VM was requested for.
    pub platform: Platform,
    /// Reachable address; empty until the provider reports an interface.
    pub address: String,
    /// CA certificate carried through from the request.
    pub ca_cert: Vec<u8>,
    /// CA key carried through from the request.
    pub ca_key: Vec<u8>,
    /// Server certificate carried through from the request.
    pub tls_cert: Vec<u8>,
    /// Server key carried through from the request.
    pub tls_key: Vec<u8>,
    /// Creation time in epoch seconds.
    pub started: i64,
    /// Last update time in epoch seconds.
    pub updated: i64,
    /// Whether the VM is currently hibernated.
    pub is_hibernated: bool,
    /// Port the build agent listens on.
    pub port: u16,
}

impl Instance {
    /// Record for a VM known only by its identifier and zone, such as one
    /// created by another process. Every other field is empty.
    #[must_use]
    pub fn known(provider: DriverKind, id: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            provider,
            state: InstanceState::Created,
            pool: String::new(),
            image: String::new(),
            zone: zone.into(),
            size: String::new(),
            platform: Platform::default(),
            address: String::new(),
            ca_cert: Vec::new(),
            ca_key: Vec::new(),
            tls_cert: Vec::new(),
            tls_key: Vec::new(),
            started: 0,
            updated: 0,
            is_hibernated: false,
            port: AGENT_PORT,
        }
    }
}

/// Errors raised by the driver contract itself, independent of provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by driver operations.
pub type DriverFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Capability set implemented by every cloud provider.
pub trait Driver: Send + Sync {
    /// Provider specific error type returned by the driver.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Provisions a VM and returns its record once the provider confirms it.
    ///
    /// Provider calls made on behalf of the request stop as soon as `cancel`
    /// fires.
    fn create<'a>(
        &'a self,
        opts: &'a InstanceCreateOpts,
        cancel: &'a CancellationToken,
    ) -> DriverFuture<'a, Instance, Self::Error>;

    /// Deletes every listed VM, continuing past per-instance failures.
    fn destroy<'a>(
        &'a self,
        instance_ids: &'a [String],
        cancel: &'a CancellationToken,
    ) -> DriverFuture<'a, (), Self::Error>;

    /// Merges `tags` into the VM's metadata.
    fn set_tags<'a>(
        &'a self,
        instance: &'a Instance,
        tags: &'a BTreeMap<String, String>,
        cancel: &'a CancellationToken,
    ) -> DriverFuture<'a, (), Self::Error>;

    /// Verifies the provider API is reachable with the configured credentials.
    fn ping<'a>(&'a self, cancel: &'a CancellationToken) -> DriverFuture<'a, (), Self::Error>;

    /// Returns the provider's console output for a VM, when supported.
    fn logs<'a>(&'a self, instance_id: &'a str) -> DriverFuture<'a, String, Self::Error>;

    /// Suspends a VM.
    fn hibernate<'a>(
        &'a self,
        instance_id: &'a str,
        pool_name: &'a str,
    ) -> DriverFuture<'a, (), Self::Error>;

    /// Resumes a hibernated VM and returns its address.
    fn start<'a>(
        &'a self,
        instance_id: &'a str,
        pool_name: &'a str,
    ) -> DriverFuture<'a, String, Self::Error>;

    /// Picks one of the configured zones uniformly at random.
    fn random_zone(&self) -> String;

    /// Returns the region that contains `zone`.
    fn region_of(&self, zone: &str) -> String;

    /// Directory on the VM used as the build workspace root.
    fn root_dir(&self) -> &str;

    /// Which provider this driver talks to.
    fn driver_name(&self) -> DriverKind;

    /// Whether [`Driver::hibernate`] and [`Driver::start`] are supported.
    fn can_hibernate(&self) -> bool;
}
