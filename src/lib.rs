//! Core library for provisioning disposable build VMs.
//!
//! The crate exposes a provider-agnostic [`Driver`] contract, a Google
//! Compute Engine implementation, bootstrap payload rendering, an SSH dialer
//! that waits for new VMs to come up, and a client for streaming build logs.

pub mod backoff;
pub mod cloud_init;
pub mod config;
pub mod driver;
pub mod google;
pub mod livelog;
pub mod ssh;
pub mod test_support;
pub mod util;

pub use backoff::{ExponentialBackoff, ExponentialSettings, FixedBackoff};
pub use cloud_init::{BootstrapParams, CloudInitError, CloudInitRenderer, UserDataRenderer};
pub use config::{ConfigError, GoogleConfig};
pub use driver::{
    AGENT_PORT, Driver, DriverError, DriverKind, Instance, InstanceCreateOpts, InstanceState, Os,
    Platform,
};
pub use google::{GoogleDriver, GoogleDriverError};
pub use livelog::{Line, LogClient, LogError};
pub use ssh::{DialPolicy, Dialer, RusshDialer, SshError, SshSession, SshTarget, dial_retry};
