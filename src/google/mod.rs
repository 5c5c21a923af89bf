//! Google Compute Engine implementation of [`Driver`].
//!
//! The driver provisions VMs from a fixed descriptor, waits on the returned
//! zone operation, and maps the provider response to an [`Instance`]. It
//! manages a single firewall rule opening the docker and agent ports when
//! the default network tag is in use.

mod api;
mod auth;
mod error;
mod http;
mod lifecycle;
mod naming;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::backoff::FixedBackoff;
use crate::cloud_init::{CloudInitRenderer, UserDataRenderer};
use crate::config::GoogleConfig;
use crate::driver::{Driver, DriverFuture, DriverKind, Instance, InstanceCreateOpts};

pub use api::{ApiError, ApiFuture, ComputeApi};
pub use auth::{COMPUTE_SCOPE, Credentials, ServiceAccountKey, TokenSource};
pub use error::GoogleDriverError;
pub use http::{COMPUTE_API_BASE, HttpComputeApi};
pub use lifecycle::{
    DOCKER_PORT, FIREWALL_RULE_NAME, FirewallOutcome, POLL_INTERVAL, TAG_RETRY_ATTEMPTS,
    TAG_RETRY_DELAY,
};
pub use naming::{MAX_INSTANCE_NAME_LEN, instance_name, region_of};
pub use types::{
    AccessConfig, AttachedDisk, AttachedDiskInitializeParams, ComputeInstance, Firewall,
    FirewallAllowed, Metadata, MetadataItem, NetworkInterface, OPERATION_DONE, Operation,
    OperationError, OperationErrorItem, Scheduling, ServiceAccount, Tags,
};

/// Service account attached to new VMs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct VmServiceAccount {
    pub(crate) email: String,
    pub(crate) scopes: Vec<String>,
}

/// Validated, pre-split view of [`GoogleConfig`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct DriverSettings {
    pub(crate) project_id: String,
    pub(crate) root_dir: String,
    pub(crate) zones: Vec<String>,
    pub(crate) size: String,
    pub(crate) image: String,
    pub(crate) disk_size: i64,
    pub(crate) disk_type: String,
    pub(crate) network: String,
    pub(crate) subnetwork: String,
    pub(crate) private_ip: bool,
    pub(crate) service_account: Option<VmServiceAccount>,
    pub(crate) tags: Vec<String>,
    pub(crate) user_data_key: String,
}

impl DriverSettings {
    fn from_config(config: &GoogleConfig) -> Self {
        let service_account = (!config.no_service_account).then(|| VmServiceAccount {
            email: config.service_account_email.clone(),
            scopes: config.scope_list(),
        });
        Self {
            project_id: config.project_id.trim().to_owned(),
            root_dir: config.root_dir.clone(),
            zones: config.zone_list(),
            size: config.size.clone(),
            image: config.image.clone(),
            disk_size: config.disk_size,
            disk_type: config.disk_type.clone(),
            network: config.network.trim().to_owned(),
            subnetwork: config.subnetwork.trim().to_owned(),
            private_ip: config.private_ip,
            service_account,
            tags: config.tag_list(),
            user_data_key: config.user_data_key.clone(),
        }
    }
}

/// Driver that provisions build VMs on Google Compute Engine.
pub struct GoogleDriver {
    api: Arc<dyn ComputeApi>,
    renderer: Arc<dyn UserDataRenderer>,
    settings: DriverSettings,
    firewall: OnceCell<()>,
    poll_interval: Duration,
    operation_timeout: Option<Duration>,
    tag_retry: FixedBackoff,
}

impl std::fmt::Debug for GoogleDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriver")
            .field("settings", &self.settings)
            .field("poll_interval", &self.poll_interval)
            .field("operation_timeout", &self.operation_timeout)
            .field("tag_retry", &self.tag_retry)
            .finish_non_exhaustive()
    }
}

impl GoogleDriver {
    /// Builds a driver talking to the real Compute Engine API.
    ///
    /// # Errors
    ///
    /// Returns [`GoogleDriverError::Config`] when configuration is invalid,
    /// [`GoogleDriverError::Bootstrap`] when user-data inputs cannot be read,
    /// or [`GoogleDriverError::Auth`] when credentials cannot be loaded.
    pub fn new(config: &GoogleConfig) -> Result<Self, GoogleDriverError> {
        config.validate()?;
        let tokens = TokenSource::new(Credentials::from_config(config)?);
        let renderer = CloudInitRenderer::new(config.bootstrap_params()?)
            .with_custom(config.custom_user_data()?);
        Self::with_api(config, Arc::new(HttpComputeApi::new(tokens)), Arc::new(renderer))
    }

    /// Builds a driver over an arbitrary [`ComputeApi`] and renderer.
    ///
    /// # Errors
    ///
    /// Returns [`GoogleDriverError::Config`] when configuration is invalid.
    pub fn with_api(
        config: &GoogleConfig,
        api: Arc<dyn ComputeApi>,
        renderer: Arc<dyn UserDataRenderer>,
    ) -> Result<Self, GoogleDriverError> {
        config.validate()?;
        Ok(Self {
            api,
            renderer,
            settings: DriverSettings::from_config(config),
            firewall: OnceCell::new(),
            poll_interval: POLL_INTERVAL,
            operation_timeout: config.operation_timeout(),
            tag_retry: FixedBackoff::new(TAG_RETRY_ATTEMPTS, TAG_RETRY_DELAY),
        })
    }

    /// Overrides the delay between operation polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the retry policy for metadata writes.
    #[must_use]
    pub const fn with_tag_retry(mut self, policy: FixedBackoff) -> Self {
        self.tag_retry = policy;
        self
    }

    /// Project the driver operates in.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.settings.project_id
    }

    /// Candidate zones, in configuration order.
    #[must_use]
    pub fn zones(&self) -> &[String] {
        &self.settings.zones
    }
}

impl Driver for GoogleDriver {
    type Error = GoogleDriverError;

    fn create<'a>(
        &'a self,
        opts: &'a InstanceCreateOpts,
        cancel: &'a CancellationToken,
    ) -> DriverFuture<'a, Instance, Self::Error> {
        Box::pin(self.create_instance(opts, cancel))
    }

    fn destroy<'a>(
        &'a self,
        instance_ids: &'a [String],
        cancel: &'a CancellationToken,
    ) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(self.destroy_instances(instance_ids, cancel))
    }

    fn set_tags<'a>(
        &'a self,
        instance: &'a Instance,
        tags: &'a BTreeMap<String, String>,
        cancel: &'a CancellationToken,
    ) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(self.set_instance_tags(instance, tags, cancel))
    }

    fn ping<'a>(&'a self, cancel: &'a CancellationToken) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(self.check_api(cancel))
    }

    fn logs<'a>(&'a self, _instance_id: &'a str) -> DriverFuture<'a, String, Self::Error> {
        Box::pin(async { Ok(String::new()) })
    }

    fn hibernate<'a>(
        &'a self,
        _instance_id: &'a str,
        _pool_name: &'a str,
    ) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async {
            Err(GoogleDriverError::Unsupported {
                operation: "hibernate",
            })
        })
    }

    fn start<'a>(
        &'a self,
        _instance_id: &'a str,
        _pool_name: &'a str,
    ) -> DriverFuture<'a, String, Self::Error> {
        Box::pin(async { Err(GoogleDriverError::Unsupported { operation: "start" }) })
    }

    fn random_zone(&self) -> String {
        self.settings
            .zones
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }

    fn region_of(&self, zone: &str) -> String {
        region_of(zone)
    }

    fn root_dir(&self) -> &str {
        &self.settings.root_dir
    }

    fn driver_name(&self) -> DriverKind {
        DriverKind::Google
    }

    fn can_hibernate(&self) -> bool {
        false
    }
}
