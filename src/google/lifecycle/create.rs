//! Instance creation for the Google driver.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::driver::{AGENT_PORT, DriverKind, Instance, InstanceCreateOpts, InstanceState};

use super::super::naming::{instance_name, region_of};
use super::super::types::{
    AccessConfig, AttachedDisk, AttachedDiskInitializeParams, ComputeInstance, Metadata,
    MetadataItem, NetworkInterface, Scheduling, ServiceAccount, Tags,
};
use super::super::{GoogleDriver, GoogleDriverError};
use super::or_cancelled;
use super::wait::OperationScope;

const IMAGE_URL_BASE: &str = "https://www.googleapis.com/compute/v1/projects";

impl GoogleDriver {
    pub(in crate::google) async fn create_instance(
        &self,
        opts: &InstanceCreateOpts,
        cancel: &CancellationToken,
    ) -> Result<Instance, GoogleDriverError> {
        opts.validate()?;
        if cancel.is_cancelled() {
            return Err(GoogleDriverError::Cancelled);
        }
        self.ensure_firewall(cancel).await?;

        let name = instance_name(&opts.runner_name, &opts.pool_name, opts.timestamp);
        let zone = crate::driver::Driver::random_zone(self);
        let span = tracing::info_span!(
            "create",
            cloud = %DriverKind::Google,
            instance = %name,
            zone = %zone,
            pool = %opts.pool_name,
            image = %self.settings.image,
            size = %self.settings.size,
        );
        self.provision(&name, &zone, opts, cancel)
            .instrument(span)
            .await
    }

    async fn provision(
        &self,
        name: &str,
        zone: &str,
        opts: &InstanceCreateOpts,
        cancel: &CancellationToken,
    ) -> Result<Instance, GoogleDriverError> {
        let started = tokio::time::Instant::now();
        let user_data = self.renderer.render(opts)?;
        tracing::debug!(user_data = %user_data, "rendered bootstrap payload");
        let descriptor = self.instance_descriptor(name, zone, opts, user_data);
        let project = &self.settings.project_id;

        tracing::debug!("creating instance");
        let operation = or_cancelled(cancel, self.api.insert_instance(project, zone, &descriptor))
            .await?
            .inspect_err(|err| tracing::error!(error = %err, "failed to submit instance"))?;
        self.wait_for_operation(OperationScope::Zone(zone), &operation.name, cancel)
            .await
            .inspect_err(|err| tracing::error!(error = %err, "instance creation failed"))?;

        let vm = or_cancelled(cancel, self.api.get_instance(project, zone, name))
            .await?
            .inspect_err(|err| tracing::error!(error = %err, "failed to fetch the new instance"))?;
        let instance = self.map_to_instance(&vm, zone, opts);
        tracing::info!(
            id = %instance.id,
            address = %instance.address,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "instance created"
        );
        Ok(instance)
    }

    /// Fixed creation descriptor for a VM named `name` in `zone`.
    pub(in crate::google) fn instance_descriptor(
        &self,
        name: &str,
        zone: &str,
        opts: &InstanceCreateOpts,
        user_data: String,
    ) -> ComputeInstance {
        let settings = &self.settings;
        let project = &settings.project_id;
        let access_configs = if settings.private_ip {
            Vec::new()
        } else {
            vec![AccessConfig {
                name: String::from("External NAT"),
                kind: String::from("ONE_TO_ONE_NAT"),
                nat_ip: String::new(),
            }]
        };
        let network = if settings.network.is_empty() {
            String::new()
        } else {
            format!("projects/{project}/global/networks/{}", settings.network)
        };
        let subnetwork = if settings.subnetwork.is_empty() {
            String::new()
        } else {
            format!(
                "projects/{project}/regions/{}/subnetworks/{}",
                region_of(zone),
                settings.subnetwork
            )
        };

        ComputeInstance {
            name: name.to_owned(),
            zone: format!("projects/{project}/zones/{zone}"),
            machine_type: format!("projects/{project}/zones/{zone}/machineTypes/{}", settings.size),
            min_cpu_platform: String::from("Automatic"),
            metadata: Some(Metadata {
                fingerprint: String::new(),
                items: vec![MetadataItem {
                    key: settings.user_data_key.clone(),
                    value: Some(user_data),
                }],
            }),
            disks: vec![AttachedDisk {
                kind: String::from("PERSISTENT"),
                boot: true,
                mode: String::from("READ_WRITE"),
                auto_delete: true,
                device_name: opts.pool_name.clone(),
                initialize_params: Some(AttachedDiskInitializeParams {
                    source_image: format!("{IMAGE_URL_BASE}/{}", settings.image),
                    disk_type: format!(
                        "projects/{project}/zones/{zone}/diskTypes/{}",
                        settings.disk_type
                    ),
                    disk_size_gb: settings.disk_size.to_string(),
                }),
            }],
            network_interfaces: vec![NetworkInterface {
                network,
                subnetwork,
                network_ip: String::new(),
                access_configs,
            }],
            can_ip_forward: false,
            scheduling: Some(Scheduling {
                preemptible: false,
                on_host_maintenance: String::from("MIGRATE"),
                automatic_restart: true,
            }),
            deletion_protection: false,
            tags: Some(Tags {
                items: settings.tags.clone(),
            }),
            service_accounts: settings
                .service_account
                .iter()
                .map(|account| ServiceAccount {
                    email: account.email.clone(),
                    scopes: account.scopes.clone(),
                })
                .collect(),
            ..ComputeInstance::default()
        }
    }

    /// Converts the provider response into the domain record.
    pub(in crate::google) fn map_to_instance(
        &self,
        vm: &ComputeInstance,
        zone: &str,
        opts: &InstanceCreateOpts,
    ) -> Instance {
        let address = vm
            .network_interfaces
            .first()
            .map(|nic| {
                if self.settings.private_ip {
                    nic.network_ip.clone()
                } else {
                    nic.access_configs
                        .first()
                        .map(|config| config.nat_ip.clone())
                        .unwrap_or_default()
                }
            })
            .unwrap_or_default();
        let started = DateTime::parse_from_rfc3339(&vm.creation_timestamp)
            .map(|created| created.timestamp())
            .unwrap_or_default();

        Instance {
            id: vm.id.clone(),
            name: vm.name.clone(),
            provider: DriverKind::Google,
            state: InstanceState::Created,
            pool: opts.pool_name.clone(),
            image: self.settings.image.clone(),
            zone: zone.to_owned(),
            size: self.settings.size.clone(),
            platform: opts.platform.clone(),
            address,
            ca_cert: opts.ca_cert.clone(),
            ca_key: opts.ca_key.clone(),
            tls_cert: opts.tls_cert.clone(),
            tls_key: opts.tls_key.clone(),
            started,
            updated: Utc::now().timestamp(),
            is_hibernated: false,
            port: AGENT_PORT,
        }
    }
}
