//! Wire types for the subset of the Compute Engine v1 API the driver uses.

use serde::{Deserialize, Serialize};

/// Operation status reported once the provider has finished the work.
pub const OPERATION_DONE: &str = "DONE";

/// A VM resource, used both as the insert descriptor and the get response.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeInstance {
    /// Numeric identifier, serialised by the API as a string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Instance name.
    pub name: String,
    /// Zone URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
    /// Machine type URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_type: String,
    /// Minimum CPU platform.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_cpu_platform: String,
    /// RFC 3339 creation time.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub creation_timestamp: String,
    /// Provider status such as `RUNNING`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// Key/value metadata, including the bootstrap payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Attached disks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<AttachedDisk>,
    /// Network interfaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<NetworkInterface>,
    /// Whether the VM may forward packets.
    #[serde(default)]
    pub can_ip_forward: bool,
    /// Scheduling options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<Scheduling>,
    /// Whether deletion is blocked.
    #[serde(default)]
    pub deletion_protection: bool,
    /// Network tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    /// Service accounts attached to the VM.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<ServiceAccount>,
}

/// Instance metadata guarded by a fingerprint.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Concurrency token; a write must present the latest value.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
    /// Metadata entries.
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

impl Metadata {
    /// Returns the value stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.key == key)
            .and_then(|item| item.value.as_deref())
    }
}

/// One metadata entry.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MetadataItem {
    /// Entry key.
    pub key: String,
    /// Entry value.
    #[serde(default)]
    pub value: Option<String>,
}

/// A disk attached to an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    /// Disk kind, for example `PERSISTENT`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether this is the boot disk.
    #[serde(default)]
    pub boot: bool,
    /// Access mode.
    #[serde(default)]
    pub mode: String,
    /// Whether the disk is deleted with the instance.
    #[serde(default)]
    pub auto_delete: bool,
    /// Device name exposed to the guest.
    #[serde(default)]
    pub device_name: String,
    /// Parameters used to create the disk alongside the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<AttachedDiskInitializeParams>,
}

/// Creation parameters for a new attached disk.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDiskInitializeParams {
    /// Source image URL.
    pub source_image: String,
    /// Disk type URL.
    pub disk_type: String,
    /// Size in gigabytes, serialised by the API as a string.
    pub disk_size_gb: String,
}

/// A network interface on an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Network URL; empty selects the default network.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
    /// Subnetwork URL; empty selects the network default.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnetwork: String,
    /// Private address assigned by the provider.
    #[serde(rename = "networkIP", default, skip_serializing_if = "String::is_empty")]
    pub network_ip: String,
    /// Public access configurations; omitted entirely for private VMs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_configs: Vec<AccessConfig>,
}

/// A public access configuration.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AccessConfig {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Kind, for example `ONE_TO_ONE_NAT`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// External address assigned by the provider.
    #[serde(rename = "natIP", default, skip_serializing_if = "String::is_empty")]
    pub nat_ip: String,
}

/// Scheduling options for an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scheduling {
    /// Whether the VM may be preempted.
    pub preemptible: bool,
    /// Maintenance behaviour.
    pub on_host_maintenance: String,
    /// Whether the VM restarts after a host failure.
    pub automatic_restart: bool,
}

/// Network tags applied to an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Tags {
    /// Tag values.
    #[serde(default)]
    pub items: Vec<String>,
}

/// Service account attached to an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceAccount {
    /// Account email, or `default`.
    pub email: String,
    /// OAuth scopes granted to the account.
    pub scopes: Vec<String>,
}

/// A long-running provider operation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation name used for polling.
    pub name: String,
    /// `PENDING`, `RUNNING` or `DONE`.
    #[serde(default)]
    pub status: String,
    /// Error payload when the operation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl Operation {
    /// Returns `true` once the provider reports the operation finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == OPERATION_DONE
    }
}

/// Error payload of a failed operation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct OperationError {
    /// Individual errors; the first one is surfaced to callers.
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

impl OperationError {
    /// Message of the first reported error.
    #[must_use]
    pub fn first_message(&self) -> String {
        self.errors.first().map_or_else(
            || String::from("operation failed without details"),
            |item| item.message.clone(),
        )
    }
}

/// One error inside an [`OperationError`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct OperationErrorItem {
    /// Machine-readable code.
    #[serde(default)]
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// A VPC firewall rule.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Firewall {
    /// Rule name.
    pub name: String,
    /// Network URL; empty selects the default network.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
    /// `INGRESS` or `EGRESS`.
    #[serde(default)]
    pub direction: String,
    /// Rule priority.
    #[serde(default)]
    pub priority: i64,
    /// Source CIDR ranges.
    #[serde(default)]
    pub source_ranges: Vec<String>,
    /// Network tags the rule applies to.
    #[serde(default)]
    pub target_tags: Vec<String>,
    /// Allowed protocol and port pairs.
    #[serde(default)]
    pub allowed: Vec<FirewallAllowed>,
}

/// Protocol and ports permitted by a firewall rule.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FirewallAllowed {
    /// Protocol name, for example `tcp`.
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    /// Port numbers or ranges.
    #[serde(default)]
    pub ports: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_interface_omits_access_configs() {
        let nic = NetworkInterface {
            network: String::from("projects/p/global/networks/default"),
            ..NetworkInterface::default()
        };
        let json = serde_json::to_value(&nic).expect("serialise");
        assert!(json.get("accessConfigs").is_none());
        assert!(json.get("networkIP").is_none());
    }

    #[test]
    fn instance_response_decodes_addresses() {
        let body = r#"{
            "id": "8812735502938475",
            "name": "runner-pool-1700000000-abcde",
            "creationTimestamp": "2024-05-01T10:00:00.000-07:00",
            "networkInterfaces": [{
                "networkIP": "10.128.0.7",
                "accessConfigs": [{"name": "External NAT", "type": "ONE_TO_ONE_NAT", "natIP": "34.1.2.3"}]
            }],
            "metadata": {"fingerprint": "abc=", "items": [{"key": "user-data", "value": "x"}]}
        }"#;
        let vm: ComputeInstance = serde_json::from_str(body).expect("decode");
        assert_eq!(vm.id, "8812735502938475");
        let nic = vm.network_interfaces.first().expect("nic");
        assert_eq!(nic.network_ip, "10.128.0.7");
        assert_eq!(nic.access_configs.first().map(|c| c.nat_ip.as_str()), Some("34.1.2.3"));
        assert_eq!(vm.metadata.as_ref().and_then(|m| m.get("user-data")), Some("x"));
    }

    #[test]
    fn operation_error_surfaces_first_message() {
        let body = r#"{"name": "op-1", "status": "DONE", "error": {"errors": [
            {"code": "QUOTA_EXCEEDED", "message": "Quota 'CPUS' exceeded."},
            {"code": "OTHER", "message": "ignored"}
        ]}}"#;
        let op: Operation = serde_json::from_str(body).expect("decode");
        assert!(op.is_done());
        assert_eq!(
            op.error.map(|err| err.first_message()).as_deref(),
            Some("Quota 'CPUS' exceeded.")
        );
    }

    #[test]
    fn firewall_serialises_protocol_key() {
        let allowed = FirewallAllowed {
            ip_protocol: String::from("tcp"),
            ports: vec![String::from("2376")],
        };
        let json = serde_json::to_value(&allowed).expect("serialise");
        assert_eq!(json.get("IPProtocol").and_then(|v| v.as_str()), Some("tcp"));
    }
}
