//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::cloud_init::{BootstrapParams, resolve_user_data};
use crate::util::{expand_tilde, read_to_string_ambient};

/// Network tag set that opts the driver into managing the firewall rule.
pub const DEFAULT_TAGS: &str = "allow-docker";

/// OAuth scopes attached to the VM service account unless overridden.
pub const DEFAULT_SCOPES: &str = "https://www.googleapis.com/auth/devstorage.read_only,\
https://www.googleapis.com/auth/logging.write,\
https://www.googleapis.com/auth/monitoring.write,\
https://www.googleapis.com/auth/trace.append";

/// Google Compute Engine driver configuration derived from environment
/// variables, configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BUILDVM_GOOGLE",
    discovery(
        app_name = "buildvm",
        env_var = "BUILDVM_CONFIG_PATH",
        config_file_name = "buildvm.toml",
        dotfile_name = ".buildvm.toml",
        project_file_name = "buildvm.toml"
    )
)]
pub struct GoogleConfig {
    /// Project that owns the VMs. This value is required.
    pub project_id: String,
    /// Path to a service-account JSON key. When absent the driver falls back
    /// to a static token or the metadata server.
    pub json_path: Option<String>,
    /// Pre-minted OAuth access token, mainly for local use.
    pub access_token: Option<String>,
    /// Workspace root on the VM.
    #[ortho_config(default = "/tmp/buildvm".to_owned())]
    pub root_dir: String,
    /// Comma-separated candidate zones; one is picked at random per VM.
    #[ortho_config(default = "us-central1-a".to_owned())]
    pub zones: String,
    /// Machine type.
    #[ortho_config(default = "n1-standard-1".to_owned())]
    pub size: String,
    /// Boot image, relative to `projects/`.
    #[ortho_config(default = "ubuntu-os-cloud/global/images/ubuntu-2004-focal-v20220204".to_owned())]
    pub image: String,
    /// Boot disk size in gigabytes.
    #[ortho_config(default = 50)]
    pub disk_size: i64,
    /// Boot disk type.
    #[ortho_config(default = "pd-balanced".to_owned())]
    pub disk_type: String,
    /// VPC network name; empty uses the project default.
    #[ortho_config(default = String::new())]
    pub network: String,
    /// Subnetwork name; empty uses the network default.
    #[ortho_config(default = String::new())]
    pub subnetwork: String,
    /// Address VMs by their private interface and never request a public one.
    #[ortho_config(default = false)]
    pub private_ip: bool,
    /// Skip attaching a service account to new VMs.
    #[ortho_config(default = false)]
    pub no_service_account: bool,
    /// Service account email attached to new VMs.
    #[ortho_config(default = "default".to_owned())]
    pub service_account_email: String,
    /// Comma-separated OAuth scopes for the attached service account.
    #[ortho_config(default = DEFAULT_SCOPES.to_owned())]
    pub scopes: String,
    /// Comma-separated network tags.
    #[ortho_config(default = DEFAULT_TAGS.to_owned())]
    pub tags: String,
    /// Metadata key the bootstrap payload is stored under.
    #[ortho_config(default = "user-data".to_owned())]
    pub user_data_key: String,
    /// Inline user-data replacing the generated bootstrap payload.
    pub user_data: Option<String>,
    /// File holding user-data replacing the generated bootstrap payload.
    pub user_data_file: Option<String>,
    /// Public key authorised on new VMs.
    pub public_key: Option<String>,
    /// File holding the public key authorised on new VMs.
    pub public_key_file: Option<String>,
    /// Base URL the build agent is downloaded from.
    pub agent_url: Option<String>,
    /// Local folder holding the TLS material embedded into new VMs.
    pub cert_folder: Option<String>,
    /// Upper bound on waiting for a provider operation; zero waits forever.
    #[ortho_config(default = 0)]
    pub operation_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl GoogleConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add top-level `{}` to buildvm.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Creates a configuration for `project_id` with every other field at
    /// its default.
    #[must_use]
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            json_path: None,
            access_token: None,
            root_dir: String::from("/tmp/buildvm"),
            zones: String::from("us-central1-a"),
            size: String::from("n1-standard-1"),
            image: String::from("ubuntu-os-cloud/global/images/ubuntu-2004-focal-v20220204"),
            disk_size: 50,
            disk_type: String::from("pd-balanced"),
            network: String::new(),
            subnetwork: String::new(),
            private_ip: false,
            no_service_account: false,
            service_account_email: String::from("default"),
            scopes: DEFAULT_SCOPES.to_owned(),
            tags: DEFAULT_TAGS.to_owned(),
            user_data_key: String::from("user-data"),
            user_data: None,
            user_data_file: None,
            public_key: None,
            public_key_file: None,
            agent_url: None,
            cert_folder: None,
            operation_timeout_secs: 0,
        }
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("buildvm")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// or [`ConfigError::Invalid`] when a numeric field is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.project_id,
            &FieldMetadata::new("Google project ID", "BUILDVM_GOOGLE_PROJECT_ID", "project_id"),
        )?;
        if self.zone_list().is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "missing candidate zones: set BUILDVM_GOOGLE_ZONES or add top-level `zones` to buildvm.toml",
            )));
        }
        Self::require_field(
            &self.size,
            &FieldMetadata::new("machine type", "BUILDVM_GOOGLE_SIZE", "size"),
        )?;
        Self::require_field(
            &self.image,
            &FieldMetadata::new("boot image", "BUILDVM_GOOGLE_IMAGE", "image"),
        )?;
        Self::require_field(
            &self.disk_type,
            &FieldMetadata::new("disk type", "BUILDVM_GOOGLE_DISK_TYPE", "disk_type"),
        )?;
        Self::require_field(
            &self.user_data_key,
            &FieldMetadata::new(
                "user-data metadata key",
                "BUILDVM_GOOGLE_USER_DATA_KEY",
                "user_data_key",
            ),
        )?;
        if self.disk_size <= 0 {
            return Err(ConfigError::Invalid(String::from(
                "disk_size must be a positive number of gigabytes",
            )));
        }
        Ok(())
    }

    /// Candidate zones, trimmed, with blanks dropped.
    #[must_use]
    pub fn zone_list(&self) -> Vec<String> {
        split_list(&self.zones)
    }

    /// Network tags, trimmed, with blanks dropped.
    #[must_use]
    pub fn tag_list(&self) -> Vec<String> {
        split_list(&self.tags)
    }

    /// Service account scopes, trimmed, with blanks dropped.
    #[must_use]
    pub fn scope_list(&self) -> Vec<String> {
        split_list(&self.scopes)
    }

    /// Maximum time to wait on a provider operation, if bounded.
    #[must_use]
    pub const fn operation_timeout(&self) -> Option<Duration> {
        if self.operation_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.operation_timeout_secs))
        }
    }

    /// Resolves the custom user-data override, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UserData`] when both sources are set or the
    /// file cannot be read.
    pub fn custom_user_data(&self) -> Result<Option<String>, ConfigError> {
        resolve_user_data(self.user_data.as_deref(), self.user_data_file.as_deref())
            .map_err(|err| ConfigError::UserData(err.to_string()))
    }

    /// Assembles the inputs for the generated bootstrap payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UserData`] when the public key file cannot be
    /// read, or [`ConfigError::Invalid`] when both key sources are set.
    pub fn bootstrap_params(&self) -> Result<BootstrapParams, ConfigError> {
        let public_key = match (self.public_key.as_deref(), self.public_key_file.as_deref()) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(String::from(
                    "public_key and public_key_file are mutually exclusive",
                )));
            }
            (Some(inline), None) => inline.trim().to_owned(),
            (None, Some(path)) => {
                let expanded = expand_tilde(path);
                read_to_string_ambient(Utf8Path::new(&expanded))
                    .map_err(|message| {
                        ConfigError::UserData(format!(
                            "failed to read public key `{expanded}`: {message}"
                        ))
                    })?
                    .trim()
                    .to_owned()
            }
            (None, None) => String::new(),
        };

        Ok(BootstrapParams {
            public_key,
            agent_url: non_blank(self.agent_url.as_deref()),
            cert_folder: non_blank(self.cert_folder.as_deref())
                .map(|folder| Utf8PathBuf::from(expand_tilde(&folder))),
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces failures resolving user-data or key material.
    #[error("bootstrap configuration error: {0}")]
    UserData(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_validate() {
        let config = GoogleConfig::for_project("proj");
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.tag_list(), vec![String::from("allow-docker")]);
        assert_eq!(config.scope_list().len(), 4);
        assert_eq!(config.operation_timeout(), None);
    }

    #[rstest]
    #[case("us-central1-a, us-central1-b ,,", &["us-central1-a", "us-central1-b"])]
    #[case(" europe-west1-b ", &["europe-west1-b"])]
    fn zone_list_trims_and_drops_blanks(#[case] raw: &str, #[case] expected: &[&str]) {
        let config = GoogleConfig {
            zones: raw.to_owned(),
            ..GoogleConfig::for_project("proj")
        };
        assert_eq!(config.zone_list(), expected);
    }

    #[test]
    fn validate_reports_env_var_for_missing_project() {
        let err = GoogleConfig::for_project(" ")
            .validate()
            .expect_err("blank project should fail");
        assert!(err.to_string().contains("BUILDVM_GOOGLE_PROJECT_ID"));
    }

    #[test]
    fn validate_requires_a_zone() {
        let config = GoogleConfig {
            zones: String::from(" , "),
            ..GoogleConfig::for_project("proj")
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn validate_rejects_non_positive_disk() {
        let config = GoogleConfig {
            disk_size: 0,
            ..GoogleConfig::for_project("proj")
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bootstrap_params_reject_two_key_sources() {
        let config = GoogleConfig {
            public_key: Some(String::from("ssh-ed25519 AAAA")),
            public_key_file: Some(String::from("/tmp/id.pub")),
            ..GoogleConfig::for_project("proj")
        };
        assert!(matches!(
            config.bootstrap_params(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn bootstrap_params_drop_blank_optionals() {
        let config = GoogleConfig {
            public_key: Some(String::from(" ssh-ed25519 AAAA \n")),
            agent_url: Some(String::from("  ")),
            cert_folder: Some(String::from("/etc/buildvm/certs")),
            ..GoogleConfig::for_project("proj")
        };
        let params = config.bootstrap_params().expect("params");
        assert_eq!(params.public_key, "ssh-ed25519 AAAA");
        assert_eq!(params.agent_url, None);
        assert_eq!(
            params.cert_folder,
            Some(Utf8PathBuf::from("/etc/buildvm/certs"))
        );
    }

    #[test]
    fn operation_timeout_is_bounded_when_set() {
        let config = GoogleConfig {
            operation_timeout_secs: 90,
            ..GoogleConfig::for_project("proj")
        };
        assert_eq!(config.operation_timeout(), Some(Duration::from_secs(90)));
    }
}
