//! Bootstrap payload rendering for new build VMs.
//!
//! The payload is injected into instance metadata and executed on first boot.
//! Linux guests receive a `#cloud-config` document, Windows guests a
//! `<powershell>` script. When an agent download URL is configured the script
//! installs and starts the build agent; when a certificate folder is
//! configured the three TLS files are embedded base64-encoded.
//!
//! Operators may replace the generated payload entirely with their own
//! user-data, provided either inline or via a file.

mod templates;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::driver::{InstanceCreateOpts, Os};
use crate::util::{expand_tilde, read_to_string_ambient};

pub use templates::{CERTIFICATE_FILES, linux, windows};

/// Errors raised while resolving or rendering user-data.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CloudInitError {
    /// Raised when both inline and file sources are provided.
    #[error("user-data cannot be provided both inline and via file")]
    BothProvided,
    /// Raised when an inline payload is empty or only whitespace.
    #[error("user-data must not be empty")]
    InlineEmpty,
    /// Raised when a file path is empty or only whitespace.
    #[error("user-data file path must not be empty")]
    FilePathEmpty,
    /// Raised when a file resolves to empty or only whitespace.
    #[error("user-data file must not be empty")]
    FileEmpty,
    /// Raised when reading the file source fails.
    #[error("failed to read user-data file `{path}`: {message}")]
    FileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when a certificate cannot be read from the source folder.
    #[error("failed to read certificate `{path}`: {message}")]
    CertificateRead {
        /// Certificate path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Inputs for the generated bootstrap payload.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BootstrapParams {
    /// Public key authorised for the administrative user.
    pub public_key: String,
    /// Base URL the agent binary is downloaded from. `None` installs docker
    /// instead of the agent.
    pub agent_url: Option<String>,
    /// Local folder holding `ca-cert.pem`, `server-cert.pem` and
    /// `server-key.pem`.
    pub cert_folder: Option<Utf8PathBuf>,
}

/// Produces the opaque user-data string for a creation request.
pub trait UserDataRenderer: Send + Sync {
    /// Renders the payload for `opts`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudInitError`] when an input file cannot be read.
    fn render(&self, opts: &InstanceCreateOpts) -> Result<String, CloudInitError>;
}

/// Default renderer: a custom payload when configured, otherwise the
/// generated script for the requested platform.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CloudInitRenderer {
    params: BootstrapParams,
    custom: Option<String>,
}

impl CloudInitRenderer {
    /// Creates a renderer for generated payloads.
    #[must_use]
    pub const fn new(params: BootstrapParams) -> Self {
        Self {
            params,
            custom: None,
        }
    }

    /// Replaces generated payloads with `payload` verbatim.
    #[must_use]
    pub fn with_custom(mut self, payload: Option<String>) -> Self {
        self.custom = payload;
        self
    }
}

impl UserDataRenderer for CloudInitRenderer {
    fn render(&self, opts: &InstanceCreateOpts) -> Result<String, CloudInitError> {
        if let Some(payload) = &self.custom {
            return Ok(payload.clone());
        }
        let payload = match opts.platform.os {
            Os::Linux => linux(&self.params)?,
            Os::Windows => windows(&self.params)?,
        };
        tracing::debug!(os = ?opts.platform.os, bytes = payload.len(), "rendered bootstrap payload");
        Ok(payload)
    }
}

/// Resolves custom user-data from either an inline value or a file.
///
/// Inline and file sources are mutually exclusive. Both values are trimmed for
/// emptiness checks, but the returned payload preserves the original content.
///
/// # Errors
///
/// Returns [`CloudInitError`] when the inputs are invalid or the file cannot be
/// read.
pub fn resolve_user_data(
    inline: Option<&str>,
    file: Option<&str>,
) -> Result<Option<String>, CloudInitError> {
    if inline.is_some() && file.is_some() {
        return Err(CloudInitError::BothProvided);
    }

    if let Some(payload) = inline {
        validate_payload(payload)?;
        return Ok(Some(payload.to_owned()));
    }

    let Some(path) = file else {
        return Ok(None);
    };

    if path.trim().is_empty() {
        return Err(CloudInitError::FilePathEmpty);
    }

    let expanded = expand_tilde(path);
    let content = read_to_string_ambient(Utf8Path::new(&expanded)).map_err(|message| {
        CloudInitError::FileRead {
            path: expanded.clone(),
            message,
        }
    })?;

    validate_payload(&content).map_err(|err| match err {
        CloudInitError::InlineEmpty => CloudInitError::FileEmpty,
        other => other,
    })?;

    Ok(Some(content))
}

fn validate_payload(payload: &str) -> Result<(), CloudInitError> {
    if payload.trim().is_empty() {
        return Err(CloudInitError::InlineEmpty);
    }
    Ok(())
}
