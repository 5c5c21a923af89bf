//! SSH connectivity to freshly booted VMs.
//!
//! A new VM refuses connections until its SSH daemon is up, so
//! [`dial_retry`] keeps redialling on a fixed interval until a session is
//! established, the deadline passes, or the caller cancels.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::Disconnect;
use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;

/// Port appended to addresses that do not carry one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Pause between dial attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Total time allowed for retries after the first attempt fails.
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(600);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while dialling a VM.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshError {
    /// The private key could not be parsed.
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    /// The TCP connection or SSH handshake failed.
    #[error("failed to connect to {address}: {message}")]
    Connect {
        /// Address that was dialled.
        address: String,
        /// Underlying error message.
        message: String,
    },
    /// The server refused the offered key.
    #[error("public key for {user} rejected by {address}")]
    AuthenticationRejected {
        /// Login user.
        user: String,
        /// Address that was dialled.
        address: String,
    },
    /// The retry deadline passed without a successful dial.
    #[error("gave up connecting to {address} after {waited:?}")]
    Timeout {
        /// Address that was dialled.
        address: String,
        /// Retry window that elapsed.
        waited: Duration,
    },
    /// The caller cancelled the dial.
    #[error("dial cancelled")]
    Cancelled,
}

impl SshError {
    /// Returns `true` when retrying cannot help.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidKey(_) | Self::Cancelled)
    }
}

/// Where and as whom to connect.
#[derive(Clone, Eq, PartialEq)]
pub struct SshTarget {
    /// Host, optionally with `:port`.
    pub address: String,
    /// Login user.
    pub user: String,
    /// PEM or OpenSSH encoded private key.
    pub private_key: String,
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("address", &self.address)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl SshTarget {
    /// Creates a target.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        user: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            user: user.into(),
            private_key: private_key.into(),
        }
    }

    /// The address with [`DEFAULT_SSH_PORT`] appended when none is given.
    #[must_use]
    pub fn socket_address(&self) -> String {
        with_default_port(&self.address)
    }
}

/// Appends `:22` to a host that lacks a port. Bare IPv6 literals are
/// bracketed first.
#[must_use]
pub fn with_default_port(address: &str) -> String {
    if address.starts_with('[') {
        if address.contains("]:") {
            return address.to_owned();
        }
        return format!("{address}:{DEFAULT_SSH_PORT}");
    }
    match address.matches(':').count() {
        0 => format!("{address}:{DEFAULT_SSH_PORT}"),
        1 => address.to_owned(),
        _ => format!("[{address}]:{DEFAULT_SSH_PORT}"),
    }
}

/// Retry timing for [`dial_retry`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DialPolicy {
    /// Pause between attempts.
    pub retry_interval: Duration,
    /// Window for retries after the first attempt fails.
    pub deadline: Duration,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            retry_interval: RETRY_INTERVAL,
            deadline: NETWORK_TIMEOUT,
        }
    }
}

/// Future returned by [`Dialer::dial`].
pub type DialFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SshError>> + Send + 'a>>;

/// Establishes one authenticated session per call.
pub trait Dialer: Send + Sync {
    /// Session type returned on success.
    type Session: Send;

    /// Makes a single connection attempt.
    fn dial<'a>(&'a self, target: &'a SshTarget) -> DialFuture<'a, Self::Session>;
}

/// Dials `target` until it answers.
///
/// One attempt is made immediately. If it fails, further attempts follow
/// every `policy.retry_interval` until `policy.deadline` has passed. The
/// deadline is only checked between attempts; a single attempt that hangs
/// is bounded by the dialer itself.
///
/// # Errors
///
/// Returns [`SshError::Cancelled`] when `cancel` fires,
/// [`SshError::Timeout`] once the deadline passes, or the dial error itself
/// when it cannot be fixed by retrying.
pub async fn dial_retry<D: Dialer>(
    dialer: &D,
    target: &SshTarget,
    policy: DialPolicy,
    cancel: &CancellationToken,
) -> Result<D::Session, SshError> {
    if cancel.is_cancelled() {
        return Err(SshError::Cancelled);
    }
    let address = target.socket_address();
    match dialer.dial(target).await {
        Ok(session) => return Ok(session),
        Err(err) if err.is_permanent() => return Err(err),
        Err(err) => {
            tracing::debug!(address = %address, error = %err, "initial dial failed, retrying");
        }
    }

    let deadline = Instant::now() + policy.deadline;
    let mut attempt: u32 = 1;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Err(SshError::Cancelled),
            () = sleep_until(deadline) => {
                return Err(SshError::Timeout { address, waited: policy.deadline });
            }
            () = sleep(policy.retry_interval) => {}
        }

        attempt += 1;
        tracing::trace!(address = %address, attempt, "dialling vm");
        match dialer.dial(target).await {
            Ok(session) => {
                tracing::debug!(address = %address, attempt, "connected to vm");
                return Ok(session);
            }
            Err(err) if err.is_permanent() => return Err(err),
            Err(err) => {
                tracing::trace!(address = %address, attempt, error = %err, "dial failed");
            }
        }
    }
}

/// Host-key handler that accepts any key; VMs are fresh and disposable.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated SSH session.
pub struct SshSession {
    handle: Handle<AcceptAnyHostKey>,
    address: String,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl SshSession {
    /// Address the session is connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Underlying client handle for opening channels.
    #[must_use]
    pub const fn handle(&self) -> &Handle<AcceptAnyHostKey> {
        &self.handle
    }

    /// Disconnects cleanly.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Connect`] when the disconnect message cannot be
    /// sent.
    pub async fn close(self) -> Result<(), SshError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|err| SshError::Connect {
                address: self.address.clone(),
                message: err.to_string(),
            })
    }
}

/// [`Dialer`] backed by `russh` with public-key authentication.
#[derive(Clone, Copy, Debug)]
pub struct RusshDialer {
    connect_timeout: Duration,
}

impl Default for RusshDialer {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl RusshDialer {
    /// Creates a dialer with the default per-attempt timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the per-attempt timeout, which covers the handshake and
    /// authentication together.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

async fn close_quietly(handle: &Handle<AcceptAnyHostKey>) {
    if let Err(err) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::trace!(error = %err, "failed to close partial session");
    }
}

impl Dialer for RusshDialer {
    type Session = SshSession;

    fn dial<'a>(&'a self, target: &'a SshTarget) -> DialFuture<'a, Self::Session> {
        Box::pin(async move {
            let key = russh_keys::decode_secret_key(&target.private_key, None)
                .map_err(|err| SshError::InvalidKey(err.to_string()))?;
            let address = target.socket_address();
            let connect_error = |message: String| SshError::Connect {
                address: address.clone(),
                message,
            };

            // The handshake and authentication share one deadline.
            let attempt = async {
                let config = Arc::new(client::Config::default());
                let mut handle = client::connect(config, address.as_str(), AcceptAnyHostKey)
                    .await
                    .map_err(|err| connect_error(err.to_string()))?;

                let accepted = match handle
                    .authenticate_publickey(target.user.as_str(), Arc::new(key))
                    .await
                {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        close_quietly(&handle).await;
                        return Err(connect_error(err.to_string()));
                    }
                };
                if !accepted {
                    close_quietly(&handle).await;
                    return Err(SshError::AuthenticationRejected {
                        user: target.user.clone(),
                        address: address.clone(),
                    });
                }
                Ok::<_, SshError>(handle)
            };

            let handle = timeout(self.connect_timeout, attempt)
                .await
                .map_err(|_| connect_error(String::from("connection timed out")))??;
            Ok(SshSession { handle, address })
        })
    }
}
