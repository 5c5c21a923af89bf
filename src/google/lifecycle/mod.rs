//! Instance lifecycle helpers for the Google driver.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::GoogleDriverError;

mod create;
mod destroy;
mod firewall;
mod ping;
mod tags;
mod wait;

pub use firewall::FirewallOutcome;

/// Name of the managed firewall rule.
pub const FIREWALL_RULE_NAME: &str = "default-allow-docker";

/// Docker daemon TLS port opened by the managed firewall rule.
pub const DOCKER_PORT: u16 = 2376;

/// Delay between operation polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Attempts made to write instance metadata.
pub const TAG_RETRY_ATTEMPTS: u32 = 3;

/// Delay between metadata write attempts.
pub const TAG_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Runs `call` unless `cancel` fires first.
pub(in crate::google) async fn or_cancelled<F: Future>(
    cancel: &CancellationToken,
    call: F,
) -> Result<F::Output, GoogleDriverError> {
    if cancel.is_cancelled() {
        return Err(GoogleDriverError::Cancelled);
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(GoogleDriverError::Cancelled),
        output = call => Ok(output),
    }
}
