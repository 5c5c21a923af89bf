//! Polling of long-running provider operations.

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use super::super::api::ApiError;
use super::super::types::Operation;
use super::super::{GoogleDriver, GoogleDriverError};
use super::or_cancelled;

/// Where an operation lives.
#[derive(Clone, Copy, Debug)]
pub(in crate::google) enum OperationScope<'a> {
    Zone(&'a str),
    Global,
}

impl GoogleDriver {
    async fn fetch_operation(
        &self,
        scope: OperationScope<'_>,
        name: &str,
    ) -> Result<Operation, ApiError> {
        let project = &self.settings.project_id;
        match scope {
            OperationScope::Zone(zone) => self.api.get_zone_operation(project, zone, name).await,
            OperationScope::Global => self.api.get_global_operation(project, name).await,
        }
    }

    /// Polls `name` until the provider reports it done.
    ///
    /// Returns the first error message of a failed operation, a distinct
    /// not-found error when the provider forgets the operation, a timeout
    /// only when an operation bound is configured, and
    /// [`GoogleDriverError::Cancelled`] as soon as `cancel` fires.
    pub(in crate::google) async fn wait_for_operation(
        &self,
        scope: OperationScope<'_>,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), GoogleDriverError> {
        let deadline = self.operation_timeout.map(|bound| Instant::now() + bound);
        let mut polls: u32 = 0;
        loop {
            polls += 1;
            let operation = match or_cancelled(cancel, self.fetch_operation(scope, name)).await? {
                Ok(operation) => operation,
                Err(err) if err.is_not_found() => {
                    return Err(GoogleDriverError::OperationNotFound {
                        operation: name.to_owned(),
                    });
                }
                Err(err) => return Err(err.into()),
            };

            if let Some(error) = operation.error {
                return Err(GoogleDriverError::OperationFailed {
                    operation: name.to_owned(),
                    message: error.first_message(),
                });
            }
            if operation.is_done() {
                tracing::trace!(operation = name, polls, "operation finished");
                return Ok(());
            }
            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                return Err(GoogleDriverError::OperationTimeout {
                    operation: name.to_owned(),
                });
            }
            or_cancelled(cancel, sleep(self.poll_interval))
                .await
                .inspect_err(|_| tracing::debug!(operation = name, polls, "stopped waiting"))?;
        }
    }
}
