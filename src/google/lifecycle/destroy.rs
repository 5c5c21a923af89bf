//! Batch deletion of instances.

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::driver::DriverKind;

use super::super::{GoogleDriver, GoogleDriverError};
use super::or_cancelled;

impl GoogleDriver {
    /// Deletes every listed instance concurrently. Individual failures are
    /// logged and never abort the rest of the batch; cancellation stops every
    /// pending call and is reported to the caller.
    pub(in crate::google) async fn destroy_instances(
        &self,
        instance_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), GoogleDriverError> {
        if instance_ids.is_empty() {
            return Err(GoogleDriverError::NoInstanceIds);
        }
        if cancel.is_cancelled() {
            return Err(GoogleDriverError::Cancelled);
        }

        let outcomes = join_all(instance_ids.iter().map(|id| {
            let span = tracing::info_span!("destroy", cloud = %DriverKind::Google, id = %id);
            self.destroy_one(id, cancel).instrument(span)
        }))
        .await;
        if outcomes
            .iter()
            .any(|outcome| matches!(outcome, Err(GoogleDriverError::Cancelled)))
        {
            return Err(GoogleDriverError::Cancelled);
        }

        let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();
        tracing::debug!(
            requested = instance_ids.len(),
            failed,
            "destroy batch finished"
        );
        Ok(())
    }

    async fn destroy_one(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), GoogleDriverError> {
        let zone = self
            .find_instance_zone(instance_id, cancel)
            .await
            .inspect_err(|err| tracing::error!(error = %err, "cannot delete instance"))?;

        tracing::debug!(zone = %zone, "deleting instance");
        let deleted = or_cancelled(
            cancel,
            self.api
                .delete_instance(&self.settings.project_id, &zone, instance_id),
        )
        .await?;
        match deleted {
            Ok(_) => {
                tracing::info!(zone = %zone, "instance deletion submitted");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                tracing::warn!(zone = %zone, "instance already gone");
                Ok(())
            }
            Err(err) => {
                tracing::error!(zone = %zone, error = %err, "failed to delete instance");
                Err(err.into())
            }
        }
    }

    /// Probes every configured zone for `instance_id`. Not-found answers move
    /// on to the next zone; other failures are logged and also skipped.
    pub(in crate::google) async fn find_instance_zone(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String, GoogleDriverError> {
        for zone in &self.settings.zones {
            let found = or_cancelled(
                cancel,
                self.api
                    .get_instance(&self.settings.project_id, zone, instance_id),
            )
            .await?;
            match found {
                Ok(_) => return Ok(zone.clone()),
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    tracing::error!(zone = %zone, error = %err, "failed to look up instance");
                }
            }
        }
        Err(GoogleDriverError::InstanceNotFound {
            instance_id: instance_id.to_owned(),
        })
    }
}
