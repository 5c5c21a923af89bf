//! Metadata tagging with fingerprint-conflict retries.

use std::collections::BTreeMap;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::driver::Instance;

use super::super::types::{Metadata, MetadataItem};
use super::super::{GoogleDriver, GoogleDriverError};
use super::or_cancelled;

impl GoogleDriver {
    /// Merges `tags` into the instance metadata, retrying on failure. Each
    /// attempt re-reads the metadata so a stale fingerprint is refreshed.
    pub(in crate::google) async fn set_instance_tags(
        &self,
        instance: &Instance,
        tags: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<(), GoogleDriverError> {
        let mut attempt = 0;
        loop {
            match self.write_tags(instance, tags, cancel).await {
                Ok(()) => return Ok(()),
                Err(GoogleDriverError::Cancelled) => return Err(GoogleDriverError::Cancelled),
                Err(err) => {
                    let Some(delay) = self.tag_retry.delay_after(attempt) else {
                        tracing::error!(
                            id = %instance.id,
                            attempts = attempt + 1,
                            error = %err,
                            "giving up on setting instance tags"
                        );
                        return Err(err);
                    };
                    tracing::warn!(
                        id = %instance.id,
                        attempt = attempt + 1,
                        error = %err,
                        "failed to set instance tags, retrying"
                    );
                    or_cancelled(cancel, sleep(delay)).await?;
                    attempt += 1;
                }
            }
        }
    }

    async fn write_tags(
        &self,
        instance: &Instance,
        tags: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<(), GoogleDriverError> {
        let project = &self.settings.project_id;
        let vm = or_cancelled(
            cancel,
            self.api.get_instance(project, &instance.zone, &instance.id),
        )
        .await??;
        let metadata = merge_metadata(vm.metadata.unwrap_or_default(), tags);
        or_cancelled(
            cancel,
            self.api
                .set_metadata(project, &instance.zone, &instance.id, &metadata),
        )
        .await??;
        Ok(())
    }
}

/// Overwrites existing keys and appends new ones, keeping the fingerprint.
pub(in crate::google) fn merge_metadata(
    mut current: Metadata,
    tags: &BTreeMap<String, String>,
) -> Metadata {
    for (key, value) in tags {
        if let Some(item) = current.items.iter_mut().find(|item| &item.key == key) {
            item.value = Some(value.clone());
        } else {
            current.items.push(MetadataItem {
                key: key.clone(),
                value: Some(value.clone()),
            });
        }
    }
    current
}
