//! Health check against the Compute Engine API.

use tokio_util::sync::CancellationToken;

use super::super::{GoogleDriver, GoogleDriverError};
use super::or_cancelled;

impl GoogleDriver {
    /// Lists one region of the project and expects HTTP 200.
    pub(in crate::google) async fn check_api(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), GoogleDriverError> {
        let status = or_cancelled(cancel, self.api.list_regions(&self.settings.project_id)).await??;
        if status == 200 {
            Ok(())
        } else {
            tracing::warn!(status, "compute API health check failed");
            Err(GoogleDriverError::PingFailed { status })
        }
    }
}
