//! One-time setup of the firewall rule for docker and agent traffic.

use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_TAGS;
use crate::driver::AGENT_PORT;

use super::super::types::{Firewall, FirewallAllowed};
use super::super::{GoogleDriver, GoogleDriverError};
use super::or_cancelled;
use super::wait::OperationScope;
use super::{DOCKER_PORT, FIREWALL_RULE_NAME};

/// Result of the firewall check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FirewallOutcome {
    /// Custom tags are configured, so the rule is left to the operator.
    Skipped,
    /// The rule already exists.
    Existing,
    /// The rule was created.
    Created,
}

impl GoogleDriver {
    /// Runs [`Self::setup_firewall`] at most once per driver. Failures are
    /// logged and not retried; creation proceeds regardless. A cancelled
    /// setup does not count, so the next caller runs it again.
    pub(in crate::google) async fn ensure_firewall(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), GoogleDriverError> {
        self.firewall
            .get_or_try_init(|| async {
                match self.setup_firewall(cancel).await {
                    Ok(outcome) => {
                        tracing::debug!(?outcome, rule = FIREWALL_RULE_NAME, "firewall checked");
                        Ok(())
                    }
                    Err(GoogleDriverError::Cancelled) => Err(GoogleDriverError::Cancelled),
                    Err(err) => {
                        tracing::error!(
                            error = %err,
                            rule = FIREWALL_RULE_NAME,
                            "failed to set up the firewall rule"
                        );
                        Ok(())
                    }
                }
            })
            .await?;
        Ok(())
    }

    /// Ensures the docker/agent firewall rule exists when the default tag
    /// set is in use.
    ///
    /// # Errors
    ///
    /// Returns [`GoogleDriverError`] when creating the rule fails, or
    /// [`GoogleDriverError::Cancelled`] when `cancel` fires first.
    pub async fn setup_firewall(
        &self,
        cancel: &CancellationToken,
    ) -> Result<FirewallOutcome, GoogleDriverError> {
        if self.settings.tags != [DEFAULT_TAGS] {
            return Ok(FirewallOutcome::Skipped);
        }

        let project = &self.settings.project_id;
        tracing::debug!(rule = FIREWALL_RULE_NAME, "looking up firewall rule");
        match or_cancelled(cancel, self.api.get_firewall(project, FIREWALL_RULE_NAME)).await? {
            Ok(_) => return Ok(FirewallOutcome::Existing),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                tracing::debug!(error = %err, "firewall lookup failed, creating the rule");
            }
        }

        let rule = self.firewall_rule();
        let operation = or_cancelled(cancel, self.api.insert_firewall(project, &rule)).await??;
        self.wait_for_operation(OperationScope::Global, &operation.name, cancel)
            .await?;
        tracing::info!(rule = FIREWALL_RULE_NAME, "created firewall rule");
        Ok(FirewallOutcome::Created)
    }

    fn firewall_rule(&self) -> Firewall {
        let network = if self.settings.network.is_empty() {
            String::new()
        } else {
            format!(
                "projects/{}/global/networks/{}",
                self.settings.project_id, self.settings.network
            )
        };
        Firewall {
            name: FIREWALL_RULE_NAME.to_owned(),
            network,
            direction: String::from("INGRESS"),
            priority: 1000,
            source_ranges: vec![String::from("0.0.0.0/0")],
            target_tags: vec![DEFAULT_TAGS.to_owned()],
            allowed: vec![FirewallAllowed {
                ip_protocol: String::from("tcp"),
                ports: vec![DOCKER_PORT.to_string(), AGENT_PORT.to_string()],
            }],
        }
    }
}
