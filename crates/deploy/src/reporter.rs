//! Reporting deployment outcomes.

use std::path::Path;

use alloy_core::primitives::Address;
use anyhow::Context;
use comfy_table::{Table, presets::UTF8_FULL};
use serde::{Deserialize, Serialize};

use crate::{DeployError, DeploymentPlan, DeploymentResult, ExecutionError, NetworkProfile};

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// The step that failed, `None` if no step was attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub error: String,
}

/// Everything known about one run of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub plan: String,
    /// SHA-256 of the plan, to tell which revision of a plan produced the report.
    pub plan_hash: String,
    pub deployer: Address,
    /// Unix timestamps, in seconds.
    pub started_at: i64,
    pub finished_at: i64,
    /// Confirmed deployments, in plan order. Kept on failure: they are on chain.
    pub results: Vec<DeploymentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

impl DeploymentReport {
    /// Build a report from the outcome of [`crate::Executor::execute`].
    pub fn new(
        plan: &DeploymentPlan,
        network: &NetworkProfile,
        chain_id: Option<u64>,
        deployer: Address,
        started_at: i64,
        outcome: Result<Vec<DeploymentResult>, ExecutionError>,
    ) -> Result<Self, DeployError> {
        let (results, failure) = match outcome {
            Ok(results) => (results, None),
            Err(err) => {
                let failure = FailureReport {
                    step: err.step.clone(),
                    error: err.source.to_string(),
                };
                (err.completed, Some(failure))
            }
        };

        Ok(Self {
            network: network.name.clone(),
            chain_id: chain_id.or(network.chain_id),
            plan: plan.display_name().to_string(),
            plan_hash: plan.hash()?,
            deployer,
            started_at,
            finished_at: chrono::Utc::now().timestamp(),
            results,
            failure,
        })
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Emit one log line per deployment, then the outcome.
    pub fn log(&self) {
        for result in &self.results {
            tracing::info!(
                step = %result.step,
                contract = %result.contract,
                address = %result.address,
                tx_hash = %result.tx_hash,
                "Deployed"
            );
        }

        match &self.failure {
            None => tracing::info!(
                plan = %self.plan,
                network = %self.network,
                deployments = self.results.len(),
                "Deployment completed"
            ),
            Some(failure) => tracing::error!(
                plan = %self.plan,
                network = %self.network,
                step = ?failure.step,
                deployments = self.results.len(),
                error = %failure.error,
                "Deployment failed"
            ),
        }
    }

    /// A summary table of the deployments.
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_header(vec!["Step", "Contract", "Address", "Transaction", "Block"]);

        for result in &self.results {
            table.add_row(vec![
                result.step.clone(),
                result.contract.clone(),
                result.address.to_string(),
                result.tx_hash.to_string(),
                result
                    .block_number
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]);
        }

        table
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment report")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;

        tracing::info!(path = %path.display(), "Report saved");
        Ok(())
    }
}
