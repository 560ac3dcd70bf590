//! Error types surfaced by planning, pre-flight checks and deployment.

use std::fmt;

use alloy_core::primitives::{Address, TxHash, U256};

use crate::DeploymentResult;

/// Errors that can occur while preparing or executing a deployment.
///
/// None of these are retried automatically: the operator fixes the cause and
/// re-runs the plan.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// The network endpoint could not be reached.
    #[error("network `{network}` is unreachable at {endpoint}: {reason}")]
    NetworkUnreachable {
        network: String,
        /// Redacted endpoint (scheme and host only).
        endpoint: String,
        reason: String,
    },

    /// The sending account cannot cover value + gas.
    #[error("insufficient funds in {account} to deploy `{contract}`: {reason}")]
    InsufficientFunds {
        contract: String,
        account: Address,
        reason: String,
    },

    /// The constructor arguments do not match the contract ABI.
    #[error("constructor arguments for `{contract}` do not match its ABI: {reason}")]
    ConstructorArgument { contract: String, reason: String },

    /// A step references a step that is not defined earlier in the plan.
    #[error("step `{step}` references `{target}`, which is not an earlier step of the plan")]
    UnresolvedReference { step: String, target: String },

    /// The contract's constructor rejected the deployment.
    #[error("deployment of `{contract}` reverted{}: {reason}", .tx_hash.as_ref().map(|h| format!(" in {h}")).unwrap_or_default())]
    DeploymentReverted {
        contract: String,
        tx_hash: Option<TxHash>,
        reason: String,
    },

    /// The plan is malformed (duplicate ids, empty, bad values...).
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// A contract artifact could not be found or parsed.
    #[error("artifact for `{contract}`: {reason}")]
    Artifact { contract: String, reason: String },

    /// A credential source could not be resolved.
    #[error("credentials for network `{network}`: {reason}")]
    Credentials { network: String, reason: String },

    /// The endpoint serves a different chain than the profile declares.
    #[error("network `{network}` expects chain id {expected} but the endpoint reports {actual}")]
    ChainIdMismatch {
        network: String,
        expected: u64,
        actual: u64,
    },

    /// No profile with the requested name exists.
    #[error("unknown network `{0}`")]
    UnknownNetwork(String),

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An RPC request failed for a reason that has no dedicated variant.
    #[error("rpc error while deploying `{contract}`: {reason}")]
    Rpc { contract: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    /// Build an [`DeployError::InsufficientFunds`] from a balance shortfall.
    pub fn shortfall(contract: &str, account: Address, required: U256, available: U256) -> Self {
        Self::InsufficientFunds {
            contract: contract.to_string(),
            account,
            reason: format!("required {required} wei, available {available} wei"),
        }
    }
}

/// Failure of [`crate::Executor::execute`].
///
/// Carries every result produced before the failure so they can still be
/// reported: already-confirmed deployments stay valid on chain.
#[derive(Debug)]
pub struct ExecutionError {
    /// The id of the step that failed, or `None` if the run was aborted
    /// before any step was attempted.
    pub step: Option<String>,
    /// The underlying cause.
    pub source: DeployError,
    /// Results of the steps that completed before the failure.
    pub completed: Vec<DeploymentResult>,
}

impl ExecutionError {
    pub(crate) fn before_execution(source: DeployError) -> Self {
        Self {
            step: None,
            source,
            completed: Vec::new(),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some(step) => write!(
                f,
                "step `{}` failed after {} successful deployment(s): {}",
                step,
                self.completed.len(),
                self.source
            ),
            None => write!(f, "deployment aborted before any step: {}", self.source),
        }
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_names_failed_step() {
        let err = ExecutionError {
            step: Some("token".to_string()),
            source: DeployError::DeploymentReverted {
                contract: "Token".to_string(),
                tx_hash: None,
                reason: "execution reverted".to_string(),
            },
            completed: Vec::new(),
        };

        let message = err.to_string();
        assert!(message.contains("step `token` failed"));
        assert!(message.contains("deployment of `Token` reverted: execution reverted"));
    }

    #[test]
    fn test_execution_error_before_any_step() {
        let err = ExecutionError::before_execution(DeployError::UnresolvedReference {
            step: "c".to_string(),
            target: "d".to_string(),
        });

        assert!(err.step.is_none());
        assert!(err.completed.is_empty());
        assert!(err.to_string().starts_with("deployment aborted before any step"));
    }
}
