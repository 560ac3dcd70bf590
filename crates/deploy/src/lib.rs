//! chainplan-deploy - Deployment library for compiled smart contracts.
//!
//! This crate deploys an ordered plan of contracts to a named network, wiring
//! the addresses of earlier deployments into later constructors, and reports
//! the resulting addresses and transaction hashes.

mod artifact;
mod client;
mod config;
mod credentials;
mod docker;
mod error;
mod evm;
mod executor;
mod fs;
mod network;
mod plan;
mod reporter;
mod rpc;
mod session;
pub mod services;

pub use artifact::{ArtifactStore, ContractArtifact};
pub use client::{ChainClient, DeployReceipt, DeployRequest};
pub use config::{CONFIG_FILENAME, ENV_PREFIX, ProjectConfig, TxSettings};
pub use credentials::{
    Credential, CredentialContext, CredentialSource, DevAccount, ProcessEnv, SecretSource,
    expand_placeholders,
};
pub use docker::DockerImage;
pub use error::{DeployError, ExecutionError};
pub use evm::EvmChainClient;
pub use executor::{DeploymentResult, Executor, PreparedPlan, PreparedStep};
pub use network::{Endpoint, NetworkProfile, NetworkRegistry, redact_url};
pub use plan::{Amount, ConstructorArg, DeploymentPlan, DeploymentStep, LiteralValue};
pub use reporter::{DeploymentReport, FailureReport};
pub use services::anvil::{AnvilHandler, ForkConfig};
pub use session::NetworkSession;
