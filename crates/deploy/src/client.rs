//! The seam between the executor and a chain.

use std::future::Future;

use alloy_core::primitives::{Address, Bytes, TxHash, U256};

use crate::DeployError;

/// A contract creation transaction to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    /// Contract name, for errors and logs.
    pub contract: String,
    /// Creation bytecode with the encoded constructor arguments appended.
    pub code: Bytes,
    /// Value sent to the constructor.
    pub value: U256,
}

/// The outcome of a confirmed contract creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployReceipt {
    pub address: Address,
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// A connection to one network, bound to one deploying account.
pub trait ChainClient: Send + Sync {
    /// The account deployments are sent from.
    fn sender(&self) -> Address;

    /// Query the chain id. Fails with [`DeployError::NetworkUnreachable`] if the
    /// endpoint does not answer.
    fn chain_id(&self) -> impl Future<Output = Result<u64, DeployError>> + Send;

    /// Submit a contract creation and wait until it is confirmed.
    fn deploy_contract(
        &self,
        request: DeployRequest,
    ) -> impl Future<Output = Result<DeployReceipt, DeployError>> + Send;
}

impl<C: ChainClient> ChainClient for &C {
    fn sender(&self) -> Address {
        (**self).sender()
    }

    fn chain_id(&self) -> impl Future<Output = Result<u64, DeployError>> + Send {
        (**self).chain_id()
    }

    fn deploy_contract(
        &self,
        request: DeployRequest,
    ) -> impl Future<Output = Result<DeployReceipt, DeployError>> + Send {
        (**self).deploy_contract(request)
    }
}
