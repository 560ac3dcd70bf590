//! [`ChainClient`] backed by an alloy JSON-RPC provider.

use std::time::Duration;

use alloy_core::primitives::{Address, TxHash, U256};
use alloy_network::TransactionBuilder;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{TransactionReceipt, TransactionRequest};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::{
    ChainClient, Credential, DeployError, DeployReceipt, DeployRequest, TxSettings,
    network::redact_url,
};

/// Deploys contracts over HTTP JSON-RPC, signing locally (or on a Ledger).
pub struct EvmChainClient {
    network: String,
    /// The full endpoint, used only to scrub it from error messages.
    rpc_url: SecretString,
    /// The endpoint as it may be logged.
    endpoint: String,
    provider: DynProvider,
    sender: Address,
    confirmations: u64,
    timeout: Duration,
}

impl std::fmt::Debug for EvmChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmChainClient")
            .field("network", &self.network)
            .field("endpoint", &self.endpoint)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

impl EvmChainClient {
    /// Build a client for `rpc_url` that signs with `credential`. Does not
    /// contact the endpoint.
    pub fn new(
        network: &str,
        rpc_url: SecretString,
        credential: Credential,
        settings: &TxSettings,
    ) -> Result<Self, DeployError> {
        let endpoint = redact_url(rpc_url.expose_secret());
        let url = Url::parse(rpc_url.expose_secret()).map_err(|e| {
            DeployError::Config(format!("network `{network}` has an invalid rpc_url ({endpoint}): {e}"))
        })?;

        let provider = ProviderBuilder::new()
            .wallet(credential.wallet)
            .connect_http(url);

        Ok(Self::with_provider(
            network,
            rpc_url,
            DynProvider::new(provider),
            credential.address,
            settings,
        ))
    }

    /// Wrap an already connected provider that signs for `sender`.
    pub(crate) fn with_provider(
        network: &str,
        rpc_url: SecretString,
        provider: DynProvider,
        sender: Address,
        settings: &TxSettings,
    ) -> Self {
        Self {
            network: network.to_string(),
            endpoint: redact_url(rpc_url.expose_secret()),
            rpc_url,
            provider,
            sender,
            confirmations: settings.confirmations,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    /// Remove the full endpoint URL (which may hold an API key) from `message`.
    fn scrub(&self, message: impl ToString) -> String {
        let message = message.to_string();
        let url = self.rpc_url.expose_secret();
        let trimmed = url.trim_end_matches('/');
        message.replace(url, &self.endpoint).replace(trimmed, &self.endpoint)
    }

    fn unreachable(&self, reason: impl ToString) -> DeployError {
        DeployError::NetworkUnreachable {
            network: self.network.clone(),
            endpoint: self.endpoint.clone(),
            reason: self.scrub(reason),
        }
    }

    /// Map a node error to the most specific variant its message allows.
    fn classify(&self, contract: &str, err: impl ToString) -> DeployError {
        let reason = self.scrub(err);
        let lower = reason.to_lowercase();

        if lower.contains("insufficient funds") {
            DeployError::InsufficientFunds {
                contract: contract.to_string(),
                account: self.sender,
                reason,
            }
        } else if lower.contains("revert") {
            DeployError::DeploymentReverted {
                contract: contract.to_string(),
                tx_hash: None,
                reason,
            }
        } else if lower.contains("error sending request") || lower.contains("connection refused") {
            DeployError::NetworkUnreachable {
                network: self.network.clone(),
                endpoint: self.endpoint.clone(),
                reason,
            }
        } else {
            DeployError::Rpc {
                contract: contract.to_string(),
                reason,
            }
        }
    }
}

impl ChainClient for EvmChainClient {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn chain_id(&self) -> Result<u64, DeployError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| self.unreachable(e))
    }

    async fn deploy_contract(&self, request: DeployRequest) -> Result<DeployReceipt, DeployError> {
        let contract = request.contract.as_str();

        let tx = TransactionRequest::default()
            .with_from(self.sender)
            .with_deploy_code(request.code)
            .with_value(request.value);

        // A constructor that reverts fails estimation, before anything is sent.
        let gas = self
            .provider
            .estimate_gas(tx.clone())
            .await
            .map_err(|e| self.classify(contract, e))?;
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| self.classify(contract, e))?;
        let balance = self
            .provider
            .get_balance(self.sender)
            .await
            .map_err(|e| self.classify(contract, e))?;

        let required = request.value + U256::from(gas) * U256::from(gas_price);
        if balance < required {
            return Err(DeployError::shortfall(contract, self.sender, required, balance));
        }

        tracing::debug!(contract, gas, gas_price, %balance, "Sending deployment transaction");

        let pending = self
            .provider
            .send_transaction(tx.with_gas_limit(gas))
            .await
            .map_err(|e| self.classify(contract, e))?;
        let tx_hash = *pending.tx_hash();

        tracing::debug!(contract, %tx_hash, confirmations = self.confirmations, "Waiting for confirmation");

        let receipt = pending
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(self.timeout))
            .get_receipt()
            .await
            .map_err(|e| DeployError::Rpc {
                contract: contract.to_string(),
                reason: self.scrub(format!("failed waiting for {tx_hash}: {e}")),
            })?;

        deploy_receipt(contract, tx_hash, &receipt)
    }
}

/// Turn the mined receipt of a deployment into its outcome.
fn deploy_receipt(
    contract: &str,
    tx_hash: TxHash,
    receipt: &TransactionReceipt,
) -> Result<DeployReceipt, DeployError> {
    if !receipt.status() {
        return Err(DeployError::DeploymentReverted {
            contract: contract.to_string(),
            tx_hash: Some(tx_hash),
            reason: "transaction failed on chain".to_string(),
        });
    }

    let address = receipt.contract_address.ok_or_else(|| DeployError::Rpc {
        contract: contract.to_string(),
        reason: format!("receipt of {tx_hash} has no contract address"),
    })?;

    Ok(DeployReceipt {
        address,
        tx_hash,
        block_number: receipt.block_number,
        gas_used: Some(receipt.gas_used),
    })
}
