//! Anvil service backing fork networks.

mod cmd;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::{Address, B256};
use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

pub use cmd::AnvilCmdBuilder;

use crate::{
    DevAccount,
    docker::{DockerImage, ForkDocker, PortMapping, ServiceConfig},
    fs::FsHandler,
    rpc,
};

/// Default host port the fork's RPC is published on.
pub const DEFAULT_HOST_PORT: u16 = 8545;

/// Default Docker image for Anvil (Foundry).
pub const DEFAULT_DOCKER_IMAGE: &str = "ghcr.io/foundry-rs/foundry";
/// Default Docker tag for Anvil (Foundry).
pub const DEFAULT_DOCKER_TAG: &str = "latest";

/// The port Anvil listens on inside the container.
pub const ANVIL_INTERNAL_PORT: u16 = 8545;

const CONFIG_FILE: &str = "anvil.json";
const CONFIG_FILE_TIMEOUT: Duration = Duration::from_secs(60);
const RPC_READY_TIMEOUT_SECS: u64 = 60;

/// A local fork of a remote chain, run by Anvil in Docker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForkConfig {
    /// The chain to fork. May contain `${VAR}` placeholders.
    pub fork_url: String,
    /// Pin the fork to a block. Defaults to the latest block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_block_number: Option<u64>,
    /// Override the chain id reported by the fork.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Host port the fork's RPC is published on.
    #[serde(default = "default_host_port")]
    pub host_port: u16,
    /// Mine a block every `block_time` seconds instead of on each transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
    #[serde(default = "default_docker_image")]
    pub docker_image: DockerImage,
}

fn default_host_port() -> u16 {
    DEFAULT_HOST_PORT
}

fn default_docker_image() -> DockerImage {
    DockerImage::new(DEFAULT_DOCKER_IMAGE, DEFAULT_DOCKER_TAG)
}

/// Handler for a running Anvil fork.
#[derive(Debug)]
pub struct AnvilHandler {
    pub container_id: String,
    pub container_name: String,
    /// RPC URL reachable from the host.
    pub rpc_url: Url,
    /// Chain id reported by the fork once it answered.
    pub chain_id: u64,
    /// Funded dev accounts, in Anvil's order.
    pub accounts: Vec<DevAccount>,
}

/// Accounts section of Anvil's `--config-out` file.
#[derive(Deserialize)]
struct AnvilConfigOut {
    available_accounts: Vec<Address>,
    private_keys: Vec<B256>,
}

fn parse_dev_accounts(contents: &str) -> anyhow::Result<Vec<DevAccount>> {
    let config: AnvilConfigOut =
        serde_json::from_str(contents).context("Failed to parse Anvil config")?;

    if config.available_accounts.len() != config.private_keys.len() {
        anyhow::bail!(
            "Anvil config lists {} accounts but {} private keys",
            config.available_accounts.len(),
            config.private_keys.len()
        );
    }

    Ok(config
        .available_accounts
        .into_iter()
        .zip(config.private_keys)
        .map(|(address, private_key)| DevAccount {
            address,
            private_key,
        })
        .collect())
}

impl ForkConfig {
    pub fn new(fork_url: impl Into<String>) -> Self {
        Self {
            fork_url: fork_url.into(),
            fork_block_number: None,
            chain_id: None,
            host_port: DEFAULT_HOST_PORT,
            block_time: None,
            docker_image: default_docker_image(),
        }
    }

    fn cmd(&self, fork_url: &SecretString, container_config_path: &Path) -> Vec<String> {
        AnvilCmdBuilder::new()
            .host("0.0.0.0")
            .port(ANVIL_INTERNAL_PORT)
            .chain_id(self.chain_id)
            .block_time(self.block_time)
            .fork_url(fork_url.expose_secret())
            .fork_block_number(self.fork_block_number)
            .config_out(container_config_path.join(CONFIG_FILE))
            .build()
    }

    /// Start an Anvil container forking `fork_url` and wait until it serves RPC.
    ///
    /// `fork_url` is the expanded form of [`ForkConfig::fork_url`].
    pub async fn start(
        &self,
        docker: &mut ForkDocker,
        container_name: &str,
        fork_url: &SecretString,
        host_config_path: &Path,
    ) -> anyhow::Result<AnvilHandler> {
        FsHandler::create_host_config_directory(host_config_path)?;

        let config_file_path = host_config_path.join(CONFIG_FILE);
        if config_file_path.exists() {
            std::fs::remove_file(&config_file_path)
                .context("Failed to remove stale Anvil config file")?;
        }

        let container_config_path = PathBuf::from("/data");

        let service_config = ServiceConfig::new(self.docker_image.clone())
            .entrypoint(vec!["anvil".to_string()])
            .cmd(self.cmd(fork_url, &container_config_path))
            .port(PortMapping::tcp(ANVIL_INTERNAL_PORT, self.host_port))
            .bind(host_config_path, &container_config_path, "rw");

        let service_handler = docker
            .start_service(container_name, service_config)
            .await
            .context("Failed to start Anvil container")?;

        tracing::debug!(
            container_id = %service_handler.container_id,
            container_name = %service_handler.container_name,
            "Anvil container started"
        );

        FsHandler::wait_for_file(&config_file_path, CONFIG_FILE_TIMEOUT)
            .await
            .context("Anvil config file was not created in time")?;

        let accounts = parse_dev_accounts(
            &tokio::fs::read_to_string(&config_file_path)
                .await
                .context(format!(
                    "Failed to read Anvil config from {}",
                    config_file_path.display()
                ))?,
        )?;

        let rpc_url = Url::parse(&format!("http://127.0.0.1:{}/", self.host_port))
            .context("Failed to parse HTTP URL")?;

        let client = rpc::create_client()?;
        let (client, url) = (&client, rpc_url.as_str());
        rpc::wait_until_ready("anvil", RPC_READY_TIMEOUT_SECS, || async move {
            rpc::chain_id(client, url).await.map(|_| ())
        })
        .await?;
        let chain_id = rpc::chain_id(client, url).await?;

        tracing::info!(
            container_name = %service_handler.container_name,
            %rpc_url,
            chain_id,
            fork_block_number = ?self.fork_block_number,
            accounts = accounts.len(),
            "Fork network ready"
        );

        Ok(AnvilHandler {
            container_id: service_handler.container_id,
            container_name: service_handler.container_name,
            rpc_url,
            chain_id,
            accounts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_config_defaults() {
        let config: ForkConfig = toml::from_str(
            r#"
                fork_url = "https://eth-mainnet.g.alchemy.com/v2/${ALCHEMY_API_KEY}"
                fork_block_number = 17342219
            "#,
        )
        .unwrap();

        assert_eq!(config.fork_block_number, Some(17342219));
        assert_eq!(config.host_port, DEFAULT_HOST_PORT);
        assert_eq!(config.docker_image.full_name(), "ghcr.io/foundry-rs/foundry:latest");
    }

    #[test]
    fn test_cmd_uses_expanded_url() {
        let config = ForkConfig::new("https://eth.example/v2/${KEY}");
        let cmd = config.cmd(
            &SecretString::from("https://eth.example/v2/abc"),
            Path::new("/data"),
        );

        assert!(cmd.contains(&"https://eth.example/v2/abc".to_string()));
        assert!(cmd.contains(&"/data/anvil.json".to_string()));
    }

    #[test]
    fn test_parse_dev_accounts() {
        let contents = r#"{
            "available_accounts": ["0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"],
            "private_keys": ["0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"],
            "wallet": {"derivation_path": "m/44'/60'/0'/0/"}
        }"#;

        let accounts = parse_dev_accounts(contents).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(
            accounts[0].address,
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_parse_dev_accounts_mismatch() {
        let contents = r#"{"available_accounts": ["0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"], "private_keys": []}"#;
        assert!(parse_dev_accounts(contents).is_err());
    }
}
