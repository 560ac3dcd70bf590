//! Command builder for Anvil.

use std::path::Path;

/// Builder for Anvil commands.
#[derive(Clone)]
pub struct AnvilCmdBuilder {
    host: String,
    port: u16,
    chain_id: Option<u64>,
    block_time: Option<u64>,
    fork_url: Option<String>,
    config_out: Option<String>,
    fork_block_number: Option<u64>,
}

impl AnvilCmdBuilder {
    pub fn new() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8545,
            chain_id: None,
            block_time: None,
            fork_url: None,
            config_out: None,
            fork_block_number: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the chain id. By default Anvil reuses the forked chain's id.
    pub fn chain_id(mut self, chain_id: Option<u64>) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Mine a block every `block_time` seconds instead of on each transaction.
    pub fn block_time(mut self, block_time: Option<u64>) -> Self {
        self.block_time = block_time;
        self
    }

    pub fn fork_url(mut self, url: impl Into<String>) -> Self {
        self.fork_url = Some(url.into());
        self
    }

    pub fn fork_block_number(mut self, block_number: Option<u64>) -> Self {
        self.fork_block_number = block_number;
        self
    }

    /// Where Anvil writes its accounts and keys on startup.
    pub fn config_out(mut self, path: impl AsRef<Path>) -> Self {
        self.config_out = Some(path.as_ref().display().to_string());
        self
    }

    /// Build the command as a vector of strings.
    pub fn build(self) -> Vec<String> {
        let mut cmd = vec![
            "--host".to_string(),
            self.host,
            "--port".to_string(),
            self.port.to_string(),
        ];

        if let Some(chain_id) = self.chain_id {
            cmd.push("--chain-id".to_string());
            cmd.push(chain_id.to_string());
        }

        if let Some(block_time) = self.block_time {
            cmd.push("--block-time".to_string());
            cmd.push(block_time.to_string());
        }

        if let Some(fork_url) = self.fork_url {
            cmd.push("--fork-url".to_string());
            cmd.push(fork_url);
        }

        if let Some(fork_block_number) = self.fork_block_number {
            cmd.push("--fork-block-number".to_string());
            cmd.push(fork_block_number.to_string());
        }

        if let Some(config_out) = self.config_out {
            cmd.push("--config-out".to_string());
            cmd.push(config_out);
        }

        cmd
    }
}

impl Default for AnvilCmdBuilder {
    fn default() -> Self {
        Self::new()
    }
}
