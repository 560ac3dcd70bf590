//! Project configuration (`chainplan.toml`).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{ArtifactStore, DeployError, NetworkProfile, NetworkRegistry};

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "chainplan.toml";

/// Prefix of environment variables overriding the configuration file.
/// Nested keys are separated by `__`, e.g. `CHAINPLAN_TRANSACTIONS__CONFIRMATIONS=2`.
pub const ENV_PREFIX: &str = "CHAINPLAN_";

/// Top-level keys that may be set from the environment. Other variables under
/// [`ENV_PREFIX`] (command line flags, test settings) are not configuration.
const ENV_CONFIG_KEYS: &[&str] = &["artifacts", "workdir", "default_network", "transactions", "networks"];

/// How deployment transactions are awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxSettings {
    /// Blocks to wait for, counting the one including the transaction. At least 1.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Give up waiting for a receipt after this many seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_confirmations() -> u64 {
    1
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for TxSettings {
    fn default() -> Self {
        Self {
            confirmations: default_confirmations(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// The project configuration.
///
/// Holds network endpoints and *where* credentials come from, never the
/// credentials themselves. Relative paths are resolved against [`ProjectConfig::root`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Directory relative paths are resolved against (the config file's directory).
    #[serde(skip)]
    pub root: PathBuf,
    /// Compiled artifacts (Hardhat `artifacts/` or Foundry `out/`).
    #[serde(default = "default_artifacts")]
    pub artifacts: PathBuf,
    /// Scratch directory for fork node data and reports.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Network used when none is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_network: Option<String>,
    #[serde(default)]
    pub transactions: TxSettings,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkProfile>,
}

fn default_artifacts() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".chainplan")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            artifacts: default_artifacts(),
            workdir: default_workdir(),
            default_network: None,
            transactions: TxSettings::default(),
            networks: BTreeMap::new(),
        }
    }
}

impl ProjectConfig {
    /// Load `path` merged with `CHAINPLAN_*` environment variables.
    pub fn load(path: &Path) -> Result<Self, DeployError> {
        if !path.exists() {
            return Err(DeployError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let figment = Figment::new().merge(Toml::file(path)).merge(config_env());

        let root = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let config = Self::from_figment(figment, root)?;
        tracing::debug!(
            path = %path.display(),
            networks = config.networks.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse a configuration from TOML text, without environment overrides.
    pub fn from_toml_str(contents: &str, root: &Path) -> Result<Self, DeployError> {
        Self::from_figment(Figment::from(Toml::string(contents)), root)
    }

    fn from_figment(figment: Figment, root: &Path) -> Result<Self, DeployError> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| DeployError::Config(e.to_string()))?;
        config.root = root.to_path_buf();

        if config.transactions.confirmations == 0 {
            return Err(DeployError::Config(
                "`transactions.confirmations` must be at least 1".to_string(),
            ));
        }

        // Profiles are validated eagerly so a broken entry fails at load time.
        config.registry()?;

        Ok(config)
    }

    /// The network registry described by this configuration.
    pub fn registry(&self) -> Result<NetworkRegistry, DeployError> {
        NetworkRegistry::from_map(self.networks.clone())
    }

    /// Pick the network to deploy to: `requested`, else `default_network`.
    pub fn network_name<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str, DeployError> {
        requested
            .or(self.default_network.as_deref())
            .ok_or_else(|| {
                DeployError::Config(
                    "no network given and no `default_network` configured".to_string(),
                )
            })
    }

    pub fn artifact_store(&self) -> ArtifactStore {
        ArtifactStore::new(self.root.join(&self.artifacts))
    }

    pub fn workdir(&self) -> PathBuf {
        self.root.join(&self.workdir)
    }
}

/// `CHAINPLAN_*` variables that name a configuration key, `__` separating nested keys.
fn config_env() -> Env {
    Env::prefixed(ENV_PREFIX)
        .filter(|key| is_config_key(key.as_str()))
        .split("__")
}

fn is_config_key(key: &str) -> bool {
    let top = key.split("__").next().unwrap_or_default();
    ENV_CONFIG_KEYS.iter().any(|k| k.eq_ignore_ascii_case(top))
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use tempdir::TempDir;

    use super::*;
    use crate::CredentialSource;

    const CONFIG: &str = r#"
        artifacts = "out"
        default_network = "ganache"

        [transactions]
        confirmations = 2

        [networks.sepolia]
        rpc_url = "https://sepolia.infura.io/v3/${INFURA_PROJECT_ID}"
        chain_id = 11155111
        credentials = { source = "mnemonic-env", var = "SEPOLIA_MNEMONIC" }

        [networks.ganache]
        rpc_url = "http://127.0.0.1:7545"
        credentials = { source = "private-key-env", var = "GANACHE_PRIVATE_KEY" }

        [networks.mainnet-fork]
        credentials = { source = "dev-account", index = 0 }
        fork = { fork_url = "https://eth-mainnet.g.alchemy.com/v2/${ALCHEMY_API_KEY}", fork_block_number = 17342219 }
    "#;

    // Tests reading `CHAINPLAN_*` variables run inside a `Jail`, which
    // serializes them and restores the environment afterwards.

    #[test]
    fn test_load_config_file() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join(CONFIG_FILENAME);
            std::fs::write(&path, CONFIG).map_err(|e| e.to_string())?;

            let config = ProjectConfig::load(&path).map_err(|e| e.to_string())?;

            assert_eq!(config.transactions.confirmations, 2);
            assert_eq!(config.transactions.timeout_secs, 120);
            assert_eq!(config.artifact_store().root(), jail.directory().join("out"));
            assert_eq!(config.workdir(), jail.directory().join(".chainplan"));

            let registry = config.registry().map_err(|e| e.to_string())?;
            assert_eq!(registry.len(), 3);

            let sepolia = registry.get("sepolia").map_err(|e| e.to_string())?;
            assert_eq!(sepolia.name, "sepolia");
            assert_eq!(sepolia.chain_id, Some(11155111));
            assert_eq!(
                sepolia.credentials,
                CredentialSource::MnemonicEnv {
                    var: "SEPOLIA_MNEMONIC".to_string(),
                    index: 0
                }
            );

            let fork = registry.get("mainnet-fork").map_err(|e| e.to_string())?;
            assert_eq!(fork.fork.as_ref().unwrap().fork_block_number, Some(17342219));
            Ok(())
        });
    }

    #[test]
    fn test_unrelated_env_vars_are_ignored() {
        Jail::expect_with(|jail| {
            jail.set_env("CHAINPLAN_TEST_FORK_URL", "http://127.0.0.1:8545");
            jail.set_env("CHAINPLAN_NETWORK", "sepolia");
            jail.set_env("CHAINPLAN_VERBOSITY", "debug");
            jail.set_env("CHAINPLAN_TRANSACTIONS__TIMEOUT_SECS", "30");

            let path = jail.directory().join(CONFIG_FILENAME);
            std::fs::write(&path, CONFIG).map_err(|e| e.to_string())?;

            let config = ProjectConfig::load(&path).map_err(|e| e.to_string())?;
            assert_eq!(config.transactions.timeout_secs, 30);
            assert_eq!(config.transactions.confirmations, 2);
            assert_eq!(config.default_network.as_deref(), Some("ganache"));
            Ok(())
        });
    }

    #[test]
    fn test_config_env_keys() {
        assert!(is_config_key("transactions__confirmations"));
        assert!(is_config_key("DEFAULT_NETWORK"));
        assert!(is_config_key("networks__ganache__chain_id"));
        assert!(!is_config_key("test_fork_url"));
        assert!(!is_config_key("no_cleanup"));
    }

    #[test]
    fn test_zero_confirmations_rejected() {
        let config = r#"
            [transactions]
            confirmations = 0
        "#;

        let err = ProjectConfig::from_toml_str(config, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_network_selection() {
        let config = ProjectConfig::from_toml_str(CONFIG, Path::new(".")).unwrap();
        assert_eq!(config.network_name(None).unwrap(), "ganache");
        assert_eq!(config.network_name(Some("sepolia")).unwrap(), "sepolia");

        let empty = ProjectConfig::default();
        assert!(empty.network_name(None).is_err());
    }

    #[test]
    fn test_plaintext_secrets_rejected() {
        let config = r#"
            [networks.bsc_testnet]
            rpc_url = "https://data-seed-prebsc-1-s1.binance.org:8545"
            accounts = { mnemonic = "obscure satoshi lecture culture lady pattern fog shoe emerge step wonder sword" }
            credentials = { source = "mnemonic-env", var = "BSC_MNEMONIC" }
        "#;

        let err = ProjectConfig::from_toml_str(config, Path::new(".")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("accounts"), "{message}");
        assert!(!message.contains("satoshi"));
    }

    #[test]
    fn test_invalid_profile_rejected_at_load() {
        let config = r#"
            [networks.ganache]
            rpc_url = "http://127.0.0.1:7545"
            credentials = { source = "dev-account" }
        "#;

        assert!(ProjectConfig::from_toml_str(config, Path::new(".")).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new("chainplan-config").unwrap();
        assert!(ProjectConfig::load(&dir.path().join(CONFIG_FILENAME)).is_err());
    }

    #[test]
    fn test_bundled_config_is_valid() {
        Jail::expect_with(|_| {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../chainplan.toml");
            let config = ProjectConfig::load(&path).map_err(|e| e.to_string())?;
            let registry = config.registry().map_err(|e| e.to_string())?;

            let default = registry
                .get(config.network_name(None).map_err(|e| e.to_string())?)
                .map_err(|e| e.to_string())?;
            assert!(default.fork.is_some());
            assert!(default.credentials.requires_fork());
            Ok(())
        });
    }
}
