//! Credential sources for the deploying account.
//!
//! Configuration only records *where* a secret lives (an environment variable,
//! an encrypted keystore, a hardware wallet or a fork dev account). Secrets are
//! read when a network session is opened and are never logged.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256};
use alloy_network::EthereumWallet;
use alloy_signer::Signer;
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::DeployError;

/// Read access to secret material such as private keys, mnemonics and API keys.
///
/// Passed explicitly wherever secrets are needed.
pub trait SecretSource: Send + Sync {
    /// Look up a secret by name. Returns `None` if it is not set.
    fn secret(&self, name: &str) -> Option<SecretString>;
}

/// Secrets read from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl SecretSource for ProcessEnv {
    fn secret(&self, name: &str) -> Option<SecretString> {
        std::env::var(name)
            .ok()
            .filter(|value| !value.is_empty())
            .map(SecretString::from)
    }
}

impl SecretSource for HashMap<String, String> {
    fn secret(&self, name: &str) -> Option<SecretString> {
        self.get(name).cloned().map(SecretString::from)
    }
}

/// Expand `${VAR}` placeholders in `template` using `secrets`.
///
/// The expanded value is returned as a secret since placeholders usually hold
/// API keys embedded in provider URLs.
pub fn expand_placeholders(
    template: &str,
    secrets: &dyn SecretSource,
) -> Result<SecretString, String> {
    let mut expanded = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| "unterminated `${` placeholder".to_string())?;
        let name = &after[..end];
        if name.is_empty() {
            return Err("empty placeholder `${}`".to_string());
        }
        let value = secrets
            .secret(name)
            .ok_or_else(|| format!("environment variable `{}` is not set", name))?;
        expanded.push_str(value.expose_secret());
        rest = &after[end + 1..];
    }
    expanded.push_str(rest);

    Ok(SecretString::from(expanded))
}

/// A pre-funded account exposed by a local fork node.
#[derive(Clone, Serialize, Deserialize)]
pub struct DevAccount {
    pub address: Address,
    pub private_key: B256,
}

impl fmt::Debug for DevAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Where the deploying account's key material comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "source", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CredentialSource {
    /// A hex private key stored in an environment variable.
    PrivateKeyEnv { var: String },
    /// A BIP-39 mnemonic stored in an environment variable.
    MnemonicEnv {
        var: String,
        /// Derivation index on the default path `m/44'/60'/0'/0/{index}`.
        #[serde(default)]
        index: u32,
    },
    /// An encrypted JSON keystore, unlocked with a password read from the environment.
    Keystore { path: PathBuf, password_var: String },
    /// A Ledger hardware wallet (Ledger Live derivation path).
    Ledger {
        #[serde(default)]
        index: usize,
    },
    /// A pre-funded account of a local fork node.
    DevAccount {
        #[serde(default)]
        index: usize,
    },
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind: &'static str = self.into();
        match self {
            Self::PrivateKeyEnv { var } => write!(f, "{kind} (${var})"),
            Self::MnemonicEnv { var, index } => write!(f, "{kind} (${var} #{index})"),
            Self::Keystore { path, .. } => write!(f, "{kind} ({})", path.display()),
            Self::Ledger { index } | Self::DevAccount { index } => write!(f, "{kind} (#{index})"),
        }
    }
}

/// Everything a credential source may need to resolve.
#[derive(Clone, Copy)]
pub struct CredentialContext<'a> {
    /// The network the credential is resolved for (used in errors).
    pub network: &'a str,
    /// The chain id signatures are bound to, when known.
    pub chain_id: Option<u64>,
    pub secrets: &'a dyn SecretSource,
    /// Dev accounts of a running fork node, if any.
    pub dev_accounts: Option<&'a [DevAccount]>,
}

/// A resolved signing account.
pub struct Credential {
    /// The address transactions are sent from.
    pub address: Address,
    /// The wallet that signs transactions for `address`.
    pub wallet: EthereumWallet,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl CredentialSource {
    /// Whether this source can only be used against a fork network.
    pub fn requires_fork(&self) -> bool {
        matches!(self, Self::DevAccount { .. })
    }

    /// Resolve the source into a signing account.
    pub async fn resolve(&self, ctx: CredentialContext<'_>) -> Result<Credential, DeployError> {
        let fail = |reason: String| DeployError::Credentials {
            network: ctx.network.to_string(),
            reason,
        };

        let signer = match self {
            Self::PrivateKeyEnv { var } => {
                let key = ctx
                    .secrets
                    .secret(var)
                    .ok_or_else(|| fail(format!("environment variable `{var}` is not set")))?;
                key.expose_secret()
                    .trim()
                    .parse::<PrivateKeySigner>()
                    .map_err(|e| fail(format!("`{var}` does not hold a valid private key: {e}")))?
            }
            Self::MnemonicEnv { var, index } => {
                let phrase = ctx
                    .secrets
                    .secret(var)
                    .ok_or_else(|| fail(format!("environment variable `{var}` is not set")))?;
                MnemonicBuilder::<English>::default()
                    .phrase(phrase.expose_secret().trim())
                    .index(*index)
                    .and_then(|builder| builder.build())
                    .map_err(|e| fail(format!("`{var}` does not hold a usable mnemonic: {e}")))?
            }
            Self::Keystore { path, password_var } => {
                let password = ctx.secrets.secret(password_var).ok_or_else(|| {
                    fail(format!("environment variable `{password_var}` is not set"))
                })?;
                let path = expand_home(path);
                PrivateKeySigner::decrypt_keystore(&path, password.expose_secret().as_bytes())
                    .map_err(|e| {
                        fail(format!("failed to decrypt keystore {}: {e}", path.display()))
                    })?
            }
            Self::Ledger { index } => return resolve_ledger(*index, ctx).await,
            Self::DevAccount { index } => {
                let accounts = ctx.dev_accounts.ok_or_else(|| {
                    fail("dev accounts are only available on fork networks".to_string())
                })?;
                let account = accounts.get(*index).ok_or_else(|| {
                    fail(format!(
                        "dev account #{index} does not exist ({} available)",
                        accounts.len()
                    ))
                })?;
                PrivateKeySigner::from_bytes(&account.private_key)
                    .map_err(|e| fail(format!("invalid dev account key: {e}")))?
            }
        };

        let signer = signer.with_chain_id(ctx.chain_id);
        let address = signer.address();

        tracing::debug!(
            network = ctx.network,
            source = <&'static str>::from(self),
            %address,
            "Resolved deployer credentials"
        );

        Ok(Credential {
            address,
            wallet: EthereumWallet::from(signer),
        })
    }
}

#[cfg(feature = "ledger")]
async fn resolve_ledger(index: usize, ctx: CredentialContext<'_>) -> Result<Credential, DeployError> {
    use alloy_signer_ledger::{HDPath, LedgerSigner};

    let signer = LedgerSigner::new(HDPath::LedgerLive(index), ctx.chain_id)
        .await
        .map_err(|e| DeployError::Credentials {
            network: ctx.network.to_string(),
            reason: format!("failed to open Ledger device: {e}"),
        })?;
    let address = signer.address();

    tracing::debug!(network = ctx.network, %address, index, "Resolved Ledger credentials");

    Ok(Credential {
        address,
        wallet: EthereumWallet::from(signer),
    })
}

#[cfg(not(feature = "ledger"))]
async fn resolve_ledger(_index: usize, ctx: CredentialContext<'_>) -> Result<Credential, DeployError> {
    Err(DeployError::Credentials {
        network: ctx.network.to_string(),
        reason: "this build has no hardware wallet support (enable the `ledger` feature)"
            .to_string(),
    })
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known anvil/hardhat test key #0.
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";

    fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ctx<'a>(secrets: &'a dyn SecretSource) -> CredentialContext<'a> {
        CredentialContext {
            network: "test",
            chain_id: Some(31337),
            secrets,
            dev_accounts: None,
        }
    }

    #[tokio::test]
    async fn test_private_key_env() {
        let secrets = secrets(&[("DEPLOYER_KEY", TEST_KEY)]);
        let source = CredentialSource::PrivateKeyEnv {
            var: "DEPLOYER_KEY".to_string(),
        };

        let credential = source.resolve(ctx(&secrets)).await.unwrap();
        assert_eq!(credential.address, TEST_ADDRESS.parse::<Address>().unwrap());
    }

    #[tokio::test]
    async fn test_mnemonic_env_matches_private_key() {
        let secrets = secrets(&[("SEED", TEST_MNEMONIC)]);
        let source = CredentialSource::MnemonicEnv {
            var: "SEED".to_string(),
            index: 0,
        };

        let credential = source.resolve(ctx(&secrets)).await.unwrap();
        assert_eq!(credential.address, TEST_ADDRESS.parse::<Address>().unwrap());
    }

    #[tokio::test]
    async fn test_missing_variable_does_not_leak_other_secrets() {
        let secrets = secrets(&[("OTHER", TEST_KEY)]);
        let source = CredentialSource::PrivateKeyEnv {
            var: "DEPLOYER_KEY".to_string(),
        };

        let err = source.resolve(ctx(&secrets)).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`DEPLOYER_KEY` is not set"));
        assert!(!message.contains(&TEST_KEY[2..]));
    }

    #[tokio::test]
    async fn test_dev_account_requires_fork() {
        let secrets = secrets(&[]);
        let source = CredentialSource::DevAccount { index: 0 };

        let err = source.resolve(ctx(&secrets)).await.unwrap_err();
        assert!(matches!(err, DeployError::Credentials { .. }));

        let accounts = vec![DevAccount {
            address: TEST_ADDRESS.parse().unwrap(),
            private_key: TEST_KEY.parse().unwrap(),
        }];
        let credential = source
            .resolve(CredentialContext {
                dev_accounts: Some(&accounts),
                ..ctx(&secrets)
            })
            .await
            .unwrap();
        assert_eq!(credential.address, accounts[0].address);
    }

    #[test]
    fn test_expand_placeholders() {
        let secrets = secrets(&[("ALCHEMY_API_KEY", "abc123")]);

        let url = expand_placeholders("https://eth.example/v2/${ALCHEMY_API_KEY}", &secrets).unwrap();
        assert_eq!(url.expose_secret(), "https://eth.example/v2/abc123");

        let plain = expand_placeholders("http://127.0.0.1:8545", &secrets).unwrap();
        assert_eq!(plain.expose_secret(), "http://127.0.0.1:8545");

        assert!(expand_placeholders("https://x/${MISSING}", &secrets).is_err());
        assert!(expand_placeholders("https://x/${OPEN", &secrets).is_err());
    }

    #[test]
    fn test_source_toml_and_display() {
        let source: CredentialSource =
            toml::from_str("source = \"mnemonic-env\"\nvar = \"SEED\"\nindex = 2").unwrap();
        assert_eq!(
            source,
            CredentialSource::MnemonicEnv {
                var: "SEED".to_string(),
                index: 2
            }
        );
        assert_eq!(source.to_string(), "mnemonic-env ($SEED #2)");
    }
}
