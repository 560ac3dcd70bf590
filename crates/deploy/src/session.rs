//! Binding a chain client to one network profile.

use std::path::Path;

use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};

use crate::{
    CredentialContext, DeployError, EvmChainClient, NetworkProfile, SecretSource, TxSettings,
    credentials::expand_placeholders,
    docker::ForkDocker,
    network::{Endpoint, redact_url},
    rpc,
    services::anvil::{AnvilHandler, ForkConfig},
};

/// A fork node started for the session, removed when the session closes.
struct RunningFork {
    docker: ForkDocker,
    anvil: AnvilHandler,
}

/// A live connection to one network with resolved credentials.
///
/// For fork profiles the session owns the Anvil container; it is removed by
/// [`NetworkSession::close`] or [`NetworkSession::run`].
pub struct NetworkSession {
    profile: NetworkProfile,
    client: EvmChainClient,
    fork: Option<RunningFork>,
}

impl NetworkSession {
    /// Open a session for `profile`.
    ///
    /// Secrets (URL placeholders, keys, mnemonics, keystore passwords) are read
    /// from `secrets` here and nowhere else. Fork data lives under `workdir`.
    pub async fn open(
        profile: &NetworkProfile,
        secrets: &dyn SecretSource,
        settings: &TxSettings,
        workdir: &Path,
        keep_fork: bool,
    ) -> Result<Self, DeployError> {
        profile.validate()?;

        match profile.endpoint()? {
            Endpoint::Rpc(template) => {
                let rpc_url = expand(profile, template, secrets)?;
                let credential = profile
                    .credentials
                    .resolve(CredentialContext {
                        network: &profile.name,
                        chain_id: profile.chain_id,
                        secrets,
                        dev_accounts: None,
                    })
                    .await?;

                tracing::info!(
                    network = %profile.name,
                    endpoint = %profile.display_endpoint(),
                    deployer = %credential.address,
                    "Network session opened"
                );

                Ok(Self {
                    profile: profile.clone(),
                    client: EvmChainClient::new(&profile.name, rpc_url, credential, settings)?,
                    fork: None,
                })
            }
            Endpoint::Fork(fork) => {
                let fork_url = expand(profile, &fork.fork_url, secrets)?;
                // Anvil exits at once on a dead upstream, so check it before starting.
                check_upstream(profile, &fork_url).await?;

                let mut docker = ForkDocker::connect(keep_fork)?;

                match Self::open_fork(profile, fork, &fork_url, secrets, settings, workdir, &mut docker).await {
                    Ok((client, anvil)) => Ok(Self {
                        profile: profile.clone(),
                        client,
                        fork: Some(RunningFork { docker, anvil }),
                    }),
                    Err(e) => {
                        // A container that failed to start is removed even with `keep_fork`.
                        if let Err(cleanup) = docker.remove_all().await {
                            tracing::warn!(error = %cleanup, "Failed to remove fork container");
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    async fn open_fork(
        profile: &NetworkProfile,
        fork: &ForkConfig,
        fork_url: &SecretString,
        secrets: &dyn SecretSource,
        settings: &TxSettings,
        workdir: &Path,
        docker: &mut ForkDocker,
    ) -> Result<(EvmChainClient, AnvilHandler), DeployError> {
        let suffix = names::Generator::default()
            .next()
            .unwrap_or_else(|| "fork".to_string());
        let container_name = format!("chainplan-{}-{}", profile.name, suffix);
        let host_config_path = workdir.join("forks").join(&container_name);

        tracing::info!(
            network = %profile.name,
            endpoint = %profile.display_endpoint(),
            fork_block_number = ?fork.fork_block_number,
            container_name,
            "Starting fork network"
        );

        let anvil = fork
            .start(docker, &container_name, fork_url, &host_config_path)
            .await
            .with_context(|| format!("Failed to start fork network `{}`", profile.name))?;

        let credential = profile
            .credentials
            .resolve(CredentialContext {
                network: &profile.name,
                chain_id: Some(anvil.chain_id),
                secrets,
                dev_accounts: Some(&anvil.accounts),
            })
            .await?;

        let rpc_url = SecretString::from(anvil.rpc_url.to_string());
        let client = EvmChainClient::new(&profile.name, rpc_url, credential, settings)?;

        Ok((client, anvil))
    }

    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    pub fn client(&self) -> &EvmChainClient {
        &self.client
    }

    /// The fork node backing this session, if any.
    pub fn fork(&self) -> Option<&AnvilHandler> {
        self.fork.as_ref().map(|fork| &fork.anvil)
    }

    /// Release the session, removing its fork container.
    pub async fn close(mut self) -> Result<(), DeployError> {
        if let Some(fork) = self.fork.as_mut()
            && fork.docker.cleanup().await?
        {
            tracing::info!(container_name = %fork.anvil.container_name, "Fork network removed");
        }
        Ok(())
    }

    /// Run `f` against the session, then close the session whatever `f` returned.
    pub async fn run<T, E>(self, f: impl AsyncFnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DeployError>,
    {
        let result = f(&self).await;
        let closed = self.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }
}

/// Query the fork upstream's chain id, failing with [`DeployError::NetworkUnreachable`].
async fn check_upstream(profile: &NetworkProfile, fork_url: &SecretString) -> Result<u64, DeployError> {
    let client = rpc::create_client()?;
    rpc::chain_id(&client, fork_url.expose_secret())
        .await
        .map_err(|e| DeployError::NetworkUnreachable {
            network: profile.name.clone(),
            endpoint: redact_url(fork_url.expose_secret()),
            reason: format!("fork upstream did not answer: {e}"),
        })
}

fn expand(
    profile: &NetworkProfile,
    template: &str,
    secrets: &dyn SecretSource,
) -> Result<SecretString, DeployError> {
    expand_placeholders(template, secrets).map_err(|reason| DeployError::Credentials {
        network: profile.name.clone(),
        reason: format!("cannot expand endpoint URL: {reason}"),
    })
}
