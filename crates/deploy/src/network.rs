//! Network profiles and the registry that names them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{CredentialSource, DeployError, services::anvil::ForkConfig};

/// Connection parameters for one named network.
///
/// Exactly one of `rpc_url` and `fork` must be set. Unknown keys are rejected,
/// so inline secrets such as `mnemonic = "..."` fail to load instead of being
/// silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkProfile {
    /// The name of the profile. Filled from the registry key.
    #[serde(skip)]
    pub name: String,
    /// JSON-RPC endpoint. May contain `${VAR}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    /// Start a local fork node instead of connecting to an existing endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork: Option<ForkConfig>,
    /// Expected chain id. Deployments abort if the endpoint reports another one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Where the deploying account comes from.
    pub credentials: CredentialSource,
}

/// The endpoint a profile connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint<'a> {
    /// An existing JSON-RPC node.
    Rpc(&'a str),
    /// A fork node started for the session.
    Fork(&'a ForkConfig),
}

impl NetworkProfile {
    /// Create a profile for an existing JSON-RPC endpoint.
    pub fn rpc(
        name: impl Into<String>,
        rpc_url: impl Into<String>,
        credentials: CredentialSource,
    ) -> Self {
        Self {
            name: name.into(),
            rpc_url: Some(rpc_url.into()),
            fork: None,
            chain_id: None,
            credentials,
        }
    }

    /// Set the expected chain id.
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// The endpoint this profile connects to.
    pub fn endpoint(&self) -> Result<Endpoint<'_>, DeployError> {
        match (&self.rpc_url, &self.fork) {
            (Some(url), None) => Ok(Endpoint::Rpc(url)),
            (None, Some(fork)) => Ok(Endpoint::Fork(fork)),
            (Some(_), Some(_)) => Err(DeployError::Config(format!(
                "network `{}` sets both `rpc_url` and `fork`",
                self.name
            ))),
            (None, None) => Err(DeployError::Config(format!(
                "network `{}` needs either `rpc_url` or `fork`",
                self.name
            ))),
        }
    }

    /// Check the profile is internally consistent.
    pub fn validate(&self) -> Result<(), DeployError> {
        let endpoint = self.endpoint()?;

        if self.credentials.requires_fork() && !matches!(endpoint, Endpoint::Fork(_)) {
            return Err(DeployError::Config(format!(
                "network `{}` uses dev-account credentials but is not a fork network",
                self.name
            )));
        }

        Ok(())
    }

    /// A loggable description of the endpoint. Never contains secrets.
    pub fn display_endpoint(&self) -> String {
        match self.endpoint() {
            Ok(Endpoint::Rpc(url)) => redact_url(url),
            Ok(Endpoint::Fork(fork)) => format!("fork of {}", redact_url(&fork.fork_url)),
            Err(_) => "<invalid>".to_string(),
        }
    }
}

/// Reduce a URL to its scheme, host and port.
///
/// Provider URLs routinely carry API keys in their path or query, so only the
/// origin is ever logged.
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) if parsed.has_host() => {
            let host = parsed.host_str().unwrap_or_default();
            match parsed.port() {
                Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
                None => format!("{}://{}", parsed.scheme(), host),
            }
        }
        _ => "<redacted>".to_string(),
    }
}

/// Named network profiles. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkRegistry {
    profiles: BTreeMap<String, NetworkProfile>,
}

impl NetworkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a name → profile map, as found in configuration.
    pub fn from_map(map: BTreeMap<String, NetworkProfile>) -> Result<Self, DeployError> {
        let mut registry = Self::new();
        for (name, mut profile) in map {
            profile.name = name;
            registry.insert(profile)?;
        }
        Ok(registry)
    }

    /// Add a profile. Fails if a profile with the same name already exists or
    /// the profile is inconsistent.
    pub fn insert(&mut self, profile: NetworkProfile) -> Result<(), DeployError> {
        if profile.name.is_empty() {
            return Err(DeployError::Config("network name must not be empty".to_string()));
        }
        if self.profiles.contains_key(&profile.name) {
            return Err(DeployError::Config(format!(
                "network `{}` is defined more than once",
                profile.name
            )));
        }
        profile.validate()?;
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    /// Look up a profile by name.
    pub fn get(&self, name: &str) -> Result<&NetworkProfile, DeployError> {
        self.profiles
            .get(name)
            .ok_or_else(|| DeployError::UnknownNetwork(name.to_string()))
    }

    /// Iterate over profiles in name order.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
