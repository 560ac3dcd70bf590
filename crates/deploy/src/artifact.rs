//! Compiled contract artifacts.
//!
//! Artifacts are the JSON files produced by Hardhat (`artifacts/**/Name.json`)
//! or Foundry (`out/Name.sol/Name.json`). Only the ABI and the creation
//! bytecode are read.

use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::{JsonAbi, Param, StateMutability},
    primitives::Bytes,
};
use serde::Deserialize;

use crate::DeployError;

/// Directories never searched for artifacts.
const SKIPPED_DIRS: &[&str] = &["build-info", "cache", "node_modules", ".git"];

#[derive(Deserialize)]
struct RawArtifact {
    abi: JsonAbi,
    bytecode: RawBytecode,
}

/// Hardhat stores the bytecode as a string, Foundry as `{ "object": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object { object: String },
}

impl RawBytecode {
    fn into_hex(self) -> String {
        match self {
            Self::Hex(hex) | Self::Object { object: hex } => hex,
        }
    }
}

/// A compiled contract: its ABI and creation bytecode.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    /// The file the artifact was read from.
    pub path: PathBuf,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl ContractArtifact {
    /// Parse an artifact from its JSON contents.
    pub fn from_json(name: &str, path: &Path, contents: &str) -> Result<Self, DeployError> {
        let fail = |reason: String| DeployError::Artifact {
            contract: name.to_string(),
            reason,
        };

        let raw: RawArtifact = serde_json::from_str(contents)
            .map_err(|e| fail(format!("{} is not a contract artifact: {e}", path.display())))?;

        let hex_code = raw.bytecode.into_hex();
        let hex_code = hex_code.strip_prefix("0x").unwrap_or(&hex_code);
        if hex_code.is_empty() {
            return Err(fail(format!(
                "{} has no creation bytecode (abstract contract or interface?)",
                path.display()
            )));
        }
        if hex_code.contains("__") {
            return Err(fail(format!(
                "{} has unlinked library references",
                path.display()
            )));
        }
        let bytecode = hex::decode(hex_code)
            .map_err(|e| fail(format!("{} has invalid bytecode: {e}", path.display())))?;

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            abi: raw.abi,
            bytecode: bytecode.into(),
        })
    }

    /// The constructor parameters. Empty if the contract declares no constructor.
    pub fn constructor_inputs(&self) -> &[Param] {
        self.abi
            .constructor
            .as_ref()
            .map(|c| c.inputs.as_slice())
            .unwrap_or_default()
    }

    /// Resolve the constructor parameters to ABI types.
    pub fn constructor_types(&self) -> Result<Vec<DynSolType>, DeployError> {
        self.constructor_inputs()
            .iter()
            .map(|param| {
                param.resolve().map_err(|e| DeployError::Artifact {
                    contract: self.name.clone(),
                    reason: format!("unsupported constructor parameter `{}`: {e}", param.name),
                })
            })
            .collect()
    }

    /// Whether the constructor accepts value.
    pub fn is_payable(&self) -> bool {
        self.abi
            .constructor
            .as_ref()
            .is_some_and(|c| c.state_mutability == StateMutability::Payable)
    }

    /// The creation bytecode followed by the ABI-encoded constructor arguments.
    pub fn deploy_code(&self, args: &[DynSolValue]) -> Result<Bytes, DeployError> {
        let mut code = self.bytecode.to_vec();

        match &self.abi.constructor {
            Some(constructor) => {
                let encoded = constructor.abi_encode_input(args).map_err(|e| {
                    DeployError::ConstructorArgument {
                        contract: self.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                code.extend_from_slice(&encoded);
            }
            None if !args.is_empty() => {
                return Err(DeployError::ConstructorArgument {
                    contract: self.name.clone(),
                    reason: format!(
                        "contract has no constructor but {} argument(s) were given",
                        args.len()
                    ),
                });
            }
            None => {}
        }

        Ok(code.into())
    }
}

/// Locates artifacts under a build output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the artifact of `contract`.
    ///
    /// With `explicit` set, that file (relative to the store root) is read.
    /// Otherwise the store is searched for a single `{contract}.json`.
    pub fn load(
        &self,
        contract: &str,
        explicit: Option<&Path>,
    ) -> Result<ContractArtifact, DeployError> {
        let path = match explicit {
            Some(path) => self.root.join(path),
            None => self.find(contract)?,
        };

        let contents = fs::read_to_string(&path).map_err(|e| DeployError::Artifact {
            contract: contract.to_string(),
            reason: format!("failed to read {}: {e}", path.display()),
        })?;

        let artifact = ContractArtifact::from_json(contract, &path, &contents)?;
        tracing::debug!(
            contract,
            path = %artifact.path.display(),
            bytecode_len = artifact.bytecode.len(),
            "Loaded contract artifact"
        );

        Ok(artifact)
    }

    fn find(&self, contract: &str) -> Result<PathBuf, DeployError> {
        let file_name = format!("{contract}.json");
        let mut matches = Vec::new();
        collect_matches(&self.root, &file_name, &mut matches).map_err(|e| {
            DeployError::Artifact {
                contract: contract.to_string(),
                reason: format!("failed to search {}: {e}", self.root.display()),
            }
        })?;

        match matches.len() {
            0 => Err(DeployError::Artifact {
                contract: contract.to_string(),
                reason: format!("no `{file_name}` found under {}", self.root.display()),
            }),
            1 => Ok(matches.remove(0)),
            _ => {
                matches.sort();
                let found = matches
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(DeployError::Artifact {
                    contract: contract.to_string(),
                    reason: format!("ambiguous artifact, set `artifact` on the step to one of: {found}"),
                })
            }
        }
    }
}

fn collect_matches(dir: &Path, file_name: &str, matches: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            let skipped = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| SKIPPED_DIRS.contains(&n));
            if !skipped {
                collect_matches(&path, file_name, matches)?;
            }
        } else if path.file_name().and_then(|n| n.to_str()) == Some(file_name) {
            matches.push(path);
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, U256};
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_find_hardhat_artifact() {
        let dir = TempDir::new("chainplan-artifacts").unwrap();
        fixtures::write_artifact(dir.path(), "Lock", &[("_unlockTime", "uint256")], true);
        // Debug files sit next to artifacts and must not match.
        std::fs::write(
            dir.path().join("contracts/Lock.sol/Lock.dbg.json"),
            r#"{"_format": "hh-sol-dbg-1"}"#,
        )
        .unwrap();

        let store = ArtifactStore::new(dir.path());
        let artifact = store.load("Lock", None).unwrap();

        assert_eq!(artifact.name, "Lock");
        assert!(artifact.is_payable());
        assert_eq!(artifact.constructor_types().unwrap(), vec![DynSolType::Uint(256)]);
    }

    #[test]
    fn test_foundry_bytecode_object() {
        let contents = r#"{
            "abi": [],
            "bytecode": {"object": "0x6080604052", "sourceMap": "", "linkReferences": {}}
        }"#;
        let artifact =
            ContractArtifact::from_json("BatchMintClips", Path::new("out/B.json"), contents).unwrap();

        assert_eq!(&artifact.bytecode[..], &[0x60u8, 0x80, 0x60, 0x40, 0x52]);
        assert!(artifact.constructor_inputs().is_empty());
        assert!(!artifact.is_payable());
    }

    #[test]
    fn test_missing_and_ambiguous_artifacts() {
        let dir = TempDir::new("chainplan-artifacts").unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(
            store.load("MyContractA", None),
            Err(DeployError::Artifact { .. })
        ));

        fixtures::write_artifact(dir.path(), "MyContractA", &[], false);
        fixtures::write_artifact(&dir.path().join("other"), "MyContractA", &[], false);
        let err = store.load("MyContractA", None).unwrap_err();
        assert!(err.to_string().contains("ambiguous artifact"));

        let explicit = Path::new("other/contracts/MyContractA.sol/MyContractA.json");
        assert!(store.load("MyContractA", Some(explicit)).is_ok());
    }

    #[test]
    fn test_empty_bytecode_rejected() {
        let contents = r#"{"abi": [], "bytecode": "0x"}"#;
        let err = ContractArtifact::from_json("IERC20", Path::new("IERC20.json"), contents)
            .unwrap_err();
        assert!(err.to_string().contains("no creation bytecode"));
    }

    #[test]
    fn test_deploy_code_appends_encoded_args() {
        let dir = TempDir::new("chainplan-artifacts").unwrap();
        fixtures::write_artifact(
            dir.path(),
            "MyContractC",
            &[("a", "address"), ("b", "address")],
            false,
        );
        let artifact = ArtifactStore::new(dir.path()).load("MyContractC", None).unwrap();

        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);
        let code = artifact
            .deploy_code(&[DynSolValue::Address(a), DynSolValue::Address(b)])
            .unwrap();

        let init_len = artifact.bytecode.len();
        assert_eq!(code.len(), init_len + 64);
        assert_eq!(&code[init_len + 12..init_len + 32], a.as_slice());
        assert_eq!(&code[init_len + 44..], b.as_slice());

        let err = artifact
            .deploy_code(&[DynSolValue::Uint(U256::from(1), 256)])
            .unwrap_err();
        assert!(matches!(err, DeployError::ConstructorArgument { .. }));
    }
}
