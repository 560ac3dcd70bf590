//! Integration tests against a local Anvil fork.
//!
//! These tests require Docker to be running and an upstream endpoint to fork,
//! given in `CHAINPLAN_TEST_FORK_URL`.
//! Run with: cargo test --test fork_test -- --ignored

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use chainplan_deploy::{
    ArtifactStore, ChainClient, ConstructorArg, CredentialSource, DeploymentPlan,
    DeploymentReport, DeploymentStep, Executor, ForkConfig, NetworkProfile, NetworkSession,
    TxSettings,
};
use tempdir::TempDir;

const FORK_URL_VAR: &str = "CHAINPLAN_TEST_FORK_URL";
const FORK_HOST_PORT: u16 = 18545;

/// Creation code that stores no runtime code. Enough to get an address.
const EMPTY_CONTRACT_BYTECODE: &str = "0x6080604052348015600f57600080fd5b50";

fn write_artifact(root: &Path, name: &str, inputs: &[&str]) -> Result<()> {
    let dir = root.join("contracts").join(format!("{name}.sol"));
    std::fs::create_dir_all(&dir)?;

    let inputs: Vec<_> = inputs
        .iter()
        .enumerate()
        .map(|(i, ty)| serde_json::json!({ "name": format!("arg{i}"), "type": ty, "internalType": ty }))
        .collect();
    let artifact = serde_json::json!({
        "contractName": name,
        "abi": [{ "type": "constructor", "inputs": inputs, "stateMutability": "nonpayable" }],
        "bytecode": EMPTY_CONTRACT_BYTECODE,
    });

    std::fs::write(dir.join(format!("{name}.json")), artifact.to_string())
        .context("Failed to write artifact")
}

fn fork_profile(name: &str) -> NetworkProfile {
    let mut fork = ForkConfig::new("${FORK_URL}");
    fork.host_port = FORK_HOST_PORT;

    NetworkProfile {
        name: name.to_string(),
        rpc_url: None,
        fork: Some(fork),
        chain_id: None,
        credentials: CredentialSource::DevAccount { index: 0 },
    }
}

#[tokio::test]
#[ignore = "requires Docker and CHAINPLAN_TEST_FORK_URL"]
async fn test_deploy_dependent_contracts_on_fork() -> Result<()> {
    let Ok(fork_url) = std::env::var(FORK_URL_VAR) else {
        eprintln!("{FORK_URL_VAR} is not set, skipping");
        return Ok(());
    };
    let secrets: HashMap<String, String> = [("FORK_URL".to_string(), fork_url)].into();

    let workdir = TempDir::new("chainplan-fork")?;
    let artifacts = workdir.path().join("artifacts");
    write_artifact(&artifacts, "MyContractA", &[])?;
    write_artifact(&artifacts, "MyContractB", &[])?;
    write_artifact(&artifacts, "MyContractC", &["address", "address"])?;

    let plan = DeploymentPlan::new(vec![
        DeploymentStep::new("MyContractA"),
        DeploymentStep::new("MyContractB"),
        DeploymentStep::new("MyContractC")
            .arg(ConstructorArg::address_of("MyContractA"))
            .arg(ConstructorArg::address_of("MyContractB")),
    ]);

    let network = fork_profile("test-fork");
    let session = NetworkSession::open(
        &network,
        &secrets,
        &TxSettings::default(),
        workdir.path(),
        false,
    )
    .await
    .context("Failed to open fork session")?;

    let chain_id = session.fork().map(|fork| fork.chain_id);
    let deployer = session.client().sender();
    let started_at = chrono::Utc::now().timestamp();

    let executor = Executor::new(session.client(), ArtifactStore::new(&artifacts));
    let outcome = executor.execute(&plan, &network).await;
    let report = DeploymentReport::new(&plan, &network, chain_id, deployer, started_at, outcome)?;

    session.close().await?;

    assert!(report.succeeded(), "{:?}", report.failure);
    assert_eq!(report.results.len(), 3);

    let a = &report.results[0];
    let b = &report.results[1];
    let c = &report.results[2];
    assert_ne!(a.address, b.address);
    assert_eq!(
        c.constructor_args,
        vec![a.address.to_string(), b.address.to_string()]
    );

    Ok(())
}
