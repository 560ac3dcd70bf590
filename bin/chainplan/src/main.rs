//! chainplan deploys ordered plans of compiled smart contracts to named networks.

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use chainplan_deploy::{
    ChainClient, DeploymentPlan, DeploymentReport, Executor, NetworkSession, PreparedPlan,
    ProcessEnv, ProjectConfig,
};
use cli::{Cli, Command, DeployArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = ProjectConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Deploy(args) => deploy(&config, args).await,
        Command::Check { plan } => check(&config, &plan),
        Command::Networks => networks(&config),
    }
}

async fn deploy(config: &ProjectConfig, args: DeployArgs) -> Result<()> {
    let plan = DeploymentPlan::load(&args.plan)?;
    let registry = config.registry()?;
    let network = registry.get(config.network_name(args.network.as_deref())?)?;

    let report_path = args.report.unwrap_or_else(|| {
        config
            .workdir()
            .join("reports")
            .join(format!("{}-{}.json", plan.display_name(), network.name))
    });

    let started_at = chrono::Utc::now().timestamp();
    let session = NetworkSession::open(
        network,
        &ProcessEnv,
        &config.transactions,
        &config.workdir(),
        args.no_cleanup,
    )
    .await?;

    // The session is closed on every path, including report errors.
    let report = session
        .run(async |session| -> Result<DeploymentReport> {
            let executor = Executor::new(session.client(), config.artifact_store());
            let outcome = executor.execute(&plan, network).await;

            let chain_id = session.fork().map(|fork| fork.chain_id);
            let report = DeploymentReport::new(
                &plan,
                network,
                chain_id,
                session.client().sender(),
                started_at,
                outcome,
            )?;

            report.log();
            if !report.results.is_empty() {
                println!("{}", report.table());
            }
            report.write_json(&report_path)?;

            Ok(report)
        })
        .await?;

    if let Some(failure) = &report.failure {
        match &failure.step {
            Some(step) => anyhow::bail!("Deployment failed at step `{step}`: {}", failure.error),
            None => anyhow::bail!("Deployment aborted: {}", failure.error),
        }
    }

    Ok(())
}

fn check(config: &ProjectConfig, path: &Path) -> Result<()> {
    let plan = DeploymentPlan::load(path)?;
    let prepared = PreparedPlan::prepare(&plan, &config.artifact_store())?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Step", "Contract", "Constructor", "Value (wei)"]);
    for step in prepared.steps() {
        table.add_row(vec![
            step.id().to_string(),
            step.artifact().name.clone(),
            step.constructor_signature(),
            step.value().to_string(),
        ]);
    }
    println!("{table}");

    tracing::info!(
        plan = plan.display_name(),
        steps = prepared.steps().len(),
        plan_hash = %plan.hash()?,
        "Plan is valid"
    );

    Ok(())
}

fn networks(config: &ProjectConfig) -> Result<()> {
    let registry = config.registry()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Network", "Endpoint", "Chain id", "Credentials"]);
    for profile in registry.iter() {
        let credentials: &'static str = (&profile.credentials).into();
        let default = config.default_network.as_deref() == Some(profile.name.as_str());
        table.add_row(vec![
            if default {
                format!("{} (default)", profile.name)
            } else {
                profile.name.clone()
            },
            profile.display_endpoint(),
            profile
                .chain_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            credentials.to_string(),
        ]);
    }
    println!("{table}");

    Ok(())
}
