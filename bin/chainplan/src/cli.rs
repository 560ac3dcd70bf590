use std::path::PathBuf;

use chainplan_deploy::CONFIG_FILENAME;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Deploy ordered plans of compiled contracts to configured networks.
#[derive(Debug, Parser)]
#[command(name = "chainplan", version, about)]
pub struct Cli {
    /// Verbosity of the logs.
    #[arg(short, long, global = true, env = "CHAINPLAN_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the project configuration.
    #[arg(short, long, global = true, env = "CHAINPLAN_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy every step of a plan, in order.
    Deploy(DeployArgs),

    /// Validate a plan and pre-flight it against the artifacts, without sending anything.
    Check {
        /// The plan file (TOML).
        plan: PathBuf,
    },

    /// List the configured networks.
    Networks,
}

#[derive(Debug, clap::Args)]
pub struct DeployArgs {
    /// The plan file (TOML).
    pub plan: PathBuf,

    /// The network to deploy to. Defaults to `default_network` from the configuration.
    #[arg(short, long, env = "CHAINPLAN_NETWORK")]
    pub network: Option<String>,

    /// Where to write the JSON report.
    /// Defaults to `<workdir>/reports/<plan>-<network>.json`.
    #[arg(long, env = "CHAINPLAN_REPORT")]
    pub report: Option<PathBuf>,

    /// Keep the fork container running after the deployment.
    #[arg(long, env = "CHAINPLAN_NO_CLEANUP", default_value_t = false)]
    pub no_cleanup: bool,
}
