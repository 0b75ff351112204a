#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

pub mod config;
pub mod inventory;
pub mod plugin;

use crate::runtime;

pub const ENV_LOG: &str = "PLUGINCTL_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "pluginctl",
    about = "Plugin inventory and air-gapped plugin bundle tooling",
    version
)]
pub struct Cli {
    /// Logging filter (overridden by PLUGINCTL_LOG)
    #[arg(long = "log", default_value = "info", global = true)]
    pub verbosity: String,

    /// Configuration file (defaults to PLUGINCTL_CONFIG or <config dir>/pluginctl/config.toml)
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON output where applicable
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build and publish air-gapped plugin bundles
    #[command(subcommand)]
    Plugin(self::plugin::PluginCommand),
    /// Query a local plugin inventory database
    #[command(subcommand)]
    Inventory(self::inventory::InventoryCommand),
    /// Inspect resolved configuration
    #[command(subcommand)]
    Config(self::config::ConfigCommand),
}

pub fn run() -> Result<()> {
    run_with_cli(Cli::parse())
}

/// Resolve the logging filter to use for telemetry initialisation.
pub fn resolve_env_filter(cli: &Cli) -> String {
    std::env::var(ENV_LOG).unwrap_or_else(|_| cli.verbosity.clone())
}

/// Execute the CLI using a pre-parsed argument set.
pub fn run_with_cli(cli: Cli) -> Result<()> {
    let runtime = runtime::resolve_runtime(cli.config.as_deref())?;
    for warning in runtime.warnings() {
        warn!("{warning}");
    }

    match cli.command {
        Command::Plugin(cmd) => self::plugin::handle(cmd, cli.json, &runtime)?,
        Command::Inventory(cmd) => self::inventory::handle(cmd, cli.json)?,
        Command::Config(cmd) => self::config::handle(cmd, cli.json, &runtime)?,
    }

    Ok(())
}
