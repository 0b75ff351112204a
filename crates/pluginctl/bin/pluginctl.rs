use clap::Parser;
use pluginctl::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env_filter = cli::resolve_env_filter(&cli);
    pluginctl::telemetry::install("pluginctl", &env_filter)?;
    cli::run_with_cli(cli)
}
