#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::runtime::RuntimeContext;

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration and where it came from
    Show,
}

pub fn handle(cmd: ConfigCommand, json: bool, runtime: &RuntimeContext) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(json, runtime),
    }
}

fn show(json: bool, runtime: &RuntimeContext) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "config": runtime.settings,
                "provenance": runtime.provenance,
                "warnings": runtime.warnings(),
            }))?
        );
        return Ok(());
    }

    let rendered =
        toml::to_string_pretty(&runtime.settings).context("failed to render configuration")?;
    println!("{}", rendered.trim_end());
    println!();
    println!("# provenance");
    for layer in &runtime.provenance {
        println!("#   {layer}");
    }
    for warning in runtime.warnings() {
        println!("# warning: {warning}");
    }
    Ok(())
}
