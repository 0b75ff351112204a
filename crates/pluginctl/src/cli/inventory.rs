#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plugin_inventory::{
    PluginGroupFilter, PluginInventory, PluginInventoryFilter, SqliteInventory, Target,
};

#[derive(Debug, Subcommand)]
pub enum InventoryCommand {
    /// List plugins in an inventory database
    Plugins(PluginsArgs),
    /// List plugin groups in an inventory database
    Groups(GroupsArgs),
}

#[derive(Debug, Clone, Parser)]
pub struct DatabaseArgs {
    /// Inventory database file
    #[arg(long, value_name = "FILE")]
    pub db: PathBuf,

    /// Only show entries published to a repository with this metadata database
    #[arg(long = "metadata-db", value_name = "FILE")]
    pub metadata_db: Option<PathBuf>,

    /// Repository prefix prepended to relative artifact paths
    #[arg(long = "image-prefix", value_name = "REPO", default_value = "")]
    pub image_prefix: String,

    /// Include hidden entries
    #[arg(long = "include-hidden")]
    pub include_hidden: bool,
}

impl DatabaseArgs {
    fn inventory(&self) -> SqliteInventory {
        let inventory = SqliteInventory::new(&self.db, self.image_prefix.clone());
        match &self.metadata_db {
            Some(metadata) => inventory.with_metadata_filter(metadata),
            None => inventory,
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct PluginsArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,
    #[arg(long)]
    pub name: Option<String>,
    /// global, kubernetes (k8s), mission-control (tmc) or operations (ops)
    #[arg(long)]
    pub target: Option<String>,
    /// Exact version, partial version (v1, v1.2) or `latest`
    #[arg(long)]
    pub version: Option<String>,
    #[arg(long)]
    pub os: Option<String>,
    #[arg(long)]
    pub arch: Option<String>,
    #[arg(long)]
    pub vendor: Option<String>,
    #[arg(long)]
    pub publisher: Option<String>,
}

#[derive(Debug, Clone, Parser)]
pub struct GroupsArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,
    #[arg(long)]
    pub vendor: Option<String>,
    #[arg(long)]
    pub publisher: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub version: Option<String>,
}

pub fn handle(cmd: InventoryCommand, json: bool) -> Result<()> {
    match cmd {
        InventoryCommand::Plugins(args) => plugins(args, json),
        InventoryCommand::Groups(args) => groups(args, json),
    }
}

fn plugins(args: PluginsArgs, json: bool) -> Result<()> {
    let target = match args.target.as_deref() {
        Some(raw) => {
            let target = Target::parse(raw);
            if target == Target::Unknown {
                anyhow::bail!("unknown plugin target '{raw}'");
            }
            Some(target)
        }
        None => None,
    };
    let filter = PluginInventoryFilter {
        name: args.name,
        target,
        version: args.version,
        os: args.os,
        arch: args.arch,
        publisher: args.publisher,
        vendor: args.vendor,
        include_hidden: args.database.include_hidden,
    };
    let entries = args
        .database
        .inventory()
        .get_plugins(&filter)
        .with_context(|| format!("failed to query {}", args.database.db.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        let versions: Vec<&str> = entry.artifacts.keys().map(String::as_str).collect();
        println!(
            "{}@{}  recommended: {}  versions: {}{}",
            entry.name,
            entry.target,
            entry.recommended_version,
            versions.join(", "),
            if entry.hidden { "  (hidden)" } else { "" }
        );
    }
    Ok(())
}

fn groups(args: GroupsArgs, json: bool) -> Result<()> {
    let filter = PluginGroupFilter {
        vendor: args.vendor,
        publisher: args.publisher,
        name: args.name,
        version: args.version,
        include_hidden: args.database.include_hidden,
    };
    let groups = args
        .database
        .inventory()
        .get_plugin_groups(&filter)
        .with_context(|| format!("failed to query {}", args.database.db.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }
    for group in &groups {
        for (version, plugins) in &group.versions {
            println!(
                "{}:{}  plugins: {}{}",
                group.id(),
                version,
                plugins.len(),
                if *version == group.recommended_version {
                    "  (recommended)"
                } else {
                    ""
                }
            );
        }
    }
    Ok(())
}
