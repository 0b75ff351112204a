#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::airgapped::{
    DownloadOutcome, DownloadPluginBundleOptions, PluginBundleDownloader, PluginBundleUploader,
    UploadPluginBundleOptions,
};
use crate::images::{ImageOperations, OciImageOperations};
use crate::runtime::RuntimeContext;
use crate::signature::{
    Ed25519SignatureVerifier, InventoryImageVerifier, SignatureVerifier, UnconfiguredVerifier,
};

#[derive(Debug, Subcommand)]
pub enum PluginCommand {
    /// Download plugin images into a bundle for an air-gapped registry
    DownloadBundle(DownloadBundleArgs),
    /// Publish a plugin bundle to a registry
    UploadBundle(UploadBundleArgs),
}

#[derive(Debug, Clone, Parser)]
pub struct DownloadBundleArgs {
    /// Destination bundle archive (must not exist)
    #[arg(long = "to-tar", value_name = "FILE")]
    pub to_tar: Option<PathBuf>,

    /// Plugin inventory image (defaults to the configured inventory image)
    #[arg(long, value_name = "REF")]
    pub image: Option<String>,

    /// Plugin groups to include, as vendor-publisher/name[:version]
    #[arg(long = "group", value_name = "ID", value_delimiter = ',')]
    pub groups: Vec<String>,

    /// Plugins to include, as name[@target][:version]
    #[arg(long = "plugin", value_name = "ID", value_delimiter = ',')]
    pub plugins: Vec<String>,

    /// Only refresh the inventory and its central configuration
    #[arg(long = "refresh-configuration-only")]
    pub refresh_configuration_only: bool,

    /// List the images that would be downloaded without downloading them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct UploadBundleArgs {
    /// Bundle archive produced by download-bundle
    #[arg(long, value_name = "FILE")]
    pub tar: PathBuf,

    /// Destination repository, e.g. registry.internal/cli/plugins
    #[arg(long = "to-repo", value_name = "REPO")]
    pub to_repo: String,
}

pub fn handle(cmd: PluginCommand, json: bool, runtime: &RuntimeContext) -> Result<()> {
    let images = OciImageOperations::new(runtime.settings.clone())?;
    match cmd {
        PluginCommand::DownloadBundle(args) => download_bundle(args, json, runtime, &images),
        PluginCommand::UploadBundle(args) => upload_bundle(args, json, &images),
    }
}

fn signature_verifier<'a, I: ImageOperations + 'a>(
    runtime: &RuntimeContext,
    images: I,
) -> Result<Box<dyn SignatureVerifier + 'a>> {
    Ok(match &runtime.settings.signature.public_key {
        Some(path) => Box::new(
            Ed25519SignatureVerifier::from_pem_file(images, path)
                .with_context(|| format!("invalid signature public key {}", path.display()))?,
        ),
        None => Box::new(UnconfiguredVerifier),
    })
}

pub fn download_bundle<I: ImageOperations>(
    args: DownloadBundleArgs,
    json: bool,
    runtime: &RuntimeContext,
    images: &I,
) -> Result<()> {
    let settings = &runtime.settings;
    let options = DownloadPluginBundleOptions {
        plugin_inventory_image: args
            .image
            .unwrap_or_else(|| settings.plugin_inventory_image.clone()),
        to_tar: args.to_tar,
        groups: args.groups,
        plugins: args.plugins,
        essentials_plugin_group: Some(settings.essentials_plugin_group.clone()),
        refresh_configuration_only: args.refresh_configuration_only,
        dry_run: args.dry_run,
    };
    let verifier = InventoryImageVerifier::new(settings.clone(), signature_verifier(runtime, images)?);
    let downloader = PluginBundleDownloader::new(options, images, verifier);

    match downloader.download_plugin_bundle()? {
        DownloadOutcome::DryRun(listing) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                print!("{}", serde_yaml_bw::to_string(&listing)?);
            }
        }
        DownloadOutcome::Bundle { path, manifest } => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "status": "saved",
                        "bundle": path,
                        "images": manifest.images_to_copy.len(),
                    }))?
                );
            } else {
                println!(
                    "saved plugin bundle\n  bundle: {}\n  images: {}",
                    path.display(),
                    manifest.images_to_copy.len()
                );
            }
        }
    }
    Ok(())
}

pub fn upload_bundle<I: ImageOperations>(
    args: UploadBundleArgs,
    json: bool,
    images: &I,
) -> Result<()> {
    let uploader = PluginBundleUploader::new(
        UploadPluginBundleOptions {
            tar: args.tar,
            to_repo: args.to_repo,
        },
        images,
    );
    let inventory_image = uploader.upload_plugin_bundle()?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "published",
                "inventory_image": inventory_image,
            }))?
        );
    } else {
        println!("published plugin bundle\n  inventory image: {inventory_image}");
    }
    Ok(())
}
