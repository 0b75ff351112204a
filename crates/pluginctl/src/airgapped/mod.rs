#![forbid(unsafe_code)]

//! Air-gapped plugin bundles: build a portable tar of selected plugin images and
//! publish it to a disconnected registry.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod archive;
pub mod download;
pub mod upload;

pub use download::{DownloadOutcome, DownloadPluginBundleOptions, PluginBundleDownloader};
pub use upload::{PluginBundleUploader, UploadPluginBundleOptions};

pub const PLUGIN_BUNDLE_DIR: &str = "plugin_bundle";
pub const PLUGIN_MIGRATION_MANIFEST_FILE: &str = "plugin_migration_manifest.yaml";
pub const PLUGIN_INVENTORY_IMAGE_TAR: &str = "plugin-inventory-image.tar.gz";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMigrationManifest {
    pub relative_inventory_image_path_with_tag: String,
    pub inventory_metadata_image: ImagePublishInfo,
    #[serde(default)]
    pub images_to_copy: Vec<ImageCopyInfo>,
}

/// A file pushed as a standalone image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePublishInfo {
    pub source_file_path: String,
    pub relative_image_path_with_tag: String,
}

/// An image tarball and the repository path it is copied to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCopyInfo {
    pub source_tar_file_path: String,
    pub relative_image_path: String,
}

impl PluginMigrationManifest {
    pub fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!(
                "failed to read {PLUGIN_MIGRATION_MANIFEST_FILE} at {}",
                path.display()
            )
        })?;
        serde_yaml_bw::from_str(&contents)
            .with_context(|| format!("{PLUGIN_MIGRATION_MANIFEST_FILE} is not a valid manifest"))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let contents =
            serde_yaml_bw::to_string(self).context("failed to encode plugin migration manifest")?;
        fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
    }
}
