#![forbid(unsafe_code)]

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use plugin_inventory::{INVENTORY_METADATA_DB_FILE_NAME, InventoryMetadata, SqliteInventoryMetadata};
use tempfile::TempDir;
use tracing::info;

use super::archive::extract_tar_gz;
use super::{PLUGIN_MIGRATION_MANIFEST_FILE, PluginMigrationManifest};
use crate::images::{ImageOperations, join_image_path};

#[derive(Debug, Clone, Default)]
pub struct UploadPluginBundleOptions {
    pub tar: PathBuf,
    /// Repository root the bundle's relative image paths are published under.
    pub to_repo: String,
}

pub struct PluginBundleUploader<I> {
    options: UploadPluginBundleOptions,
    images: I,
}

impl<I: ImageOperations> PluginBundleUploader<I> {
    pub fn new(options: UploadPluginBundleOptions, images: I) -> Self {
        Self { options, images }
    }

    /// Publish every image of the bundle and the merged metadata image.
    ///
    /// Returns the inventory image at the destination.
    pub fn upload_plugin_bundle(&self) -> Result<String> {
        let to_repo = self.options.to_repo.trim();
        if to_repo.is_empty() {
            bail!("destination repository is required");
        }

        let extracted = TempDir::new().context("failed to create bundle extraction directory")?;
        let root = extract_tar_gz(&self.options.tar, extracted.path())?;
        let manifest = read_manifest(&root, &self.options.tar)?;

        for image in &manifest.images_to_copy {
            let source = root.join(&image.source_tar_file_path);
            let destination = join_image_path(to_repo, &image.relative_image_path);
            info!(image = %destination, "uploading image");
            self.images
                .copy_image_from_tar(&source, &destination)
                .with_context(|| {
                    format!(
                        "error while uploading image '{}' to '{destination}'",
                        image.source_tar_file_path
                    )
                })?;
        }

        let metadata_image = join_image_path(
            to_repo,
            &manifest.inventory_metadata_image.relative_image_path_with_tag,
        );
        let bundle_metadata_db = root.join(&manifest.inventory_metadata_image.source_file_path);
        let scratch = TempDir::new().context("failed to create metadata scratch directory")?;
        let metadata_db = self
            .merged_metadata_database(&metadata_image, &bundle_metadata_db, scratch.path())
            .context("error while merging plugin inventory metadata")?;

        self.images
            .push_image(&metadata_image, &[metadata_db])
            .with_context(|| format!("error while publishing metadata image '{metadata_image}'"))?;

        let inventory_image =
            join_image_path(to_repo, &manifest.relative_inventory_image_path_with_tag);
        info!(image = %inventory_image, "published plugin bundle");
        Ok(inventory_image)
    }

    /// Merge the bundle's identifiers into the destination's existing metadata, or
    /// fall back to the bundle's own database when the destination has none yet.
    fn merged_metadata_database(
        &self,
        metadata_image: &str,
        bundle_metadata_db: &Path,
        scratch: &Path,
    ) -> Result<PathBuf> {
        let existing = scratch.join(INVENTORY_METADATA_DB_FILE_NAME);
        match self
            .images
            .download_image_and_save_files_to_dir(metadata_image, scratch)
        {
            Ok(()) if existing.is_file() => {
                SqliteInventoryMetadata::new(&existing)
                    .merge_inventory_metadata_database(bundle_metadata_db)?;
                info!(image = metadata_image, "merged bundle metadata into existing metadata image");
                Ok(existing)
            }
            Ok(()) => {
                info!(
                    image = metadata_image,
                    "existing metadata image carries no metadata database; publishing bundle metadata"
                );
                Ok(bundle_metadata_db.to_path_buf())
            }
            Err(err) => {
                info!(
                    image = metadata_image,
                    error = %format!("{err:#}"),
                    "no existing metadata image; publishing bundle metadata"
                );
                Ok(bundle_metadata_db.to_path_buf())
            }
        }
    }
}

fn read_manifest(root: &Path, tar: &Path) -> Result<PluginMigrationManifest> {
    let path = root.join(PLUGIN_MIGRATION_MANIFEST_FILE);
    if !path.is_file() {
        bail!(
            "could not find {PLUGIN_MIGRATION_MANIFEST_FILE} in bundle '{}'",
            tar.display()
        );
    }
    let manifest = PluginMigrationManifest::read(&path)?;

    let referenced = manifest
        .images_to_copy
        .iter()
        .map(|image| image.source_tar_file_path.as_str())
        .chain(std::iter::once(
            manifest.inventory_metadata_image.source_file_path.as_str(),
        ));
    for file in referenced {
        let relative = Path::new(file);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("{PLUGIN_MIGRATION_MANIFEST_FILE} references '{file}' outside the bundle");
        }
        if !root.join(relative).is_file() {
            bail!("{PLUGIN_MIGRATION_MANIFEST_FILE} references '{file}', which is missing from the bundle");
        }
    }
    Ok(manifest)
}
