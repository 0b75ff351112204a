#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use plugin_inventory::central_config::{CentralConfigError, CentralConfigYamlReader};
use plugin_inventory::{
    CENTRAL_CONFIG_FILE_NAME, INVENTORY_DB_FILE_NAME, INVENTORY_METADATA_DB_FILE_NAME,
    InventoryError, InventoryMetadata, PluginGroup, PluginGroupFilter, PluginGroupIdentifier,
    PluginIdentifier, PluginInventory, PluginInventoryEntry, PluginInventoryFilter, SqliteInventory,
    SqliteInventoryMetadata, Target, VERSION_LATEST, remove_duplicate_plugin_groups,
    remove_duplicate_plugin_inventory_entries,
};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::archive::create_tar_gz;
use super::{
    ImageCopyInfo, ImagePublishInfo, PLUGIN_INVENTORY_IMAGE_TAR, PLUGIN_MIGRATION_MANIFEST_FILE,
    PluginMigrationManifest,
};
use crate::images::{
    ImageOperations, image_repository_base, metadata_image_name, relative_image_path,
};
use crate::signature::{InventoryImageVerifier, SignatureVerifier};

/// Central configuration key overriding the essentials group name.
pub const ESSENTIALS_GROUP_NAME_KEY: &str = "cli.core.essentials_plugin_group_name";

#[derive(Debug, Clone, Default)]
pub struct DownloadPluginBundleOptions {
    pub plugin_inventory_image: String,
    /// Destination archive. Only optional for dry runs.
    pub to_tar: Option<PathBuf>,
    pub groups: Vec<String>,
    pub plugins: Vec<String>,
    /// Group appended to every explicit selection; failures to resolve it are logged.
    pub essentials_plugin_group: Option<String>,
    pub refresh_configuration_only: bool,
    pub dry_run: bool,
}

/// Image listing printed by a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunListing {
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    DryRun(DryRunListing),
    Bundle {
        path: PathBuf,
        manifest: PluginMigrationManifest,
    },
}

#[derive(Debug, Default)]
struct Selection {
    plugins: Vec<PluginInventoryEntry>,
    groups: Vec<PluginGroup>,
}

struct GroupRequest {
    id: String,
    implicit: bool,
}

pub struct PluginBundleDownloader<I, V> {
    options: DownloadPluginBundleOptions,
    images: I,
    verifier: InventoryImageVerifier<V>,
}

impl<I: ImageOperations, V: SignatureVerifier> PluginBundleDownloader<I, V> {
    pub fn new(
        options: DownloadPluginBundleOptions,
        images: I,
        verifier: InventoryImageVerifier<V>,
    ) -> Self {
        Self {
            options,
            images,
            verifier,
        }
    }

    pub fn download_plugin_bundle(&self) -> Result<DownloadOutcome> {
        let inventory_image = self.options.plugin_inventory_image.trim();
        let to_tar = self.validate()?;
        self.verifier
            .verify_inventory_image_signature(inventory_image)?;

        let staging = TempDir::new().context("failed to create bundle staging directory")?;
        let selection = self
            .selected_plugins_and_groups(inventory_image)
            .context("error while getting selected plugin and plugin group information")?;
        info!(
            plugins = selection.plugins.len(),
            groups = selection.groups.len(),
            "resolved plugin bundle selection"
        );

        if self.options.dry_run {
            let mut images = vec![inventory_image.to_string()];
            images.extend(artifact_images(&selection.plugins));
            return Ok(DownloadOutcome::DryRun(DryRunListing { images }));
        }
        let Some(to_tar) = to_tar else {
            bail!("a destination tar file is required");
        };

        let images_to_copy = self
            .save_images(inventory_image, &selection.plugins, staging.path())
            .context("error while downloading and saving plugin images")?;
        let metadata_db = staging.path().join(INVENTORY_METADATA_DB_FILE_NAME);
        save_metadata_snapshot(&metadata_db, &selection)
            .context("error while saving plugin inventory metadata")?;

        let base = image_repository_base(inventory_image);
        let manifest = PluginMigrationManifest {
            relative_inventory_image_path_with_tag: relative_image_path(
                inventory_image,
                base,
                true,
            ),
            inventory_metadata_image: ImagePublishInfo {
                source_file_path: INVENTORY_METADATA_DB_FILE_NAME.to_string(),
                relative_image_path_with_tag: relative_image_path(
                    &metadata_image_name(inventory_image),
                    base,
                    true,
                ),
            },
            images_to_copy,
        };
        manifest
            .write(&staging.path().join(PLUGIN_MIGRATION_MANIFEST_FILE))
            .context("error while saving plugin migration manifest")?;

        create_tar_gz(staging.path(), &to_tar)
            .with_context(|| format!("error while creating tar file '{}'", to_tar.display()))?;
        info!(path = %to_tar.display(), images = manifest.images_to_copy.len(), "saved plugin bundle");
        Ok(DownloadOutcome::Bundle {
            path: to_tar,
            manifest,
        })
    }

    fn validate(&self) -> Result<Option<PathBuf>> {
        if self.options.plugin_inventory_image.trim().is_empty() {
            bail!("plugin inventory image is required");
        }
        let Some(to_tar) = &self.options.to_tar else {
            if self.options.dry_run {
                return Ok(None);
            }
            bail!("a destination tar file is required");
        };
        let parent = match to_tar.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !parent.is_dir() {
            bail!(
                "invalid path for '{}': directory '{}' does not exist",
                to_tar.display(),
                parent.display()
            );
        }
        if to_tar.exists() && !self.options.dry_run {
            bail!("file already exists: '{}'", to_tar.display());
        }
        Ok(Some(to_tar.clone()))
    }

    fn selected_plugins_and_groups(&self, inventory_image: &str) -> Result<Selection> {
        let scratch = TempDir::new().context("failed to create inventory scratch directory")?;
        self.images
            .download_image_and_save_files_to_dir(inventory_image, scratch.path())
            .with_context(|| {
                format!("failed to download plugin inventory image '{inventory_image}'")
            })?;
        let inventory = SqliteInventory::new(
            scratch.path().join(INVENTORY_DB_FILE_NAME),
            image_repository_base(inventory_image),
        );

        if self.options.refresh_configuration_only {
            debug!("refreshing configuration only; no plugins selected");
            return Ok(Selection::default());
        }

        if self.options.groups.is_empty() && self.options.plugins.is_empty() {
            let plugins = inventory.get_all_plugins()?;
            let groups = inventory.get_plugin_groups(&PluginGroupFilter {
                include_hidden: true,
                ..Default::default()
            })?;
            return Ok(Selection {
                plugins: remove_duplicate_plugin_inventory_entries(plugins),
                groups: remove_duplicate_plugin_groups(groups),
            });
        }

        let mut requests: Vec<GroupRequest> = self
            .options
            .groups
            .iter()
            .map(|id| GroupRequest {
                id: id.trim().to_string(),
                implicit: false,
            })
            .collect();
        if let Some(essentials) = self.essentials_group(scratch.path()) {
            requests.push(GroupRequest {
                id: essentials,
                implicit: true,
            });
        }

        let mut selection = Selection::default();
        for request in &requests {
            match resolve_group(&inventory, &request.id) {
                Ok((groups, plugins)) => {
                    selection.groups.extend(groups);
                    selection.plugins.extend(plugins);
                }
                Err(err) if request.implicit => {
                    info!(
                        group = %request.id,
                        error = %format!("{err:#}"),
                        "essentials plugin group is unavailable; skipping it"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        for id in &self.options.plugins {
            selection.plugins.push(resolve_plugin(&inventory, id.trim())?);
        }

        Ok(Selection {
            plugins: remove_duplicate_plugin_inventory_entries(selection.plugins),
            groups: remove_duplicate_plugin_groups(selection.groups),
        })
    }

    fn essentials_group(&self, inventory_dir: &Path) -> Option<String> {
        let central_config = inventory_dir.join(CENTRAL_CONFIG_FILE_NAME);
        if central_config.exists() {
            let reader = CentralConfigYamlReader::new(&central_config);
            match reader.get_entry::<String>(ESSENTIALS_GROUP_NAME_KEY) {
                Ok(name) if !name.trim().is_empty() => return Some(name.trim().to_string()),
                Ok(_) | Err(CentralConfigError::KeyNotFound { .. }) => {}
                Err(err) => warn!(error = %err, "ignoring central configuration"),
            }
        }
        self.options
            .essentials_plugin_group
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    fn save_images(
        &self,
        inventory_image: &str,
        plugins: &[PluginInventoryEntry],
        staging: &Path,
    ) -> Result<Vec<ImageCopyInfo>> {
        let base = image_repository_base(inventory_image);
        let mut copied = Vec::new();
        let mut seen = HashSet::new();

        self.images
            .copy_image_to_tar(inventory_image, &staging.join(PLUGIN_INVENTORY_IMAGE_TAR))
            .with_context(|| {
                format!("failed to download plugin inventory image '{inventory_image}'")
            })?;
        copied.push(ImageCopyInfo {
            source_tar_file_path: PLUGIN_INVENTORY_IMAGE_TAR.to_string(),
            relative_image_path: relative_image_path(inventory_image, base, false),
        });

        for plugin in plugins {
            for (version, artifacts) in &plugin.artifacts {
                for artifact in artifacts {
                    if !seen.insert(artifact.image.as_str()) {
                        debug!(image = %artifact.image, "plugin image already bundled");
                        continue;
                    }
                    let file_name = format!(
                        "{}-{}-{}_{}-{}.tar.gz",
                        plugin.name, plugin.target, artifact.os, artifact.arch, version
                    );
                    info!(image = %artifact.image, "downloading plugin image");
                    self.images
                        .copy_image_to_tar(&artifact.image, &staging.join(&file_name))
                        .with_context(|| {
                            format!("failed to download image '{}'", artifact.image)
                        })?;
                    copied.push(ImageCopyInfo {
                        source_tar_file_path: file_name,
                        relative_image_path: relative_image_path(&artifact.image, base, false),
                    });
                }
            }
        }
        Ok(copied)
    }
}

fn artifact_images(plugins: &[PluginInventoryEntry]) -> Vec<String> {
    plugins
        .iter()
        .flat_map(|plugin| plugin.artifacts.values())
        .flatten()
        .map(|artifact| artifact.image.clone())
        .fold(Vec::new(), |mut images, image| {
            if !images.contains(&image) {
                images.push(image);
            }
            images
        })
}

/// Resolve a group id to its matching groups and, for each, the recommended version
/// of every plugin it references.
fn resolve_group(
    inventory: &SqliteInventory,
    id: &str,
) -> Result<(Vec<PluginGroup>, Vec<PluginInventoryEntry>)> {
    let mut group_id = PluginGroupIdentifier::from_id(id)?;
    if group_id.version.is_empty() {
        group_id.version = VERSION_LATEST.to_string();
    }
    let groups = inventory.get_plugin_groups(&PluginGroupFilter {
        include_hidden: true,
        ..PluginGroupFilter::from(&group_id)
    })?;
    if groups.is_empty() {
        return Err(InventoryError::IncorrectPluginGroup { id: id.to_string() }.into());
    }

    let mut plugins = Vec::new();
    for group in &groups {
        for (group_version, members) in &group.versions {
            for member in members {
                let version = if member.plugin.version.is_empty() {
                    VERSION_LATEST.to_string()
                } else {
                    member.plugin.version.clone()
                };
                let found = inventory.get_plugins(&PluginInventoryFilter {
                    name: Some(member.plugin.name.clone()),
                    target: Some(member.plugin.target),
                    version: Some(version),
                    include_hidden: true,
                    ..Default::default()
                })?;
                if found.is_empty() {
                    bail!(
                        "unable to find plugin '{}' referenced by plugin group '{}:{}'",
                        member.plugin,
                        group.id(),
                        group_version
                    );
                }
                for mut entry in found {
                    entry.retain_recommended_version();
                    plugins.push(entry);
                }
            }
        }
    }
    Ok((groups, plugins))
}

/// Resolve `name[@target][:version]` to exactly one inventory entry.
fn resolve_plugin(inventory: &SqliteInventory, id: &str) -> Result<PluginInventoryEntry> {
    let plugin_id = PluginIdentifier::from_id(id)?;
    let version = if plugin_id.version.is_empty() {
        VERSION_LATEST.to_string()
    } else {
        plugin_id.version.clone()
    };
    let mut found = inventory.get_plugins(&PluginInventoryFilter {
        name: Some(plugin_id.name.clone()),
        target: (plugin_id.target != Target::Unknown).then_some(plugin_id.target),
        version: Some(version),
        include_hidden: true,
        ..Default::default()
    })?;
    match found.len() {
        0 => Err(InventoryError::IncorrectPlugin { id: id.to_string() }.into()),
        1 => Ok(found.remove(0)),
        _ => bail!(
            "unable to uniquely identify plugin '{id}'; specify the target with '{}@<target>'",
            plugin_id.name
        ),
    }
}

fn save_metadata_snapshot(path: &Path, selection: &Selection) -> Result<()> {
    let metadata = SqliteInventoryMetadata::new(path);
    metadata.create_inventory_metadata_db_schema()?;
    for plugin in &selection.plugins {
        for version in plugin.artifacts.keys() {
            metadata.insert_plugin_identifier(&PluginIdentifier {
                name: plugin.name.clone(),
                target: plugin.target,
                version: version.clone(),
            })?;
        }
    }
    for group in &selection.groups {
        for version in group.versions.keys() {
            metadata.insert_plugin_group_identifier(&PluginGroupIdentifier {
                vendor: group.vendor.clone(),
                publisher: group.publisher.clone(),
                name: group.name.clone(),
                version: version.clone(),
            })?;
        }
    }
    Ok(())
}
