#![forbid(unsafe_code)]

//! SQLite-backed plugin inventory.
//!
//! The database has two tables: `PluginBinaries` holds one row per
//! (plugin, target, version, os, arch) and `PluginGroups` holds one row per
//! (group, group version, referenced plugin). Artifact image references are stored
//! relative to the inventory image repository and expanded with the image prefix the
//! store was opened with.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params, params_from_iter};
use tracing::debug;

use crate::error::{InventoryError, Result};
use crate::types::{
    Artifact, PluginGroup, PluginGroupFilter, PluginGroupPluginEntry, PluginIdentifier,
    PluginInventoryEntry, PluginInventoryFilter, Target,
};
use crate::version::{VersionSelector, highest_version};

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS "PluginBinaries" (
    "PluginName"         TEXT NOT NULL,
    "Target"             TEXT NOT NULL,
    "RecommendedVersion" TEXT NOT NULL,
    "Version"            TEXT NOT NULL,
    "Hidden"             INTEGER NOT NULL DEFAULT 0,
    "Description"        TEXT NOT NULL,
    "Publisher"          TEXT NOT NULL,
    "Vendor"             TEXT NOT NULL,
    "OS"                 TEXT NOT NULL,
    "Architecture"       TEXT NOT NULL,
    "Digest"             TEXT NOT NULL,
    "URI"                TEXT NOT NULL,
    "SignatureDigest"    TEXT,
    PRIMARY KEY("PluginName", "Target", "Version", "OS", "Architecture")
);
CREATE TABLE IF NOT EXISTS "PluginGroups" (
    "Vendor"        TEXT NOT NULL,
    "Publisher"     TEXT NOT NULL,
    "GroupName"     TEXT NOT NULL,
    "GroupVersion"  TEXT NOT NULL,
    "Description"   TEXT NOT NULL,
    "PluginName"    TEXT NOT NULL,
    "Target"        TEXT NOT NULL,
    "PluginVersion" TEXT NOT NULL,
    "Mandatory"     INTEGER NOT NULL DEFAULT 0,
    "Hidden"        INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY("Vendor", "Publisher", "GroupName", "GroupVersion", "PluginName", "Target")
);
"#;

/// Read/write access to a plugin inventory.
pub trait PluginInventory {
    fn get_plugins(&self, filter: &PluginInventoryFilter) -> Result<Vec<PluginInventoryEntry>>;

    fn get_all_plugins(&self) -> Result<Vec<PluginInventoryEntry>> {
        self.get_plugins(&PluginInventoryFilter {
            include_hidden: true,
            ..Default::default()
        })
    }

    fn get_plugin_groups(&self, filter: &PluginGroupFilter) -> Result<Vec<PluginGroup>>;

    fn create_schema(&self) -> Result<()>;

    fn insert_plugin(&self, entry: &PluginInventoryEntry) -> Result<()>;

    fn insert_plugin_group(&self, group: &PluginGroup, overwrite: bool) -> Result<()>;

    /// Persist the `hidden` flag of every version listed in `entry.artifacts`.
    fn update_plugin_activation_state(&self, entry: &PluginInventoryEntry) -> Result<()>;

    /// Persist the `hidden` flag of every version listed in `group.versions`.
    fn update_plugin_group_activation_state(&self, group: &PluginGroup) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct SqliteInventory {
    db_path: PathBuf,
    image_prefix: String,
    metadata_db: Option<PathBuf>,
}

impl SqliteInventory {
    pub fn new(db_path: impl Into<PathBuf>, image_prefix: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            image_prefix: image_prefix.into(),
            metadata_db: None,
        }
    }

    /// Restrict every query to plugins and groups recorded in an inventory metadata
    /// database.
    pub fn with_metadata_filter(mut self, metadata_db: impl Into<PathBuf>) -> Self {
        self.metadata_db = Some(metadata_db.into());
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_existing(&self) -> Result<Connection> {
        if !self.db_path.exists() {
            return Err(InventoryError::DatabaseMissing {
                path: self.db_path.clone(),
            });
        }
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(|source| InventoryError::Open {
                path: self.db_path.clone(),
                source,
            })?;
        if let Some(metadata) = &self.metadata_db {
            if !metadata.exists() {
                return Err(InventoryError::DatabaseMissing {
                    path: metadata.clone(),
                });
            }
            conn.execute(
                "ATTACH DATABASE ?1 AS metadata",
                params![metadata.to_string_lossy().into_owned()],
            )
            .map_err(|source| InventoryError::Open {
                path: metadata.clone(),
                source,
            })?;
        }
        Ok(conn)
    }

    fn image_for(&self, uri: &str) -> String {
        if self.image_prefix.is_empty() || has_registry_host(uri) {
            return uri.to_string();
        }
        format!(
            "{}/{}",
            self.image_prefix.trim_end_matches('/'),
            uri.trim_start_matches('/')
        )
    }

    fn uri_for(&self, image: &str) -> String {
        let prefix = self.image_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return image.to_string();
        }
        image
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(image)
            .to_string()
    }
}

/// Whether the first path component of an image reference names a registry.
fn has_registry_host(image: &str) -> bool {
    match image.split_once('/') {
        Some((first, _)) => first.contains(['.', ':']) || first == "localhost",
        None => false,
    }
}

struct PluginRow {
    name: String,
    target: String,
    recommended_version: String,
    version: String,
    hidden: bool,
    description: String,
    publisher: String,
    vendor: String,
    os: String,
    arch: String,
    digest: String,
    uri: String,
    signature_digest: Option<String>,
}

struct GroupRow {
    vendor: String,
    publisher: String,
    name: String,
    version: String,
    description: String,
    plugin_name: String,
    target: String,
    plugin_version: String,
    mandatory: bool,
    hidden: bool,
}

impl PluginInventory for SqliteInventory {
    fn get_plugins(&self, filter: &PluginInventoryFilter) -> Result<Vec<PluginInventoryEntry>> {
        let conn = self.open_existing()?;

        let mut sql = String::from(
            r#"SELECT p.PluginName, p.Target, p.RecommendedVersion, p.Version, p.Hidden,
                      p.Description, p.Publisher, p.Vendor, p.OS, p.Architecture, p.Digest,
                      p.URI, p.SignatureDigest
               FROM PluginBinaries p WHERE 1 = 1"#,
        );
        let mut args: Vec<String> = Vec::new();
        let mut constrain = |column: &str, value: Option<&str>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                sql.push_str(&format!(" AND p.{column} = ?"));
                args.push(value.to_string());
            }
        };
        constrain("PluginName", filter.name.as_deref());
        constrain(
            "Target",
            filter
                .target
                .filter(|t| *t != Target::Unknown)
                .map(|t| t.as_str()),
        );
        constrain("OS", filter.os.as_deref());
        constrain("Architecture", filter.arch.as_deref());
        constrain("Publisher", filter.publisher.as_deref());
        constrain("Vendor", filter.vendor.as_deref());
        if !filter.include_hidden {
            sql.push_str(" AND p.Hidden = 0");
        }
        if self.metadata_db.is_some() {
            sql.push_str(
                r#" AND EXISTS (SELECT 1 FROM metadata.AvailablePluginBinaries m
                                WHERE m.PluginName = p.PluginName AND m.Target = p.Target
                                  AND m.Version = p.Version)"#,
            );
        }
        sql.push_str(" ORDER BY p.PluginName, p.Target, p.Version, p.OS, p.Architecture");

        debug!(query = %sql, "querying plugin inventory");
        let mut stmt = conn.prepare(&sql).map_err(InventoryError::Query)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(PluginRow {
                    name: row.get(0)?,
                    target: row.get(1)?,
                    recommended_version: row.get(2)?,
                    version: row.get(3)?,
                    hidden: row.get(4)?,
                    description: row.get(5)?,
                    publisher: row.get(6)?,
                    vendor: row.get(7)?,
                    os: row.get(8)?,
                    arch: row.get(9)?,
                    digest: row.get(10)?,
                    uri: row.get(11)?,
                    signature_digest: row.get(12)?,
                })
            })
            .map_err(InventoryError::Query)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(InventoryError::Query)?;

        let selector = VersionSelector::parse(filter.version.as_deref());
        Ok(self.rows_to_entries(rows, &selector))
    }

    fn get_plugin_groups(&self, filter: &PluginGroupFilter) -> Result<Vec<PluginGroup>> {
        let conn = self.open_existing()?;

        let mut sql = String::from(
            r#"SELECT g.Vendor, g.Publisher, g.GroupName, g.GroupVersion, g.Description,
                      g.PluginName, g.Target, g.PluginVersion, g.Mandatory, g.Hidden
               FROM PluginGroups g WHERE 1 = 1"#,
        );
        let mut args: Vec<String> = Vec::new();
        for (column, value) in [
            ("Vendor", filter.vendor.as_deref()),
            ("Publisher", filter.publisher.as_deref()),
            ("GroupName", filter.name.as_deref()),
        ] {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                sql.push_str(&format!(" AND g.{column} = ?"));
                args.push(value.to_string());
            }
        }
        if !filter.include_hidden {
            sql.push_str(" AND g.Hidden = 0");
        }
        if self.metadata_db.is_some() {
            sql.push_str(
                r#" AND EXISTS (SELECT 1 FROM metadata.AvailablePluginGroups m
                                WHERE m.Vendor = g.Vendor AND m.Publisher = g.Publisher
                                  AND m.GroupName = g.GroupName
                                  AND m.GroupVersion = g.GroupVersion)"#,
            );
        }
        sql.push_str(" ORDER BY g.Vendor, g.Publisher, g.GroupName, g.GroupVersion, g.rowid");

        debug!(query = %sql, "querying plugin groups");
        let mut stmt = conn.prepare(&sql).map_err(InventoryError::Query)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(GroupRow {
                    vendor: row.get(0)?,
                    publisher: row.get(1)?,
                    name: row.get(2)?,
                    version: row.get(3)?,
                    description: row.get(4)?,
                    plugin_name: row.get(5)?,
                    target: row.get(6)?,
                    plugin_version: row.get(7)?,
                    mandatory: row.get(8)?,
                    hidden: row.get(9)?,
                })
            })
            .map_err(InventoryError::Query)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(InventoryError::Query)?;

        let selector = VersionSelector::parse(filter.version.as_deref());
        Ok(rows_to_groups(rows, &selector))
    }

    fn create_schema(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path).map_err(|source| InventoryError::Open {
            path: self.db_path.clone(),
            source,
        })?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(InventoryError::Schema)
    }

    fn insert_plugin(&self, entry: &PluginInventoryEntry) -> Result<()> {
        entry.validate()?;
        let mut conn = self.open_existing()?;
        let tx = conn.transaction().map_err(InventoryError::Query)?;
        for (version, artifacts) in &entry.artifacts {
            for artifact in artifacts {
                tx.execute(
                    r#"INSERT INTO PluginBinaries
                       (PluginName, Target, RecommendedVersion, Version, Hidden, Description,
                        Publisher, Vendor, OS, Architecture, Digest, URI, SignatureDigest)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
                    params![
                        entry.name,
                        entry.target.as_str(),
                        entry.recommended_version,
                        version,
                        entry.hidden,
                        entry.description,
                        entry.publisher,
                        entry.vendor,
                        artifact.os,
                        artifact.arch,
                        artifact.digest,
                        self.uri_for(&artifact.image),
                        artifact.signature_digest,
                    ],
                )
                .map_err(|source| InventoryError::Insert {
                    what: format!(
                        "plugin {}@{} {} {}/{}",
                        entry.name, entry.target, version, artifact.os, artifact.arch
                    ),
                    source,
                })?;
            }
        }
        tx.commit().map_err(InventoryError::Query)
    }

    fn insert_plugin_group(&self, group: &PluginGroup, overwrite: bool) -> Result<()> {
        let mut conn = self.open_existing()?;
        let tx = conn.transaction().map_err(InventoryError::Query)?;
        for (version, plugins) in &group.versions {
            let existing: i64 = tx
                .query_row(
                    r#"SELECT COUNT(*) FROM PluginGroups
                       WHERE Vendor = ?1 AND Publisher = ?2 AND GroupName = ?3
                         AND GroupVersion = ?4"#,
                    params![group.vendor, group.publisher, group.name, version],
                    |row| row.get(0),
                )
                .map_err(InventoryError::Query)?;
            if existing > 0 {
                if !overwrite {
                    debug!(group = %group.id(), %version, "plugin group version already present");
                    continue;
                }
                tx.execute(
                    r#"DELETE FROM PluginGroups
                       WHERE Vendor = ?1 AND Publisher = ?2 AND GroupName = ?3
                         AND GroupVersion = ?4"#,
                    params![group.vendor, group.publisher, group.name, version],
                )
                .map_err(InventoryError::Query)?;
            }
            for entry in plugins {
                tx.execute(
                    r#"INSERT INTO PluginGroups
                       (Vendor, Publisher, GroupName, GroupVersion, Description, PluginName,
                        Target, PluginVersion, Mandatory, Hidden)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                    params![
                        group.vendor,
                        group.publisher,
                        group.name,
                        version,
                        group.description,
                        entry.plugin.name,
                        entry.plugin.target.as_str(),
                        entry.plugin.version,
                        entry.mandatory,
                        group.hidden,
                    ],
                )
                .map_err(|source| InventoryError::Insert {
                    what: format!(
                        "plugin group {}:{} entry {}",
                        group.id(),
                        version,
                        entry.plugin
                    ),
                    source,
                })?;
            }
        }
        tx.commit().map_err(InventoryError::Query)
    }

    fn update_plugin_activation_state(&self, entry: &PluginInventoryEntry) -> Result<()> {
        let mut conn = self.open_existing()?;
        let tx = conn.transaction().map_err(InventoryError::Query)?;
        for version in entry.artifacts.keys() {
            let changed = tx
                .execute(
                    r#"UPDATE PluginBinaries SET Hidden = ?1
                       WHERE PluginName = ?2 AND Target = ?3 AND Version = ?4"#,
                    params![entry.hidden, entry.name, entry.target.as_str(), version],
                )
                .map_err(InventoryError::Query)?;
            if changed == 0 {
                return Err(InventoryError::Update {
                    what: format!("plugin {}@{}:{}", entry.name, entry.target, version),
                    reason: "no such plugin version in the inventory".to_string(),
                });
            }
        }
        tx.commit().map_err(InventoryError::Query)
    }

    fn update_plugin_group_activation_state(&self, group: &PluginGroup) -> Result<()> {
        let mut conn = self.open_existing()?;
        let tx = conn.transaction().map_err(InventoryError::Query)?;
        for version in group.versions.keys() {
            let changed = tx
                .execute(
                    r#"UPDATE PluginGroups SET Hidden = ?1
                       WHERE Vendor = ?2 AND Publisher = ?3 AND GroupName = ?4
                         AND GroupVersion = ?5"#,
                    params![
                        group.hidden,
                        group.vendor,
                        group.publisher,
                        group.name,
                        version
                    ],
                )
                .map_err(InventoryError::Query)?;
            if changed == 0 {
                return Err(InventoryError::Update {
                    what: format!("plugin group {}:{}", group.id(), version),
                    reason: "no such plugin group version in the inventory".to_string(),
                });
            }
        }
        tx.commit().map_err(InventoryError::Query)
    }
}

impl SqliteInventory {
    fn rows_to_entries(
        &self,
        rows: Vec<PluginRow>,
        selector: &VersionSelector,
    ) -> Vec<PluginInventoryEntry> {
        // Rows arrive sorted by (name, target) so consecutive rows build one entry.
        let mut entries: Vec<(PluginInventoryEntry, bool)> = Vec::new();
        for row in rows {
            let target = Target::parse(&row.target);
            let same = entries
                .last()
                .is_some_and(|(e, _)| e.name == row.name && e.target == target);
            if !same {
                entries.push((
                    PluginInventoryEntry {
                        name: row.name.clone(),
                        target,
                        vendor: row.vendor.clone(),
                        publisher: row.publisher.clone(),
                        description: row.description.clone(),
                        hidden: row.hidden,
                        recommended_version: row.recommended_version.clone(),
                        artifacts: BTreeMap::new(),
                    },
                    row.hidden,
                ));
            }
            let Some((entry, all_hidden)) = entries.last_mut() else {
                continue;
            };
            *all_hidden &= row.hidden;
            entry
                .artifacts
                .entry(row.version)
                .or_default()
                .push(Artifact {
                    os: row.os,
                    arch: row.arch,
                    digest: row.digest,
                    image: self.image_for(&row.uri),
                    signature_digest: row.signature_digest,
                });
        }

        entries
            .into_iter()
            .filter_map(|(mut entry, all_hidden)| {
                entry.hidden = all_hidden;
                apply_plugin_version_selector(&mut entry, selector);
                (!entry.artifacts.is_empty()).then_some(entry)
            })
            .collect()
    }
}

/// Narrow `artifacts` to the selected versions and keep `recommended_version`
/// pointing at one of the remaining versions.
fn apply_plugin_version_selector(entry: &mut PluginInventoryEntry, selector: &VersionSelector) {
    match selector {
        VersionSelector::Exact(_) | VersionSelector::Partial { .. } => {
            entry.artifacts.retain(|version, _| selector.matches(version));
            if let Some(highest) = highest_version(entry.artifacts.keys()) {
                entry.recommended_version = highest.to_string();
            }
        }
        VersionSelector::All | VersionSelector::Latest => {
            // Hidden or unpublished rows may have removed the recommended version.
            if !entry.artifacts.contains_key(&entry.recommended_version)
                && let Some(highest) = highest_version(entry.artifacts.keys())
            {
                entry.recommended_version = highest.to_string();
            }
            if *selector == VersionSelector::Latest {
                entry.retain_recommended_version();
            }
        }
    }
}

fn rows_to_groups(rows: Vec<GroupRow>, selector: &VersionSelector) -> Vec<PluginGroup> {
    let mut groups: Vec<(PluginGroup, bool, BTreeMap<String, String>)> = Vec::new();
    for row in rows {
        let same = groups.last().is_some_and(|(g, _, _)| {
            g.vendor == row.vendor && g.publisher == row.publisher && g.name == row.name
        });
        if !same {
            groups.push((
                PluginGroup {
                    vendor: row.vendor.clone(),
                    publisher: row.publisher.clone(),
                    name: row.name.clone(),
                    description: row.description.clone(),
                    hidden: row.hidden,
                    recommended_version: String::new(),
                    versions: BTreeMap::new(),
                },
                row.hidden,
                BTreeMap::new(),
            ));
        }
        let Some((group, all_hidden, descriptions)) = groups.last_mut() else {
            continue;
        };
        *all_hidden &= row.hidden;
        descriptions.insert(row.version.clone(), row.description);
        group
            .versions
            .entry(row.version)
            .or_default()
            .push(PluginGroupPluginEntry {
                plugin: PluginIdentifier {
                    name: row.plugin_name,
                    target: Target::parse(&row.target),
                    version: row.plugin_version,
                },
                mandatory: row.mandatory,
            });
    }

    groups
        .into_iter()
        .filter_map(|(mut group, all_hidden, descriptions)| {
            group.hidden = all_hidden;
            group.recommended_version = highest_version(group.versions.keys())?.to_string();
            match selector {
                VersionSelector::All => {}
                VersionSelector::Latest => {
                    let recommended = group.recommended_version.clone();
                    group.versions.retain(|version, _| *version == recommended);
                }
                VersionSelector::Exact(_) | VersionSelector::Partial { .. } => {
                    group.versions.retain(|version, _| selector.matches(version));
                    group.recommended_version =
                        highest_version(group.versions.keys())?.to_string();
                }
            }
            if let Some(description) = descriptions.get(&group.recommended_version) {
                group.description = description.clone();
            }
            Some(group)
        })
        .collect()
}
