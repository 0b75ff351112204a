#![forbid(unsafe_code)]

//! Publication metadata: which plugin and plugin-group versions have been pushed to
//! a repository. Only identifiers are recorded, never artifact locations.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use tracing::debug;

use crate::error::{InventoryError, Result};
use crate::types::{PluginGroupIdentifier, PluginIdentifier, Target};

const CREATE_METADATA_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS "AvailablePluginBinaries" (
    "PluginName" TEXT NOT NULL,
    "Target"     TEXT NOT NULL,
    "Version"    TEXT NOT NULL,
    PRIMARY KEY("PluginName", "Target", "Version")
);
CREATE TABLE IF NOT EXISTS "AvailablePluginGroups" (
    "Vendor"       TEXT NOT NULL,
    "Publisher"    TEXT NOT NULL,
    "GroupName"    TEXT NOT NULL,
    "GroupVersion" TEXT NOT NULL,
    PRIMARY KEY("Vendor", "Publisher", "GroupName", "GroupVersion")
);
"#;

pub trait InventoryMetadata {
    fn create_inventory_metadata_db_schema(&self) -> Result<()>;

    /// Record a plugin version. Recording it twice is a no-op.
    fn insert_plugin_identifier(&self, id: &PluginIdentifier) -> Result<()>;

    /// Record a plugin-group version. Recording it twice is a no-op.
    fn insert_plugin_group_identifier(&self, id: &PluginGroupIdentifier) -> Result<()>;

    /// Copy every identifier of `other_db` that this database lacks.
    fn merge_inventory_metadata_database(&self, other_db: &Path) -> Result<()>;

    fn get_plugin_identifiers(&self) -> Result<Vec<PluginIdentifier>>;

    fn get_plugin_group_identifiers(&self) -> Result<Vec<PluginGroupIdentifier>>;
}

#[derive(Clone, Debug)]
pub struct SqliteInventoryMetadata {
    db_path: PathBuf,
}

impl SqliteInventoryMetadata {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path).map_err(|source| InventoryError::Open {
            path: self.db_path.clone(),
            source,
        })
    }

    fn open_existing(&self) -> Result<Connection> {
        if !self.db_path.exists() {
            return Err(InventoryError::DatabaseMissing {
                path: self.db_path.clone(),
            });
        }
        self.open()
    }
}

impl InventoryMetadata for SqliteInventoryMetadata {
    fn create_inventory_metadata_db_schema(&self) -> Result<()> {
        self.open()?
            .execute_batch(CREATE_METADATA_TABLES)
            .map_err(InventoryError::Schema)
    }

    fn insert_plugin_identifier(&self, id: &PluginIdentifier) -> Result<()> {
        self.open_existing()?
            .execute(
                r#"INSERT OR IGNORE INTO AvailablePluginBinaries (PluginName, Target, Version)
                   VALUES (?1, ?2, ?3)"#,
                params![id.name, id.target.as_str(), id.version],
            )
            .map_err(|source| InventoryError::Insert {
                what: format!("plugin identifier {id}"),
                source,
            })?;
        Ok(())
    }

    fn insert_plugin_group_identifier(&self, id: &PluginGroupIdentifier) -> Result<()> {
        self.open_existing()?
            .execute(
                r#"INSERT OR IGNORE INTO AvailablePluginGroups
                   (Vendor, Publisher, GroupName, GroupVersion) VALUES (?1, ?2, ?3, ?4)"#,
                params![id.vendor, id.publisher, id.name, id.version],
            )
            .map_err(|source| InventoryError::Insert {
                what: format!("plugin group identifier {id}"),
                source,
            })?;
        Ok(())
    }

    fn merge_inventory_metadata_database(&self, other_db: &Path) -> Result<()> {
        if !other_db.exists() {
            return Err(InventoryError::DatabaseMissing {
                path: other_db.to_path_buf(),
            });
        }
        let merge_err = |source| InventoryError::Merge {
            path: other_db.to_path_buf(),
            source,
        };

        let mut conn = self.open_existing()?;
        conn.execute(
            "ATTACH DATABASE ?1 AS other",
            params![other_db.to_string_lossy().into_owned()],
        )
        .map_err(merge_err)?;

        let tx = conn.transaction().map_err(merge_err)?;
        let plugins = tx
            .execute(
                r#"INSERT OR IGNORE INTO main.AvailablePluginBinaries (PluginName, Target, Version)
                   SELECT PluginName, Target, Version FROM other.AvailablePluginBinaries"#,
                [],
            )
            .map_err(merge_err)?;
        let groups = tx
            .execute(
                r#"INSERT OR IGNORE INTO main.AvailablePluginGroups
                   (Vendor, Publisher, GroupName, GroupVersion)
                   SELECT Vendor, Publisher, GroupName, GroupVersion
                   FROM other.AvailablePluginGroups"#,
                [],
            )
            .map_err(merge_err)?;
        tx.commit().map_err(merge_err)?;

        conn.execute("DETACH DATABASE other", []).map_err(merge_err)?;
        debug!(
            plugins,
            groups,
            from = %other_db.display(),
            "merged inventory metadata"
        );
        Ok(())
    }

    fn get_plugin_identifiers(&self) -> Result<Vec<PluginIdentifier>> {
        let conn = self.open_existing()?;
        let mut stmt = conn
            .prepare(
                r#"SELECT PluginName, Target, Version FROM AvailablePluginBinaries
                   ORDER BY PluginName, Target, Version"#,
            )
            .map_err(InventoryError::Query)?;
        stmt.query_map([], |row| {
            let target: String = row.get(1)?;
            Ok(PluginIdentifier {
                name: row.get(0)?,
                target: Target::parse(&target),
                version: row.get(2)?,
            })
        })
        .map_err(InventoryError::Query)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(InventoryError::Query)
    }

    fn get_plugin_group_identifiers(&self) -> Result<Vec<PluginGroupIdentifier>> {
        let conn = self.open_existing()?;
        let mut stmt = conn
            .prepare(
                r#"SELECT Vendor, Publisher, GroupName, GroupVersion FROM AvailablePluginGroups
                   ORDER BY Vendor, Publisher, GroupName, GroupVersion"#,
            )
            .map_err(InventoryError::Query)?;
        stmt.query_map([], |row| {
            Ok(PluginGroupIdentifier {
                vendor: row.get(0)?,
                publisher: row.get(1)?,
                name: row.get(2)?,
                version: row.get(3)?,
            })
        })
        .map_err(InventoryError::Query)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(InventoryError::Query)
    }
}
