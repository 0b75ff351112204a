#![forbid(unsafe_code)]

pub mod central_config;
pub mod dedup;
pub mod error;
pub mod identifiers;
pub mod metadata;
pub mod sqlite;
pub mod types;
pub mod version;

pub use dedup::*;
pub use error::{InventoryError, Result};
pub use identifiers::*;
pub use metadata::{InventoryMetadata, SqliteInventoryMetadata};
pub use sqlite::{PluginInventory, SqliteInventory};
pub use types::*;

/// Database file name inside the inventory image.
pub const INVENTORY_DB_FILE_NAME: &str = "plugin_inventory.db";
/// Database file name of the publication metadata database.
pub const INVENTORY_METADATA_DB_FILE_NAME: &str = "plugin_inventory_metadata.db";
/// Central configuration file shipped alongside the inventory database.
pub const CENTRAL_CONFIG_FILE_NAME: &str = "central_config.yaml";
