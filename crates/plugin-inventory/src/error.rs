use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory database {} does not exist", path.display())]
    DatabaseMissing { path: PathBuf },
    #[error("failed to open inventory database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create inventory schema: {0}")]
    Schema(#[source] rusqlite::Error),
    #[error("failed to execute inventory query: {0}")]
    Query(#[source] rusqlite::Error),
    #[error("unable to insert {what}: {source}")]
    Insert {
        what: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("unable to update {what}: {reason}")]
    Update { what: String, reason: String },
    #[error("unable to merge inventory metadata database {}: {source}", path.display())]
    Merge {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("incorrect plugin group \"{id}\" specified")]
    IncorrectPluginGroup { id: String },
    #[error("incorrect plugin \"{id}\" specified")]
    IncorrectPlugin { id: String },
    #[error("invalid inventory entry {name}: {reason}")]
    InvalidEntry { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, InventoryError>;
