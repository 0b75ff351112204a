//! Reader for the central configuration published with the inventory image.
//!
//! The file is a flat YAML mapping of dotted keys (`cli.core.some_setting`) to
//! arbitrary values. Values are re-encoded to YAML and decoded into the caller's type
//! so a type mismatch surfaces as an error rather than a default.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_yaml_bw::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CentralConfigError {
    #[error("failed to read central configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("central configuration {} is not a valid YAML mapping: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_bw::Error,
    },
    #[error("key {key} not found in the central configuration")]
    KeyNotFound { key: String },
    #[error("central configuration key {key} has an unexpected type: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_yaml_bw::Error,
    },
}

#[derive(Clone, Debug)]
pub struct CentralConfigYamlReader {
    path: PathBuf,
}

impl CentralConfigYamlReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> Result<BTreeMap<String, Value>, CentralConfigError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| CentralConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_yaml_bw::from_str(&raw).map_err(|source| CentralConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Decode the value stored under `key`.
    pub fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Result<T, CentralConfigError> {
        let entries = self.entries()?;
        let value = entries
            .get(key)
            .ok_or_else(|| CentralConfigError::KeyNotFound {
                key: key.to_string(),
            })?;
        let decode = |source| CentralConfigError::Decode {
            key: key.to_string(),
            source,
        };
        let encoded = serde_yaml_bw::to_string(value).map_err(decode)?;
        serde_yaml_bw::from_str(&encoded).map_err(decode)
    }
}
