use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PLUGIN_INVENTORY_IMAGE: &str =
    "ghcr.io/pluginctl/plugins/plugin-inventory:latest";
pub const DEFAULT_ESSENTIALS_PLUGIN_GROUP: &str = "pluginctl-core/essentials";

/// User configuration, read from `config.toml` and overridden by the environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_inventory_image")]
    pub plugin_inventory_image: String,
    #[serde(default = "default_essentials_group")]
    pub essentials_plugin_group: String,
    #[serde(default)]
    pub signature: SignatureSettings,
    /// Per registry host TLS and credential overrides.
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryOptions>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            plugin_inventory_image: default_inventory_image(),
            essentials_plugin_group: default_essentials_group(),
            signature: SignatureSettings::default(),
            registries: BTreeMap::new(),
        }
    }
}

fn default_inventory_image() -> String {
    DEFAULT_PLUGIN_INVENTORY_IMAGE.to_string()
}

fn default_essentials_group() -> String {
    DEFAULT_ESSENTIALS_PLUGIN_GROUP.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignatureSettings {
    /// Images exempt from signature verification.
    #[serde(default)]
    pub skip_list: Vec<String>,
    #[serde(default)]
    pub suppress_skip_warning: bool,
    /// Ed25519 public key (PKCS#8 PEM) trusted for inventory images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_file: Option<PathBuf>,
    #[serde(default)]
    pub skip_cert_verify: bool,
    /// Talk plain HTTP to this registry.
    #[serde(default)]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("{} is not a valid pluginctl config", path.display()))
    }

    /// TLS and credential options for the registry serving `image`.
    pub fn registry_options(&self, image: &str) -> RegistryOptions {
        let host = crate::images::registry_host(image);
        self.registries.get(host).cloned().unwrap_or_default()
    }
}

/// Split a comma-separated image list, dropping blanks.
pub fn parse_image_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_bool_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
