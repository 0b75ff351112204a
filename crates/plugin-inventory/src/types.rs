#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};

/// Version sentinel meaning "the recommended version only".
pub const VERSION_LATEST: &str = "latest";

/// Context a plugin operates against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Target {
    Global,
    Kubernetes,
    MissionControl,
    Operations,
    #[default]
    #[serde(rename = "")]
    Unknown,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Global => "global",
            Target::Kubernetes => "kubernetes",
            Target::MissionControl => "mission-control",
            Target::Operations => "operations",
            Target::Unknown => "",
        }
    }

    /// Parse a target name, accepting the short aliases users type.
    /// Anything unrecognised maps to [`Target::Unknown`].
    pub fn parse(value: &str) -> Target {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Target::Global,
            "kubernetes" | "k8s" => Target::Kubernetes,
            "mission-control" | "tmc" => Target::MissionControl,
            "operations" | "ops" => Target::Operations,
            _ => Target::Unknown,
        }
    }

    pub fn is_known(value: &str) -> bool {
        Target::parse(value) != Target::Unknown
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downloadable binary of a plugin version for a given platform.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub os: String,
    pub arch: String,
    pub digest: String,
    /// Fully qualified image reference, including tag.
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_digest: Option<String>,
}

/// Version string to per-platform artifacts.
pub type Artifacts = BTreeMap<String, Vec<Artifact>>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInventoryEntry {
    pub name: String,
    pub target: Target,
    pub vendor: String,
    pub publisher: String,
    pub description: String,
    pub hidden: bool,
    pub recommended_version: String,
    pub artifacts: Artifacts,
}

impl PluginInventoryEntry {
    /// Check the entry invariants: every version carries at least one artifact and
    /// the recommended version, when set, is one of the versions.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(InventoryError::InvalidEntry {
                name: self.name.clone(),
                reason: "plugin name must not be empty".to_string(),
            });
        }
        for (version, artifacts) in &self.artifacts {
            if artifacts.is_empty() {
                return Err(InventoryError::InvalidEntry {
                    name: self.name.clone(),
                    reason: format!("version {version} has no artifacts"),
                });
            }
        }
        if !self.recommended_version.is_empty()
            && !self.artifacts.contains_key(&self.recommended_version)
        {
            return Err(InventoryError::InvalidEntry {
                name: self.name.clone(),
                reason: format!(
                    "recommended version {} has no artifacts",
                    self.recommended_version
                ),
            });
        }
        Ok(())
    }

    /// Drop every version except the recommended one.
    pub fn retain_recommended_version(&mut self) {
        let recommended = self.recommended_version.clone();
        self.artifacts.retain(|version, _| *version == recommended);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginGroupPluginEntry {
    #[serde(flatten)]
    pub plugin: PluginIdentifier,
    #[serde(default)]
    pub mandatory: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginGroup {
    pub vendor: String,
    pub publisher: String,
    pub name: String,
    pub description: String,
    pub hidden: bool,
    pub recommended_version: String,
    pub versions: BTreeMap<String, Vec<PluginGroupPluginEntry>>,
}

impl PluginGroup {
    /// `vendor-publisher/name`
    pub fn id(&self) -> String {
        format!("{}-{}/{}", self.vendor, self.publisher, self.name)
    }
}

/// Identity of a published plugin version, without artifact payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginIdentifier {
    pub name: String,
    pub target: Target,
    pub version: String,
}

/// Identity of a published plugin-group version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginGroupIdentifier {
    pub vendor: String,
    pub publisher: String,
    pub name: String,
    pub version: String,
}

/// Plugin query. Unset fields leave the column unconstrained.
#[derive(Clone, Debug, Default)]
pub struct PluginInventoryFilter {
    pub name: Option<String>,
    pub target: Option<Target>,
    pub version: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub publisher: Option<String>,
    pub vendor: Option<String>,
    pub include_hidden: bool,
}

/// Plugin-group query. Unset fields leave the column unconstrained.
#[derive(Clone, Debug, Default)]
pub struct PluginGroupFilter {
    pub vendor: Option<String>,
    pub publisher: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub include_hidden: bool,
}

impl From<&PluginGroupIdentifier> for PluginGroupFilter {
    fn from(id: &PluginGroupIdentifier) -> Self {
        Self {
            vendor: Some(id.vendor.clone()),
            publisher: Some(id.publisher.clone()),
            name: Some(id.name.clone()),
            version: (!id.version.is_empty()).then(|| id.version.clone()),
            include_hidden: false,
        }
    }
}
