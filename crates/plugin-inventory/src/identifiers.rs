use std::fmt;

use crate::error::{InventoryError, Result};
use crate::types::{PluginGroupIdentifier, PluginIdentifier, Target};

impl PluginGroupIdentifier {
    /// Parse `vendor-publisher/name[:version]`.
    ///
    /// The vendor is everything before the first `-`; the publisher may itself contain
    /// dashes. A missing version is left empty for the caller to default.
    pub fn from_id(id: &str) -> Result<Self> {
        let incorrect = || InventoryError::IncorrectPluginGroup { id: id.to_string() };

        let mut parts = id.split('/');
        let (Some(vendor_publisher), Some(name_version), None) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(incorrect());
        };

        let (vendor, publisher) = vendor_publisher.split_once('-').ok_or_else(incorrect)?;
        let (name, version) = match name_version.split_once(':') {
            Some((name, version)) if !version.is_empty() => (name, version),
            Some(_) => return Err(incorrect()),
            None => (name_version, ""),
        };

        if vendor.is_empty() || publisher.is_empty() || name.is_empty() || name.contains(':') {
            return Err(incorrect());
        }

        Ok(Self {
            vendor: vendor.to_string(),
            publisher: publisher.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// `vendor-publisher/name` without the version.
    pub fn id_without_version(&self) -> String {
        format!("{}-{}/{}", self.vendor, self.publisher, self.name)
    }
}

impl fmt::Display for PluginGroupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id_without_version())?;
        if !self.version.is_empty() {
            write!(f, ":{}", self.version)?;
        }
        Ok(())
    }
}

impl PluginIdentifier {
    /// Parse `name[@target][:version]`.
    pub fn from_id(id: &str) -> Result<Self> {
        let incorrect = || InventoryError::IncorrectPlugin { id: id.to_string() };

        let (rest, version) = match id.split_once(':') {
            Some((rest, version)) if !version.is_empty() => (rest, version),
            Some(_) => return Err(incorrect()),
            None => (id, ""),
        };
        let (name, target) = match rest.split_once('@') {
            Some((name, target)) => {
                let parsed = Target::parse(target);
                if parsed == Target::Unknown {
                    return Err(incorrect());
                }
                (name, parsed)
            }
            None => (rest, Target::Unknown),
        };
        if name.trim().is_empty() || name.contains(['@', ':', '/']) {
            return Err(incorrect());
        }

        Ok(Self {
            name: name.to_string(),
            target,
            version: version.to_string(),
        })
    }
}

impl fmt::Display for PluginIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.target != Target::Unknown {
            write!(f, "@{}", self.target)?;
        }
        if !self.version.is_empty() {
            write!(f, ":{}", self.version)?;
        }
        Ok(())
    }
}
