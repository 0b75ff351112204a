//! Version filter handling shared by plugin and plugin-group queries.

use std::cmp::Ordering;

use semver::Version;

use crate::types::VERSION_LATEST;

/// How a version filter string constrains the versions of an entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionSelector {
    /// No filter.
    All,
    /// Only the recommended version.
    Latest,
    /// Exactly this version string.
    Exact(String),
    /// `vMAJOR` or `vMAJOR.MINOR`: every release sharing those components.
    Partial { major: u64, minor: Option<u64> },
}

impl VersionSelector {
    pub fn parse(filter: Option<&str>) -> Self {
        let Some(raw) = filter.map(str::trim).filter(|v| !v.is_empty()) else {
            return VersionSelector::All;
        };
        if raw == VERSION_LATEST {
            return VersionSelector::Latest;
        }
        let digits = raw.strip_prefix('v').unwrap_or(raw);
        let parts: Vec<&str> = digits.split('.').collect();
        let numeric: Option<Vec<u64>> = parts.iter().map(|p| p.parse::<u64>().ok()).collect();
        match numeric.as_deref() {
            Some([major]) => VersionSelector::Partial {
                major: *major,
                minor: None,
            },
            Some([major, minor]) => VersionSelector::Partial {
                major: *major,
                minor: Some(*minor),
            },
            _ => VersionSelector::Exact(raw.to_string()),
        }
    }

    /// Whether `version` is selected. `Latest` cannot be decided per version and
    /// matches everything here; callers prune to the recommended version afterwards.
    pub fn matches(&self, version: &str) -> bool {
        match self {
            VersionSelector::All | VersionSelector::Latest => true,
            VersionSelector::Exact(wanted) => wanted == version,
            VersionSelector::Partial { major, minor } => match parse_version(version) {
                Some(parsed) if parsed.pre.is_empty() => {
                    parsed.major == *major && minor.is_none_or(|m| parsed.minor == m)
                }
                _ => false,
            },
        }
    }
}

/// Parse a `v`-prefixed or bare semantic version.
pub fn parse_version(version: &str) -> Option<Version> {
    let trimmed = version.trim();
    Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed)).ok()
}

/// Order versions semantically; unparsable versions sort before parsable ones and
/// fall back to lexical order among themselves.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

pub fn highest_version<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    versions
        .into_iter()
        .map(String::as_str)
        .max_by(|a, b| compare_versions(a, b))
}
