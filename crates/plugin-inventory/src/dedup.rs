use std::collections::HashSet;

use crate::types::{PluginGroup, PluginInventoryEntry, Target};

/// Collapse entries sharing (name, target, vendor, publisher, recommended version)
/// and the same set of versions. The first occurrence wins; later duplicates are
/// dropped without merging fields.
pub fn remove_duplicate_plugin_inventory_entries(
    entries: Vec<PluginInventoryEntry>,
) -> Vec<PluginInventoryEntry> {
    let mut seen: HashSet<(String, Target, String, String, String, Vec<String>)> =
        HashSet::new();
    entries
        .into_iter()
        .filter(|entry| {
            seen.insert((
                entry.name.clone(),
                entry.target,
                entry.vendor.clone(),
                entry.publisher.clone(),
                entry.recommended_version.clone(),
                entry.artifacts.keys().cloned().collect(),
            ))
        })
        .collect()
}

/// Collapse groups sharing (vendor, publisher, name) and the same set of versions.
/// The first occurrence wins.
pub fn remove_duplicate_plugin_groups(groups: Vec<PluginGroup>) -> Vec<PluginGroup> {
    let mut seen: HashSet<(String, String, String, Vec<String>)> = HashSet::new();
    groups
        .into_iter()
        .filter(|group| {
            seen.insert((
                group.vendor.clone(),
                group.publisher.clone(),
                group.name.clone(),
                group.versions.keys().cloned().collect(),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, version: &str, description: &str) -> PluginInventoryEntry {
        PluginInventoryEntry {
            name: name.to_string(),
            target: Target::Kubernetes,
            vendor: "acme".to_string(),
            publisher: "core".to_string(),
            description: description.to_string(),
            recommended_version: version.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn first_occurrence_wins() {
        let deduped = remove_duplicate_plugin_inventory_entries(vec![
            entry("a", "v1", "first"),
            entry("b", "v2", "b"),
            entry("a", "v1", "second"),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].description, "first");
        assert_eq!(deduped[1].name, "b");
    }

    #[test]
    fn different_versions_are_kept() {
        let deduped = remove_duplicate_plugin_inventory_entries(vec![
            entry("a", "v1", ""),
            entry("a", "v2", ""),
        ]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn entries_with_different_version_sets_are_kept() {
        let mut pruned = entry("a", "v2", "");
        pruned.artifacts.insert("v2".into(), Vec::new());
        let mut full = pruned.clone();
        full.artifacts.insert("v1".into(), Vec::new());

        let deduped =
            remove_duplicate_plugin_inventory_entries(vec![pruned.clone(), full, pruned]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[1].artifacts.len(), 2);
    }

    #[test]
    fn groups_dedup_by_identity_and_versions() {
        let mut group = PluginGroup {
            vendor: "acme".into(),
            publisher: "core".into(),
            name: "default".into(),
            ..Default::default()
        };
        group.versions.insert("v1.0.0".into(), Vec::new());
        let mut other_version = group.clone();
        other_version.versions.clear();
        other_version.versions.insert("v2.0.0".into(), Vec::new());

        let deduped =
            remove_duplicate_plugin_groups(vec![group.clone(), other_version, group]);
        assert_eq!(deduped.len(), 2);
    }
}
