use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::PackageSet;

/// Difference between two freeze snapshots. Maps are keyed by normalized
/// package name, so enumeration order is stable for display and hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: BTreeMap<String, String>,
    pub removed: BTreeMap<String, String>,
    pub modified: BTreeMap<String, VersionChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    pub old: String,
    pub new: String,
}

impl VersionChange {
    /// True only when both versions parse as dotted numeric sequences and
    /// the new one is lower. Anything non-numeric is inconclusive.
    pub fn is_downgrade(&self) -> bool {
        matches!(
            compare_dotted_versions(&self.old, &self.new),
            Some(Ordering::Greater)
        )
    }
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} added, {} removed, {} changed",
            self.added.len(),
            self.removed.len(),
            self.modified.len()
        )
    }
}

/// Pure diff of two package sets. Version strings are compared as opaque
/// tokens; equal-name different-version pairs land in `modified`.
pub fn diff(before: &PackageSet, after: &PackageSet) -> ChangeSet {
    let mut change_set = ChangeSet::default();

    for (name, version) in after.iter() {
        match before.get(name) {
            None => {
                change_set
                    .added
                    .insert(name.to_string(), version.to_string());
            }
            Some(old_version) if old_version != version => {
                change_set.modified.insert(
                    name.to_string(),
                    VersionChange {
                        old: old_version.to_string(),
                        new: version.to_string(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    for (name, version) in before.iter() {
        if !after.contains(name) {
            change_set
                .removed
                .insert(name.to_string(), version.to_string());
        }
    }

    change_set
}

/// Compare two version strings as dotted numeric sequences. Returns `None`
/// unless every segment of both versions is a plain integer; shorter versions
/// are padded with zeros (`1.2` == `1.2.0`).
pub fn compare_dotted_versions(left: &str, right: &str) -> Option<Ordering> {
    let left_segments = parse_dotted(left)?;
    let right_segments = parse_dotted(right)?;

    let width = left_segments.len().max(right_segments.len());
    for index in 0..width {
        let l = left_segments.get(index).copied().unwrap_or(0);
        let r = right_segments.get(index).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => {}
            unequal => return Some(unequal),
        }
    }
    Some(Ordering::Equal)
}

fn parse_dotted(version: &str) -> Option<Vec<u64>> {
    let version = version.trim();
    if version.is_empty() {
        return None;
    }
    version
        .split('.')
        .map(|segment| segment.parse::<u64>().ok())
        .collect()
}
