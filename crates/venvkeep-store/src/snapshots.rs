use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};

use venvkeep_core::{Error, PackageSet};

use crate::fs_utils::write_atomic;
use crate::EnvLayout;

/// Captured automatically at environment initialization.
pub const BASELINE_SNAPSHOT: &str = "baseline";
/// Overwritten before each destructive rebuild when auto-snapshot is on.
pub const AUTO_BACKUP_SNAPSHOT: &str = "auto-backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub name: String,
    pub package_count: usize,
    pub created_at_unix: u64,
}

/// Named freeze snapshots under `<root>/snapshots/`, independent of the
/// journal's numeric sequence.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    layout: EnvLayout,
}

impl SnapshotStore {
    pub fn new(layout: &EnvLayout) -> Self {
        Self {
            layout: layout.clone(),
        }
    }

    /// Atomic overwrite: a reader never observes a partially written
    /// snapshot, and re-saving a name replaces it in one rename.
    pub fn save(&self, name: &str, packages: &PackageSet) -> Result<PathBuf> {
        validate_snapshot_name(name)?;
        let path = self.layout.snapshot_path(name);
        write_atomic(&path, packages.to_freeze_text().as_bytes())
            .with_context(|| format!("failed to write snapshot: {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<PackageSet> {
        let path = self.layout.snapshot_path(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::UnknownSnapshot {
                    name: name.to_string(),
                }
                .into());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read snapshot: {}", path.display()));
            }
        };

        PackageSet::parse_freeze(&raw)
            .with_context(|| format!("failed to parse snapshot: {}", path.display()))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout.snapshot_path(name).exists()
    }

    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let dir = self.layout.snapshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some("txt") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|v| v.to_str()) else {
                continue;
            };

            let packages = self.load(name)?;
            let created_at_unix = entry
                .metadata()?
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|duration| duration.as_secs())
                .unwrap_or(0);
            snapshots.push(SnapshotInfo {
                name: name.to_string(),
                package_count: packages.len(),
                created_at_unix,
            });
        }

        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snapshots)
    }
}

/// Snapshot names become file names: lowercase alphanumeric start, then
/// `[a-z0-9._-]`, max 64. Rules out traversal, hidden files and spaces.
pub fn validate_snapshot_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        anyhow::bail!("invalid snapshot name '{name}': must be 1-64 characters");
    }

    let bytes = name.as_bytes();
    let first_is_valid = bytes[0].is_ascii_lowercase() || bytes[0].is_ascii_digit();
    let rest_is_valid = bytes[1..].iter().all(|b| {
        b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.')
    });
    if !first_is_valid || !rest_is_valid {
        anyhow::bail!(
            "invalid snapshot name '{name}': use lowercase letters, digits, '.', '_' and '-', starting with a letter or digit"
        );
    }
    Ok(())
}
