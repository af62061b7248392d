use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write-temp-then-rename. The payload is synced before the rename, so a
/// reader either sees the previous content or the full new content, never a
/// torn file.
pub fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("cannot atomically write to {}: no parent", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;

    let tmp_path = temp_sibling(path, parent)?;
    let write_result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
        file.write_all(payload)
            .with_context(|| format!("failed to write temp file: {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync temp file: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "failed to rename {} into place at {}",
                tmp_path.display(),
                path.display()
            )
        })
    })();

    if write_result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    write_result
}

fn temp_sibling(path: &Path, parent: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("cannot atomically write to {}: no file name", path.display()))?;
    let seq = TMP_SEQ.fetch_add(1, Ordering::SeqCst);
    Ok(parent.join(format!(
        ".{file_name}.tmp.{}.{seq}",
        std::process::id()
    )))
}

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Leftover `.*.tmp.*` siblings from a writer that died mid-write. Reported
/// by doctor and removed by `doctor --fix`.
pub fn stale_temp_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut stale = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') && name.contains(".tmp.") {
            stale.push(entry.path());
        }
    }

    stale.sort();
    Ok(stale)
}
