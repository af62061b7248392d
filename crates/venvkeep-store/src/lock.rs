use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use venvkeep_core::Error;

use crate::EnvLayout;

/// Exclusive environment-scoped writer lock. Claimed with `create_new` so
/// the first writer wins; a second writer fails fast with `EnvironmentBusy`
/// naming the holder pid instead of queuing. Released on drop.
#[derive(Debug)]
pub struct EnvLock {
    path: PathBuf,
}

impl EnvLock {
    pub fn acquire(layout: &EnvLayout) -> Result<Self> {
        let path = layout.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = read_lock_holder(layout).ok().flatten();
                return Err(Error::EnvironmentBusy { holder }.into());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to claim lock: {}", path.display()));
            }
        };

        file.write_all(format!("{}\n", std::process::id()).as_bytes())
            .with_context(|| format!("failed to write lock: {}", path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush lock: {}", path.display()))?;

        Ok(Self { path })
    }
}

impl Drop for EnvLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub fn read_lock_holder(layout: &EnvLayout) -> Result<Option<u32>> {
    let path = layout.lock_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read lock: {}", path.display()));
        }
    };
    Ok(raw.trim().parse::<u32>().ok())
}

/// A lock whose holder process is gone is stale: the holder died between
/// claim and release. `doctor --fix` removes it.
pub fn lock_is_stale(layout: &EnvLayout) -> Result<bool> {
    let Some(pid) = read_lock_holder(layout)? else {
        // Present but unreadable or pid-less counts as stale.
        return Ok(layout.lock_path().exists());
    };
    Ok(!holder_process_alive(pid)?)
}

pub fn remove_stale_lock(layout: &EnvLayout) -> Result<bool> {
    if !lock_is_stale(layout)? {
        return Ok(false);
    }
    let path = layout.lock_path();
    fs::remove_file(&path)
        .with_context(|| format!("failed to remove stale lock: {}", path.display()))?;
    Ok(true)
}

fn holder_process_alive(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        let status = Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed executing lock-holder liveness probe for pid={pid}"))?;
        Ok(status.success())
    }

    #[cfg(windows)]
    {
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
            .output()
            .with_context(|| format!("failed executing lock-holder liveness probe for pid={pid}"))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        Ok(stdout.contains(&format!(",\"{pid}\""))
            && !stdout.to_ascii_lowercase().contains("no tasks are running"))
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        Ok(true)
    }
}
