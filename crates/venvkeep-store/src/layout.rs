use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Path schema of one managed environment root. Every component receives an
/// explicit layout handle; there is no ambient "current environment".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvLayout {
    root: PathBuf,
}

impl EnvLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.root.join("venv")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Absolute path of the base interpreter recorded at init, consumed by
    /// the rebuilder to recreate the venv with the same version family.
    pub fn interpreter_path(&self) -> PathBuf {
        self.root.join("interpreter")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("lock")
    }

    pub fn record_before_path(&self, id: u64) -> PathBuf {
        self.history_dir().join(format!("{id:06}_before.json"))
    }

    pub fn record_after_path(&self, id: u64) -> PathBuf {
        self.history_dir().join(format!("{id:06}_after.json"))
    }

    pub fn record_ack_path(&self, id: u64) -> PathBuf {
        self.history_dir().join(format!("{id:06}.ack"))
    }

    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.snapshots_dir().join(format!("{name}.txt"))
    }

    pub fn python_bin(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir().join("Scripts").join("python.exe")
        } else {
            self.venv_dir().join("bin").join("python")
        }
    }

    pub fn pip_bin(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir().join("Scripts").join("pip.exe")
        } else {
            self.venv_dir().join("bin").join("pip")
        }
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.history_dir(),
            self.snapshots_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Per-principal environment root: `VENVKEEP_ROOT` override, otherwise
/// `$HOME/.venvkeep` (`%LOCALAPPDATA%\Venvkeep` on Windows).
pub fn default_principal_root() -> Result<PathBuf> {
    if let Some(root) = std::env::var_os("VENVKEEP_ROOT") {
        return Ok(PathBuf::from(root));
    }

    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve per-user environment root")?;
        return Ok(PathBuf::from(app_data).join("Venvkeep"));
    }

    let home =
        std::env::var("HOME").context("HOME is not set; cannot resolve per-user environment root")?;
    Ok(PathBuf::from(home).join(".venvkeep"))
}

/// System-wide environment root for privileged callers: `VENVKEEP_SYSTEM_ROOT`
/// override, otherwise `/opt/venvkeep` (`%PROGRAMDATA%\Venvkeep` on Windows).
pub fn default_system_root() -> Result<PathBuf> {
    if let Some(root) = std::env::var_os("VENVKEEP_SYSTEM_ROOT") {
        return Ok(PathBuf::from(root));
    }

    if cfg!(windows) {
        let program_data = std::env::var("PROGRAMDATA")
            .context("PROGRAMDATA is not set; cannot resolve system environment root")?;
        return Ok(PathBuf::from(program_data).join("Venvkeep"));
    }

    Ok(PathBuf::from("/opt/venvkeep"))
}
