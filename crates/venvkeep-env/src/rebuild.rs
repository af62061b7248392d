use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};

use venvkeep_core::{Error, PackageSet};
use venvkeep_store::{EnvLayout, EnvLock};

use crate::freeze::read_freeze_with_executor;
use crate::{ensure_pip_runnable, run_captured, ExecOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildStep {
    Destroy,
    Recreate,
    Install,
    Verify,
}

impl RebuildStep {
    pub fn label(self) -> &'static str {
        match self {
            Self::Destroy => "destroying environment",
            Self::Recreate => "recreating environment",
            Self::Install => "installing pinned packages",
            Self::Verify => "verifying package set",
        }
    }
}

/// What the destructive rebuild actually achieved. `missing`/`extra` name
/// exact pins, so a degraded restore is visible down to the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildOutcome {
    pub exit_code: i32,
    pub achieved: PackageSet,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl RebuildOutcome {
    pub fn is_exact(&self) -> bool {
        self.exit_code == 0 && self.missing.is_empty() && self.extra.is_empty()
    }

    pub fn partial_restore_error(&self) -> Option<Error> {
        if self.missing.is_empty() && self.extra.is_empty() {
            return None;
        }
        Some(Error::PartialRestore {
            missing: self.missing.clone(),
            extra: self.extra.clone(),
        })
    }
}

/// Destroy and recreate the environment, then install the desired set as
/// pinned requirements in one batch call. The `&EnvLock` parameter is the
/// caller's proof of exclusivity: the destructive step cannot be reached
/// without holding the environment lock, and the caller has already
/// journaled the desired target durably.
pub fn rebuild(
    layout: &EnvLayout,
    desired: &PackageSet,
    lock: &EnvLock,
    observer: impl FnMut(RebuildStep),
) -> Result<RebuildOutcome> {
    rebuild_with_executor(layout, desired, lock, run_captured, observer)
}

pub fn rebuild_with_executor<E>(
    layout: &EnvLayout,
    desired: &PackageSet,
    _lock: &EnvLock,
    mut executor: E,
    mut observer: impl FnMut(RebuildStep),
) -> Result<RebuildOutcome>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    // Resolved before the teardown: afterwards there is no venv to ask.
    let interpreter = recorded_interpreter(layout)?;

    observer(RebuildStep::Destroy);
    let venv_dir = layout.venv_dir();
    if venv_dir.exists() {
        fs::remove_dir_all(&venv_dir)
            .with_context(|| format!("failed to remove {}", venv_dir.display()))?;
    }

    observer(RebuildStep::Recreate);
    create_venv(layout, &interpreter, &mut executor)?;

    observer(RebuildStep::Install);
    let exit_code = if desired.is_empty() {
        0
    } else {
        let pip_bin = ensure_pip_runnable(layout)?;
        let mut command = Command::new(&pip_bin);
        command.arg("install");
        command.args(desired.pins());
        let output = executor(&mut command).with_context(|| {
            format!(
                "failed to run {} install for {} pinned packages",
                pip_bin.display(),
                desired.len()
            )
        })?;
        output.exit_code
    };

    observer(RebuildStep::Verify);
    let achieved = read_freeze_with_executor(layout, &mut executor)?;

    let mut missing = Vec::new();
    let mut extra = Vec::new();
    for (name, version) in desired.iter() {
        if achieved.get(name) != Some(version) {
            missing.push(format!("{name}=={version}"));
        }
    }
    for (name, version) in achieved.iter() {
        if desired.get(name) != Some(version) {
            extra.push(format!("{name}=={version}"));
        }
    }

    Ok(RebuildOutcome {
        exit_code,
        achieved,
        missing,
        extra,
    })
}

/// First-time environment creation for `init`. Records the base interpreter
/// so later rebuilds stay in the same version family.
pub fn create_environment(layout: &EnvLayout, interpreter: Option<PathBuf>) -> Result<PathBuf> {
    create_environment_with_executor(layout, interpreter, run_captured)
}

pub fn create_environment_with_executor<E>(
    layout: &EnvLayout,
    interpreter: Option<PathBuf>,
    mut executor: E,
) -> Result<PathBuf>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    layout.ensure_base_dirs()?;
    let interpreter = match interpreter {
        Some(interpreter) => interpreter,
        None => find_base_python()?,
    };

    create_venv(layout, &interpreter, &mut executor)?;

    let interpreter_path = layout.interpreter_path();
    venvkeep_store::write_atomic(
        &interpreter_path,
        format!("{}\n", interpreter.display()).as_bytes(),
    )
    .with_context(|| {
        format!(
            "failed to record interpreter: {}",
            interpreter_path.display()
        )
    })?;

    Ok(interpreter)
}

fn create_venv<E>(layout: &EnvLayout, interpreter: &Path, executor: &mut E) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let venv_dir = layout.venv_dir();
    let mut command = Command::new(interpreter);
    command.arg("-m").arg("venv").arg(&venv_dir);
    let output = executor(&mut command).with_context(|| {
        format!(
            "failed to run {} -m venv {}",
            interpreter.display(),
            venv_dir.display()
        )
    })?;

    if !output.success() {
        return Err(Error::EnvironmentUnavailable {
            root: layout.root().to_path_buf(),
            reason: format!(
                "venv creation with {} exited with code {}: {}",
                interpreter.display(),
                output.exit_code,
                output.stderr.trim()
            ),
        }
        .into());
    }
    Ok(())
}

/// The base interpreter recorded at init; falls back to a PATH search so a
/// root whose record was lost can still rebuild.
pub fn recorded_interpreter(layout: &EnvLayout) -> Result<PathBuf> {
    let path = layout.interpreter_path();
    match fs::read_to_string(&path) {
        Ok(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                find_base_python()
            } else {
                Ok(PathBuf::from(trimmed))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => find_base_python(),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read interpreter: {}", path.display()))
        }
    }
}

/// First `python3`/`python` on PATH.
pub fn find_base_python() -> Result<PathBuf> {
    let candidates: &[&str] = if cfg!(windows) {
        &["python.exe", "python3.exe"]
    } else {
        &["python3", "python"]
    };

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        for candidate in candidates {
            let candidate_path = dir.join(candidate);
            if candidate_path.is_file() {
                return Ok(candidate_path);
            }
        }
    }

    Err(anyhow!("no python interpreter found on PATH"))
}
