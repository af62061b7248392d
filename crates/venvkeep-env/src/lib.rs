use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;

use venvkeep_core::Error;
use venvkeep_store::EnvLayout;

mod freeze;
mod pip;
mod rebuild;

pub use freeze::{
    probe_pip_version, probe_python_version, read_freeze, read_freeze_with_executor,
};
pub use pip::{explicit_pins, run_pip, run_pip_with_executor, verb_mutates_environment};
pub use rebuild::{
    create_environment, create_environment_with_executor, find_base_python, recorded_interpreter,
    rebuild, rebuild_with_executor, RebuildOutcome, RebuildStep,
};

/// Captured result of one subprocess invocation. Every subprocess seam in
/// this crate is generic over an executor producing these, so tests swap in
/// canned outputs instead of a real pip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Default executor: run the command to completion, capturing output. A
/// killed process reports exit code -1.
pub fn run_captured(command: &mut Command) -> io::Result<ExecOutput> {
    let output = command.output()?;
    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// The managed pip must exist and be executable before any wrapped call.
pub(crate) fn ensure_pip_runnable(layout: &EnvLayout) -> Result<PathBuf> {
    let pip_bin = layout.pip_bin();
    if !pip_bin.exists() {
        return Err(Error::EnvironmentUnavailable {
            root: layout.root().to_path_buf(),
            reason: format!(
                "pip executable missing at {} (run 'venvkeep init')",
                pip_bin.display()
            ),
        }
        .into());
    }
    if !is_executable(&pip_bin) {
        return Err(Error::EnvironmentUnavailable {
            root: layout.root().to_path_buf(),
            reason: format!("pip at {} is not executable", pip_bin.display()),
        }
        .into());
    }
    Ok(pip_bin)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|metadata| metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}
