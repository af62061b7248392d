use std::io;
use std::process::Command;

use anyhow::{Context, Result};

use venvkeep_core::{Error, PackageSet};
use venvkeep_store::EnvLayout;

use crate::{ensure_pip_runnable, run_captured, ExecOutput};

/// Capture the environment's exact installed package set. Read-only: the
/// one component everything else builds on.
pub fn read_freeze(layout: &EnvLayout) -> Result<PackageSet> {
    read_freeze_with_executor(layout, run_captured)
}

pub fn read_freeze_with_executor<E>(layout: &EnvLayout, mut executor: E) -> Result<PackageSet>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let pip_bin = ensure_pip_runnable(layout)?;

    let mut command = Command::new(&pip_bin);
    command.arg("freeze");
    let output = executor(&mut command)
        .with_context(|| format!("failed to run {} freeze", pip_bin.display()))?;

    if !output.success() {
        return Err(Error::EnvironmentUnavailable {
            root: layout.root().to_path_buf(),
            reason: format!(
                "pip freeze exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ),
        }
        .into());
    }

    Ok(PackageSet::parse_freeze(&output.stdout)?)
}

/// `Python 3.11.9`-style version line of the environment's interpreter.
pub fn probe_python_version<E>(layout: &EnvLayout, mut executor: E) -> Result<String>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let python_bin = layout.python_bin();
    if !python_bin.exists() {
        return Err(Error::EnvironmentUnavailable {
            root: layout.root().to_path_buf(),
            reason: format!("python executable missing at {}", python_bin.display()),
        }
        .into());
    }

    let mut command = Command::new(&python_bin);
    command.arg("--version");
    let output = executor(&mut command)
        .with_context(|| format!("failed to run {} --version", python_bin.display()))?;
    Ok(first_line(&output))
}

pub fn probe_pip_version<E>(layout: &EnvLayout, mut executor: E) -> Result<String>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let pip_bin = ensure_pip_runnable(layout)?;
    let mut command = Command::new(&pip_bin);
    command.arg("--version");
    let output = executor(&mut command)
        .with_context(|| format!("failed to run {} --version", pip_bin.display()))?;
    Ok(first_line(&output))
}

// Python 2 printed its version banner to stderr.
fn first_line(output: &ExecOutput) -> String {
    let text = if output.stdout.trim().is_empty() {
        &output.stderr
    } else {
        &output.stdout
    };
    text.lines().next().unwrap_or("").trim().to_string()
}
