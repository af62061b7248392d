use std::io;
use std::process::Command;

use anyhow::{Context, Result};

use venvkeep_core::normalize_package_name;
use venvkeep_store::EnvLayout;

use crate::{ensure_pip_runnable, run_captured, ExecOutput};

/// Wrapped pip verbs that change installed state and therefore get
/// journaled. Everything else (list, show, freeze, ...) is read-only.
pub fn verb_mutates_environment(verb: &str) -> bool {
    matches!(verb, "install" | "uninstall")
}

/// Explicit `name==version` pins among wrapped-command arguments, used for
/// pre-install downgrade warnings. Flags and unpinned requests are ignored.
pub fn explicit_pins(args: &[String]) -> Vec<(String, String)> {
    args.iter()
        .filter(|arg| !arg.starts_with('-'))
        .filter_map(|arg| {
            let (name, version) = arg.split_once("==")?;
            let name = normalize_package_name(name);
            let version = version.trim();
            if name.is_empty() || version.is_empty() {
                None
            } else {
                Some((name, version.to_string()))
            }
        })
        .collect()
}

/// Run the wrapped pip command verbatim against the managed environment.
/// The exit code is returned, not turned into an error: a failed install
/// may still have changed state and must be journaled as such.
pub fn run_pip(layout: &EnvLayout, args: &[String]) -> Result<ExecOutput> {
    run_pip_with_executor(layout, args, run_captured)
}

pub fn run_pip_with_executor<E>(
    layout: &EnvLayout,
    args: &[String],
    mut executor: E,
) -> Result<ExecOutput>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let pip_bin = ensure_pip_runnable(layout)?;
    let mut command = Command::new(&pip_bin);
    command.args(args);
    executor(&mut command)
        .with_context(|| format!("failed to run {} {}", pip_bin.display(), args.join(" ")))
}
