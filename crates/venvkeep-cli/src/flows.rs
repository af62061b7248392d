use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;

use venvkeep_core::{
    compare_dotted_versions, diff, parse_share_document, python_version_family_matches,
    render_share_document, Error, PackageSet, SHARE_EXTENSION,
};
use venvkeep_env::{
    create_environment_with_executor, explicit_pins, find_base_python, probe_pip_version,
    probe_python_version, read_freeze_with_executor, rebuild_with_executor, run_captured,
    run_pip_with_executor, verb_mutates_environment, ExecOutput, RebuildOutcome,
};
use venvkeep_store::{
    lock_is_stale, remove_stale_lock, stale_temp_files, validate_snapshot_name, write_atomic,
    Config, EnvLayout, EnvLock, Journal, SnapshotStore, AUTO_BACKUP_SNAPSHOT, BASELINE_SNAPSHOT,
};

use crate::render::{
    print_status, render_change_set_lines, render_history_lines, render_snapshot_lines,
    OutputStyle, RebuildProgress,
};
use crate::routing;

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}

fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    print!("{prompt} [y/N] ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read confirmation")?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

fn echo_output(output: &ExecOutput) {
    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        println!("{stdout}");
    }
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        eprintln!("{stderr}");
    }
}

fn pip_line(args: &[String]) -> String {
    format!("pip {}", args.join(" "))
}

// ---------------------------------------------------------------------------
// init

pub fn run_init(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    force: bool,
    python: Option<PathBuf>,
    assume_yes: bool,
) -> Result<()> {
    run_init_with_executor(layout, config, style, force, python, assume_yes, run_captured)
}

#[allow(clippy::too_many_arguments)]
pub fn run_init_with_executor<E>(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    force: bool,
    python: Option<PathBuf>,
    assume_yes: bool,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    layout.ensure_base_dirs()?;

    let venv_dir = layout.venv_dir();
    let recreating = venv_dir.exists();
    if recreating {
        if !force {
            return Err(anyhow!(
                "environment already initialized at {} (use --force to recreate)",
                layout.root().display()
            ));
        }
        if !confirm(
            &format!(
                "Recreate the environment at {}? All installed packages will be lost.",
                layout.root().display()
            ),
            assume_yes,
        )? {
            print_status(style, "warn", "init aborted");
            return Ok(());
        }
    }

    let _lock = EnvLock::acquire(layout)?;
    if recreating {
        fs::remove_dir_all(&venv_dir)
            .with_context(|| format!("failed to remove {}", venv_dir.display()))?;
    }

    let interpreter = create_environment_with_executor(layout, python, &mut executor)?;
    if !layout.config_path().exists() {
        config.save(layout)?;
    }

    if config.snapshots.auto_baseline {
        let freeze = read_freeze_with_executor(layout, &mut executor)?;
        SnapshotStore::new(layout).save(BASELINE_SNAPSHOT, &freeze)?;
        print_status(style, "ok", "baseline snapshot captured");
    }

    print_status(
        style,
        "ok",
        &format!(
            "environment initialized at {} (interpreter: {})",
            layout.root().display(),
            interpreter.display()
        ),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// status / history / diff

pub fn run_status(layout: &EnvLayout, config: &Config, style: OutputStyle) -> Result<()> {
    run_status_with_executor(layout, config, style, run_captured)
}

pub fn run_status_with_executor<E>(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let freeze = read_freeze_with_executor(layout, &mut executor)?;
    let python_version =
        probe_python_version(layout, &mut executor).unwrap_or_else(|_| "unknown".to_string());
    let pip_version =
        probe_pip_version(layout, &mut executor).unwrap_or_else(|_| "unknown".to_string());

    let journal = Journal::new(layout);
    let records = journal.list(None)?;
    let complete_count = records.iter().filter(|record| record.is_complete()).count();
    let interrupted = journal.unacknowledged_interrupted()?;
    let snapshots = SnapshotStore::new(layout).list()?;

    print_status(style, "ok", &format!("environment: {}", layout.root().display()));
    print_status(style, "ok", &format!("python: {python_version}"));
    print_status(style, "ok", &format!("pip: {pip_version}"));
    print_status(style, "ok", &format!("installed packages: {}", freeze.len()));
    print_status(
        style,
        "ok",
        &format!(
            "journal: {} operations ({complete_count} complete), {} snapshots",
            records.len(),
            snapshots.len()
        ),
    );
    if let Some(last) = records.first() {
        for line in render_history_lines(std::slice::from_ref(last), false, style) {
            println!("  last: {line}");
        }
    }

    if !interrupted.is_empty() {
        print_status(
            style,
            "warn",
            &format!(
                "{} interrupted operation(s); run 'venvkeep doctor --fix' to acknowledge",
                interrupted.len()
            ),
        );
    }

    let named_snapshots = snapshots
        .iter()
        .filter(|snapshot| {
            snapshot.name != BASELINE_SNAPSHOT && snapshot.name != AUTO_BACKUP_SNAPSHOT
        })
        .count();
    if let Some(suggestion) = snapshot_suggestion(freeze.len(), complete_count, named_snapshots) {
        print_status(style, "warn", &suggestion);
    }

    Ok(())
}

/// A stable, busy environment with nothing named to fall back to is worth a
/// reminder; one named snapshot silences it for good.
pub(crate) fn snapshot_suggestion(
    package_count: usize,
    complete_operations: usize,
    named_snapshots: usize,
) -> Option<String> {
    if named_snapshots > 0 || package_count < 10 || complete_operations < 5 {
        return None;
    }
    Some(format!(
        "{package_count} packages across {complete_operations} operations with no named snapshot; consider 'venvkeep snapshot <name>'"
    ))
}

pub fn run_history(
    layout: &EnvLayout,
    limit: Option<usize>,
    detailed: bool,
    style: OutputStyle,
) -> Result<()> {
    let records = Journal::new(layout).list(limit)?;
    for line in render_history_lines(&records, detailed, style) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_diff(layout: &EnvLayout, steps_back: u64, style: OutputStyle) -> Result<()> {
    let records = Journal::new(layout).list(None)?;
    if records.is_empty() {
        println!("no operations journaled yet");
        return Ok(());
    }

    let index = steps_back.max(1) as usize - 1;
    let Some(record) = records.get(index) else {
        return Err(Error::UnknownOperation { id: steps_back }.into());
    };

    match &record.change_set {
        Some(change_set) => {
            println!(
                "operation #{:06} ({}): {}",
                record.id,
                record.command_line,
                change_set.summary()
            );
            for line in render_change_set_lines(change_set, style) {
                println!("{line}");
            }
        }
        None => {
            print_status(
                style,
                "warn",
                &format!(
                    "operation #{:06} is {}; no change set was recorded",
                    record.id,
                    record.status.label()
                ),
            );
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// wrapped pip

pub fn run_pip_command(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    principal: &str,
    command_line: &str,
    args: &[String],
    working_dir: &Path,
) -> Result<()> {
    run_pip_command_with_executor(
        layout,
        config,
        style,
        principal,
        command_line,
        args,
        working_dir,
        run_captured,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn run_pip_command_with_executor<E>(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    principal: &str,
    command_line: &str,
    args: &[String],
    working_dir: &Path,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let Some(verb) = args.first() else {
        return Err(anyhow!(
            "missing pip arguments (try 'venvkeep pip install <package>')"
        ));
    };

    if config.ui.verbose {
        print_status(
            style,
            "step",
            &format!("target environment: {}", layout.root().display()),
        );
    }

    // Read-only verbs pass straight through, unjournaled and unlocked.
    if !verb_mutates_environment(verb) {
        let output = run_pip_with_executor(layout, args, &mut executor)?;
        echo_output(&output);
        if output.exit_code != 0 {
            return Err(Error::Subprocess {
                command: pip_line(args),
                code: output.exit_code,
            }
            .into());
        }
        return Ok(());
    }

    for hint in routing::project_context_hints(working_dir) {
        print_status(style, "warn", &hint);
    }

    let _lock = EnvLock::acquire(layout)?;
    let freeze_before = read_freeze_with_executor(layout, &mut executor)?;
    if config.ui.verbose {
        print_status(
            style,
            "step",
            &format!("captured {} packages before the command", freeze_before.len()),
        );
    }

    for warning in downgrade_warnings(&freeze_before, args) {
        print_status(style, "warn", &warning);
    }

    let journal = Journal::new(layout);
    let id = journal.begin(principal, command_line, &freeze_before, current_unix_timestamp()?)?;

    let output = run_pip_with_executor(layout, args, &mut executor)?;
    echo_output(&output);

    let freeze_after = read_freeze_with_executor(layout, &mut executor)?;
    let change_set = journal.complete(id, &freeze_after, output.exit_code, current_unix_timestamp()?)?;
    journal.prune(config.history.max_entries as usize)?;

    if config.history.show_diff_after_install && verb == "install" {
        for line in render_change_set_lines(&change_set, style) {
            println!("{line}");
        }
    }

    if output.exit_code != 0 {
        // Recorded as COMPLETE above: a failed install may still have
        // changed state, and the journal must say so.
        return Err(Error::Subprocess {
            command: pip_line(args),
            code: output.exit_code,
        }
        .into());
    }

    print_status(
        style,
        "ok",
        &format!("operation #{id:06} journaled ({})", change_set.summary()),
    );
    Ok(())
}

/// Explicit pins lower than what is installed, surfaced before pip runs.
pub(crate) fn downgrade_warnings(current: &PackageSet, args: &[String]) -> Vec<String> {
    if args.first().map(String::as_str) != Some("install") {
        return Vec::new();
    }

    let mut warnings = Vec::new();
    for (name, requested) in explicit_pins(args) {
        let Some(installed) = current.get(&name) else {
            continue;
        };
        if compare_dotted_versions(installed, &requested) == Some(std::cmp::Ordering::Greater) {
            warnings.push(format!(
                "{name}: requested {requested} is a downgrade from installed {installed}"
            ));
        }
    }
    warnings
}

/// Pass-through for an active foreground environment: the wrapped command
/// runs against the project venv, unjournaled, with a visible notice.
pub fn run_foreground_pip(venv: &Path, args: &[String], style: OutputStyle) -> Result<()> {
    run_foreground_pip_with_executor(venv, args, style, run_captured)
}

pub fn run_foreground_pip_with_executor<E>(
    venv: &Path,
    args: &[String],
    style: OutputStyle,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let pip_bin = foreground_pip_bin(venv);
    if !pip_bin.is_file() {
        return Err(Error::EnvironmentUnavailable {
            root: venv.to_path_buf(),
            reason: format!("active environment has no pip at {}", pip_bin.display()),
        }
        .into());
    }

    print_status(
        style,
        "step",
        &format!(
            "active environment {} takes precedence; passing through (not journaled)",
            venv.display()
        ),
    );

    let mut command = Command::new(&pip_bin);
    command.args(args);
    let output = executor(&mut command)
        .with_context(|| format!("failed to run {} {}", pip_bin.display(), args.join(" ")))?;
    echo_output(&output);

    if output.exit_code != 0 {
        return Err(Error::Subprocess {
            command: pip_line(args),
            code: output.exit_code,
        }
        .into());
    }
    Ok(())
}

fn foreground_pip_bin(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("pip.exe")
    } else {
        venv.join("bin").join("pip")
    }
}

// ---------------------------------------------------------------------------
// destructive rebuild flows (undo / restore / clean / import)

pub struct RebuildReport {
    pub operation_id: u64,
    pub outcome: RebuildOutcome,
}

/// The one bracket every destructive flow goes through: lock, capture,
/// journal durably, only then destroy and rebuild, then journal completion.
/// Errors before the rebuild call leave the environment untouched.
fn journaled_rebuild_with_executor<E>(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    principal: &str,
    command_line: &str,
    target: &PackageSet,
    executor: &mut E,
) -> Result<RebuildReport>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let lock = EnvLock::acquire(layout)?;
    let freeze_before = read_freeze_with_executor(layout, &mut *executor)?;

    if config.history.auto_snapshot {
        SnapshotStore::new(layout).save(AUTO_BACKUP_SNAPSHOT, &freeze_before)?;
    }

    let journal = Journal::new(layout);
    let id = journal.begin(principal, command_line, &freeze_before, current_unix_timestamp()?)?;

    let mut progress = RebuildProgress::start(style);
    let outcome =
        rebuild_with_executor(layout, target, &lock, &mut *executor, |step| {
            progress.observe(step)
        })?;
    progress.finish();

    journal.complete(id, &outcome.achieved, outcome.exit_code, current_unix_timestamp()?)?;
    journal.prune(config.history.max_entries as usize)?;

    Ok(RebuildReport {
        operation_id: id,
        outcome,
    })
}

fn report_rebuild(style: OutputStyle, intent: &str, report: &RebuildReport) -> Result<()> {
    if let Some(err) = report.outcome.partial_restore_error() {
        for pin in &report.outcome.missing {
            print_status(style, "warn", &format!("missing after {intent}: {pin}"));
        }
        for pin in &report.outcome.extra {
            print_status(style, "warn", &format!("extra after {intent}: {pin}"));
        }
        return Err(err.into());
    }

    if report.outcome.exit_code != 0 {
        return Err(Error::Subprocess {
            command: format!("pip install (batch {intent})"),
            code: report.outcome.exit_code,
        }
        .into());
    }

    print_status(
        style,
        "ok",
        &format!(
            "{intent} complete ({} packages); operation #{:06} journaled",
            report.outcome.achieved.len(),
            report.operation_id
        ),
    );
    Ok(())
}

pub fn run_undo(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    steps_back: u64,
    assume_yes: bool,
    principal: &str,
    command_line: &str,
) -> Result<()> {
    run_undo_with_executor(
        layout,
        config,
        style,
        steps_back,
        assume_yes,
        principal,
        command_line,
        run_captured,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn run_undo_with_executor<E>(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    steps_back: u64,
    assume_yes: bool,
    principal: &str,
    command_line: &str,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let journal = Journal::new(layout);
    let Some(target) = journal.nth_latest_complete(steps_back)? else {
        let any_complete = journal
            .list(None)?
            .iter()
            .any(|record| record.is_complete());
        if any_complete {
            return Err(Error::UnknownOperation { id: steps_back }.into());
        }
        print_status(style, "ok", "nothing to undo");
        return Ok(());
    };

    print_status(
        style,
        "step",
        &format!(
            "undo targets the state before operation #{:06} ({}): {} packages",
            target.id,
            target.command_line,
            target.freeze_before.len()
        ),
    );
    if !confirm("Rebuild the environment to that state?", assume_yes)? {
        print_status(style, "warn", "undo aborted");
        return Ok(());
    }

    let report = journaled_rebuild_with_executor(
        layout,
        config,
        style,
        principal,
        command_line,
        &target.freeze_before,
        &mut executor,
    )?;
    report_rebuild(style, "undo", &report)
}

pub fn run_restore(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    name: &str,
    assume_yes: bool,
    principal: &str,
    command_line: &str,
) -> Result<()> {
    run_restore_with_executor(
        layout,
        config,
        style,
        name,
        assume_yes,
        principal,
        command_line,
        run_captured,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn run_restore_with_executor<E>(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    name: &str,
    assume_yes: bool,
    principal: &str,
    command_line: &str,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let target = SnapshotStore::new(layout).load(name)?;
    print_status(
        style,
        "step",
        &format!("restore '{name}' pins {} packages", target.len()),
    );
    if !confirm("Rebuild the environment from this snapshot?", assume_yes)? {
        print_status(style, "warn", "restore aborted");
        return Ok(());
    }

    let report = journaled_rebuild_with_executor(
        layout,
        config,
        style,
        principal,
        command_line,
        &target,
        &mut executor,
    )?;
    report_rebuild(style, "restore", &report)
}

pub fn run_clean(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    keep_baseline: bool,
    assume_yes: bool,
    principal: &str,
    command_line: &str,
) -> Result<()> {
    run_clean_with_executor(
        layout,
        config,
        style,
        keep_baseline,
        assume_yes,
        principal,
        command_line,
        run_captured,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn run_clean_with_executor<E>(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    keep_baseline: bool,
    assume_yes: bool,
    principal: &str,
    command_line: &str,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let target = if keep_baseline {
        SnapshotStore::new(layout).load(BASELINE_SNAPSHOT)?
    } else {
        PackageSet::new()
    };

    let intent = if keep_baseline {
        format!("clean to baseline ({} packages)", target.len())
    } else {
        "clean to an empty environment".to_string()
    };
    if !confirm(&format!("{intent}. Proceed?"), assume_yes)? {
        print_status(style, "warn", "clean aborted");
        return Ok(());
    }

    let report = journaled_rebuild_with_executor(
        layout,
        config,
        style,
        principal,
        command_line,
        &target,
        &mut executor,
    )?;
    report_rebuild(style, "clean", &report)
}

// ---------------------------------------------------------------------------
// snapshots / share / import

pub fn run_snapshot(
    layout: &EnvLayout,
    style: OutputStyle,
    name: &str,
    assume_yes: bool,
) -> Result<()> {
    run_snapshot_with_executor(layout, style, name, assume_yes, run_captured)
}

pub fn run_snapshot_with_executor<E>(
    layout: &EnvLayout,
    style: OutputStyle,
    name: &str,
    assume_yes: bool,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    validate_snapshot_name(name)?;
    let store = SnapshotStore::new(layout);
    if store.exists(name)
        && !confirm(
            &format!("Snapshot '{name}' already exists. Overwrite?"),
            assume_yes,
        )?
    {
        print_status(style, "warn", "snapshot aborted");
        return Ok(());
    }

    let freeze = read_freeze_with_executor(layout, &mut executor)?;
    let path = store.save(name, &freeze)?;
    print_status(
        style,
        "ok",
        &format!(
            "snapshot '{name}' saved ({} packages) to {}",
            freeze.len(),
            path.display()
        ),
    );
    Ok(())
}

pub fn run_list_snapshots(layout: &EnvLayout) -> Result<()> {
    let snapshots = SnapshotStore::new(layout).list()?;
    for line in render_snapshot_lines(&snapshots) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_share(
    layout: &EnvLayout,
    style: OutputStyle,
    name: &str,
    out_dir: &Path,
    principal: &str,
) -> Result<()> {
    run_share_with_executor(layout, style, name, out_dir, principal, run_captured)
}

pub fn run_share_with_executor<E>(
    layout: &EnvLayout,
    style: OutputStyle,
    name: &str,
    out_dir: &Path,
    principal: &str,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    validate_snapshot_name(name)?;
    let freeze = read_freeze_with_executor(layout, &mut executor)?;
    let python_version = probe_python_version(layout, &mut executor).ok();

    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let author = format!("{principal}@{host}");
    let created_at = Utc::now();
    let rendered = render_share_document(
        &freeze,
        python_version.as_deref(),
        Some(&author),
        created_at,
    );

    let path = out_dir.join(format!(
        "{name}-{}.{SHARE_EXTENSION}",
        created_at.format("%Y%m%d")
    ));
    fs::write(&path, rendered)
        .with_context(|| format!("failed to write share file: {}", path.display()))?;

    print_status(
        style,
        "ok",
        &format!("shared {} packages to {}", freeze.len(), path.display()),
    );
    Ok(())
}

pub fn run_import(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    file: &Path,
    assume_yes: bool,
    dry_run: bool,
    principal: &str,
    command_line: &str,
) -> Result<()> {
    run_import_with_executor(
        layout,
        config,
        style,
        file,
        assume_yes,
        dry_run,
        principal,
        command_line,
        run_captured,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn run_import_with_executor<E>(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    file: &Path,
    assume_yes: bool,
    dry_run: bool,
    principal: &str,
    command_line: &str,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let raw = fs::read_to_string(file)
        .with_context(|| format!("failed to read share file: {}", file.display()))?;
    let document = parse_share_document(&raw)?;
    document.verify_integrity()?;

    if let Some(shared_python) = &document.python_version {
        if let Ok(local_python) = probe_python_version(layout, &mut executor) {
            if !python_version_family_matches(shared_python, &local_python) {
                print_status(
                    style,
                    "warn",
                    &format!(
                        "share file was captured on {shared_python}; this environment runs {local_python}"
                    ),
                );
            }
        }
    }

    let current = read_freeze_with_executor(layout, &mut executor)?;
    let preview = diff(&current, &document.packages);
    print_status(
        style,
        "step",
        &format!(
            "import of {} packages would apply: {}",
            document.packages.len(),
            preview.summary()
        ),
    );
    for line in render_change_set_lines(&preview, style) {
        println!("{line}");
    }

    if dry_run {
        print_status(style, "ok", "dry run; nothing changed");
        return Ok(());
    }
    if !confirm("Rebuild the environment from this share file?", assume_yes)? {
        print_status(style, "warn", "import aborted");
        return Ok(());
    }

    let report = journaled_rebuild_with_executor(
        layout,
        config,
        style,
        principal,
        command_line,
        &document.packages,
        &mut executor,
    )?;
    report_rebuild(style, "import", &report)
}

// ---------------------------------------------------------------------------
// doctor / config

pub fn run_doctor(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    fix: bool,
) -> Result<()> {
    run_doctor_with_executor(layout, config, style, fix, run_captured)
}

pub fn run_doctor_with_executor<E>(
    layout: &EnvLayout,
    config: &Config,
    style: OutputStyle,
    fix: bool,
    mut executor: E,
) -> Result<()>
where
    E: FnMut(&mut Command) -> io::Result<ExecOutput>,
{
    let mut found = 0_usize;
    let mut repaired = 0_usize;

    if !layout.root().exists() {
        print_status(
            style,
            "error",
            &format!(
                "environment root missing: {} (run 'venvkeep init')",
                layout.root().display()
            ),
        );
        return Err(anyhow!("doctor found 1 problem(s)"));
    }
    print_status(style, "ok", &format!("root present: {}", layout.root().display()));

    match read_freeze_with_executor(layout, &mut executor) {
        Ok(freeze) => {
            print_status(style, "ok", &format!("pip answers ({} packages)", freeze.len()));
        }
        Err(err) => {
            found += 1;
            print_status(style, "error", &format!("{err:#} (run 'venvkeep init')"));
        }
    }

    if layout.interpreter_path().is_file() {
        print_status(style, "ok", "interpreter record present");
    } else {
        found += 1;
        print_status(style, "warn", "interpreter record missing");
        if fix {
            match find_base_python() {
                Ok(python) => {
                    write_atomic(
                        &layout.interpreter_path(),
                        format!("{}\n", python.display()).as_bytes(),
                    )?;
                    repaired += 1;
                    print_status(
                        style,
                        "ok",
                        &format!("recorded interpreter {}", python.display()),
                    );
                }
                Err(err) => print_status(style, "error", &format!("{err:#}")),
            }
        }
    }

    let journal = Journal::new(layout);
    let journal_problems = journal.verify()?;
    if journal_problems.is_empty() {
        print_status(style, "ok", "journal is contiguous and consistent");
    } else {
        // Integrity violations are reported, never silently repaired: a
        // missing record cannot be reinvented.
        for problem in &journal_problems {
            found += 1;
            print_status(style, "error", problem);
        }
    }

    let interrupted = journal.unacknowledged_interrupted()?;
    if interrupted.is_empty() {
        print_status(style, "ok", "no interrupted operations");
    } else {
        for record in &interrupted {
            found += 1;
            print_status(
                style,
                "warn",
                &format!(
                    "operation #{:06} ({}) was interrupted",
                    record.id, record.command_line
                ),
            );
            if fix {
                journal.acknowledge(record.id)?;
                repaired += 1;
                print_status(style, "ok", &format!("acknowledged #{:06}", record.id));
            }
        }
    }

    if lock_is_stale(layout)? {
        found += 1;
        print_status(style, "warn", "stale environment lock (holder is gone)");
        if fix && remove_stale_lock(layout)? {
            repaired += 1;
            print_status(style, "ok", "removed stale lock");
        }
    } else {
        print_status(style, "ok", "no stale lock");
    }

    let mut stale_temps = stale_temp_files(&layout.history_dir())?;
    stale_temps.extend(stale_temp_files(&layout.snapshots_dir())?);
    if stale_temps.is_empty() {
        print_status(style, "ok", "no leftover temp files");
    } else {
        for path in &stale_temps {
            found += 1;
            print_status(style, "warn", &format!("leftover temp file: {}", path.display()));
            if fix {
                fs::remove_file(path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                repaired += 1;
            }
        }
        if fix && repaired > 0 {
            print_status(style, "ok", "removed leftover temp files");
        }
    }

    if config.snapshots.auto_baseline && !SnapshotStore::new(layout).exists(BASELINE_SNAPSHOT) {
        print_status(
            style,
            "warn",
            "baseline snapshot missing (captured automatically at init)",
        );
    }

    let unresolved = found.saturating_sub(repaired);
    if unresolved > 0 {
        let hint = if fix { "" } else { "; run 'venvkeep doctor --fix'" };
        return Err(anyhow!("doctor found {unresolved} problem(s){hint}"));
    }

    print_status(style, "ok", "environment is healthy");
    Ok(())
}

pub fn run_config(
    layout: &EnvLayout,
    mut config: Config,
    key: Option<String>,
    value: Option<String>,
    style: OutputStyle,
) -> Result<()> {
    match (key, value) {
        (None, _) => {
            for (key, value) in config.entries() {
                println!("{key} = {value}");
            }
        }
        (Some(key), None) => {
            println!("{}", config.get(&key)?);
        }
        (Some(key), Some(value)) => {
            config.set(&key, &value)?;
            config.save(layout)?;
            print_status(style, "ok", &format!("{key} = {value}"));
        }
    }
    Ok(())
}
