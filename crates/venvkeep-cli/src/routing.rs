use std::path::{Path, PathBuf};

/// Where a package-management command should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// An already-active project environment: pass-through, never journaled.
    Foreground(PathBuf),
    /// The system-wide managed root.
    System,
    /// The caller's own managed root.
    PerPrincipal,
}

/// Pure resolver: an explicitly active foreground environment always wins;
/// otherwise privileged callers get the system environment and everyone
/// else their per-principal one. Never creates anything.
pub fn resolve_route(
    caller_is_privileged: bool,
    foreground_env: Option<&Path>,
) -> RouteTarget {
    if let Some(env) = foreground_env {
        return RouteTarget::Foreground(env.to_path_buf());
    }
    if caller_is_privileged {
        return RouteTarget::System;
    }
    RouteTarget::PerPrincipal
}

/// An activated virtualenv in the calling context, per `VIRTUAL_ENV`.
pub fn detect_foreground_env() -> Option<PathBuf> {
    std::env::var_os("VIRTUAL_ENV")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn caller_is_privileged() -> bool {
    #[cfg(target_os = "linux")]
    if let Some(uid) = proc_effective_uid() {
        return uid == 0;
    }

    matches!(
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .ok()
            .as_deref(),
        Some("root")
    )
}

// `Uid:` carries real, effective, saved and fs uids in that order.
#[cfg(target_os = "linux")]
fn proc_effective_uid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            let mut fields = rest.split_whitespace();
            let _real = fields.next()?;
            return fields.next()?.parse().ok();
        }
    }
    None
}

/// The identity operations run as, recorded in every journal entry.
pub fn principal() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Warnings for a working directory that looks like a Python project while
/// a command is about to hit the managed environment instead.
pub fn project_context_hints(dir: &Path) -> Vec<String> {
    let mut hints = Vec::new();
    if dir.join("requirements.txt").is_file() {
        hints.push(
            "requirements.txt found here; a project-local environment may be intended".to_string(),
        );
    }
    if dir.join("pyproject.toml").is_file() {
        hints.push(
            "pyproject.toml found here; a project-local environment may be intended".to_string(),
        );
    }
    if dir.join("venv").is_dir() {
        hints.push("an unactivated venv/ directory exists here".to_string());
    }
    hints
}
