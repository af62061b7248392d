use std::fs;
use std::io;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fs_utils::write_atomic;
use crate::EnvLayout;

/// Process-wide settings, loaded once at startup from `<root>/config.toml`.
/// Absent keys fall back to defaults; the file is never re-read
/// mid-operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub history: HistoryConfig,
    pub snapshots: SnapshotsConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: u32,
    pub auto_snapshot: bool,
    pub show_diff_after_install: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            auto_snapshot: false,
            show_diff_after_install: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotsConfig {
    pub auto_baseline: bool,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            auto_baseline: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub color: bool,
    pub verbose: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            color: true,
            verbose: false,
        }
    }
}

impl Config {
    pub fn load(layout: &EnvLayout) -> Result<Self> {
        let path = layout.config_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config: {}", path.display()));
            }
        };

        toml::from_str(&raw).with_context(|| format!("failed to parse config: {}", path.display()))
    }

    pub fn save(&self, layout: &EnvLayout) -> Result<()> {
        let path = layout.config_path();
        let rendered =
            toml::to_string_pretty(self).context("failed to serialize config")?;
        write_atomic(&path, rendered.as_bytes())
            .with_context(|| format!("failed to write config: {}", path.display()))
    }

    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "history.max_entries" => self.history.max_entries.to_string(),
            "history.auto_snapshot" => self.history.auto_snapshot.to_string(),
            "history.show_diff_after_install" => self.history.show_diff_after_install.to_string(),
            "snapshots.auto_baseline" => self.snapshots.auto_baseline.to_string(),
            "ui.color" => self.ui.color.to_string(),
            "ui.verbose" => self.ui.verbose.to_string(),
            _ => anyhow::bail!("unrecognized config key: '{key}'"),
        };
        Ok(value)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "history.max_entries" => {
                self.history.max_entries = value.parse().with_context(|| {
                    format!("history.max_entries must be a non-negative integer, got '{value}'")
                })?;
            }
            "history.auto_snapshot" => self.history.auto_snapshot = parse_bool(key, value)?,
            "history.show_diff_after_install" => {
                self.history.show_diff_after_install = parse_bool(key, value)?;
            }
            "snapshots.auto_baseline" => self.snapshots.auto_baseline = parse_bool(key, value)?,
            "ui.color" => self.ui.color = parse_bool(key, value)?,
            "ui.verbose" => self.ui.verbose = parse_bool(key, value)?,
            _ => anyhow::bail!("unrecognized config key: '{key}'"),
        }
        Ok(())
    }

    /// `(key, value)` pairs in display order for the bare `config` command.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("history.max_entries", self.history.max_entries.to_string()),
            ("history.auto_snapshot", self.history.auto_snapshot.to_string()),
            (
                "history.show_diff_after_install",
                self.history.show_diff_after_install.to_string(),
            ),
            (
                "snapshots.auto_baseline",
                self.snapshots.auto_baseline.to_string(),
            ),
            ("ui.color", self.ui.color.to_string()),
            ("ui.verbose", self.ui.verbose.to_string()),
        ]
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => anyhow::bail!("{key} must be 'true' or 'false', got '{value}'"),
    }
}
