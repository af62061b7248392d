use anstyle::{AnsiColor, Effects, Style};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};

use venvkeep_core::ChangeSet;
use venvkeep_env::RebuildStep;
use venvkeep_store::{OperationRecord, SnapshotInfo};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    let symbol = match status {
        "ok" => "✓",
        "warn" => "!",
        "error" => "✗",
        _ => "•",
    };
    match style {
        OutputStyle::Plain => format!("{symbol} {message}"),
        OutputStyle::Rich => format!("{} {message}", colorize(status_style(status), symbol)),
    }
}

pub fn print_status(style: OutputStyle, status: &str, message: &str) {
    println!("{}", render_status_line(style, status, message));
}

fn status_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::Green,
        "warn" => AnsiColor::Yellow,
        "error" => AnsiColor::Red,
        _ => AnsiColor::Cyan,
    };
    Style::new().fg_color(Some(color.into())).effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

/// `+`/`-`/`~` lines sorted by name, with a downgrade annotation when the
/// dotted-numeric comparison is conclusive.
pub fn render_change_set_lines(change_set: &ChangeSet, style: OutputStyle) -> Vec<String> {
    if change_set.is_empty() {
        return vec!["no changes".to_string()];
    }

    let paint = |color: AnsiColor, text: String| match style {
        OutputStyle::Plain => text,
        OutputStyle::Rich => colorize(Style::new().fg_color(Some(color.into())), &text),
    };

    let mut lines = Vec::new();
    for (name, version) in &change_set.added {
        lines.push(paint(AnsiColor::Green, format!("+ {name}=={version}")));
    }
    for (name, version) in &change_set.removed {
        lines.push(paint(AnsiColor::Red, format!("- {name}=={version}")));
    }
    for (name, change) in &change_set.modified {
        let annotation = if change.is_downgrade() { " (downgrade)" } else { "" };
        lines.push(paint(
            AnsiColor::Yellow,
            format!("~ {name} {} -> {}{annotation}", change.old, change.new),
        ));
    }
    lines
}

pub fn format_unix_timestamp(unix: u64) -> String {
    DateTime::<Utc>::from_timestamp(unix as i64, 0)
        .map(|timestamp| timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| format!("@{unix}"))
}

pub fn render_history_lines(
    records: &[OperationRecord],
    detailed: bool,
    style: OutputStyle,
) -> Vec<String> {
    if records.is_empty() {
        return vec!["no operations journaled yet".to_string()];
    }

    let mut lines = Vec::new();
    for record in records {
        let outcome = match (record.status.label(), record.exit_code) {
            (label, Some(0)) => label.to_string(),
            (label, Some(code)) => format!("{label}, exit {code}"),
            (label, None) => label.to_string(),
        };
        let summary = record
            .change_set
            .as_ref()
            .map(|change_set| format!("  [{}]", change_set.summary()))
            .unwrap_or_default();
        lines.push(format!(
            "#{:06}  {}  {}  {}  {}{}",
            record.id,
            format_unix_timestamp(record.started_at_unix),
            outcome,
            record.principal,
            record.command_line,
            summary,
        ));

        if detailed {
            match &record.change_set {
                Some(change_set) => {
                    for line in render_change_set_lines(change_set, style) {
                        lines.push(format!("    {line}"));
                    }
                }
                None => lines.push("    (no after-state recorded)".to_string()),
            }
        }
    }
    lines
}

pub fn render_snapshot_lines(snapshots: &[SnapshotInfo]) -> Vec<String> {
    if snapshots.is_empty() {
        return vec!["no snapshots yet".to_string()];
    }

    snapshots
        .iter()
        .map(|snapshot| {
            format!(
                "{}  {} packages  {}",
                snapshot.name,
                snapshot.package_count,
                format_unix_timestamp(snapshot.created_at_unix),
            )
        })
        .collect()
}

/// Progress over the four rebuild steps; suppressed entirely in Plain mode,
/// which prints one status line per step instead.
pub struct RebuildProgress {
    style: OutputStyle,
    bar: Option<ProgressBar>,
}

impl RebuildProgress {
    pub fn start(style: OutputStyle) -> Self {
        let bar = if style == OutputStyle::Rich {
            let bar = ProgressBar::new(4);
            if let Ok(template) =
                ProgressStyle::with_template("{spinner:.cyan.bold} {msg:<28} [{bar:20.cyan/blue}] {pos}/{len}")
            {
                bar.set_style(template.progress_chars("=>-"));
            }
            Some(bar)
        } else {
            None
        };
        Self { style, bar }
    }

    pub fn observe(&mut self, step: RebuildStep) {
        match &self.bar {
            Some(bar) => {
                bar.set_message(step.label().to_string());
                bar.inc(1);
            }
            None => print_status(self.style, "step", step.label()),
        }
    }

    pub fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}
