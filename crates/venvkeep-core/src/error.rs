use std::path::PathBuf;

use thiserror::Error;

/// Failure classes that scripting callers distinguish by exit code.
///
/// Everything else propagates as plain `anyhow` context chains and maps to
/// the generic failure code.
#[derive(Debug, Error)]
pub enum Error {
    #[error("environment unavailable at {}: {reason}", .root.display())]
    EnvironmentUnavailable { root: PathBuf, reason: String },

    #[error("freeze line {line_number} is not a 'name==version' pair: '{line}'")]
    FreezeParse { line_number: usize, line: String },

    #[error("{}", busy_message(.holder))]
    EnvironmentBusy { holder: Option<u32> },

    #[error("unknown operation id {id}")]
    UnknownOperation { id: u64 },

    #[error("operation {id} is already complete")]
    AlreadyComplete { id: u64 },

    #[error("unknown snapshot '{name}'")]
    UnknownSnapshot { name: String },

    #[error("{}", partial_restore_message(.missing, .extra))]
    PartialRestore {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("wrapped command exited with code {code}: {command}")]
    Subprocess { command: String, code: i32 },
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::EnvironmentBusy { .. } => 3,
            Self::UnknownOperation { .. }
            | Self::AlreadyComplete { .. }
            | Self::UnknownSnapshot { .. } => 4,
            Self::PartialRestore { .. } => 5,
            Self::Subprocess { .. } => 6,
            Self::EnvironmentUnavailable { .. } | Self::FreezeParse { .. } => 1,
        }
    }
}

fn busy_message(holder: &Option<u32>) -> String {
    match holder {
        Some(pid) => format!("environment is locked by another operation (pid {pid})"),
        None => "environment is locked by another operation".to_string(),
    }
}

fn partial_restore_message(missing: &[String], extra: &[String]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing: {}", missing.join(", ")));
    }
    if !extra.is_empty() {
        parts.push(format!("extra: {}", extra.join(", ")));
    }
    format!("restore left the environment off-target ({})", parts.join("; "))
}
