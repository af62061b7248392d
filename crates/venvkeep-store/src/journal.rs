use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use venvkeep_core::{diff, ChangeSet, Error, PackageSet};

use crate::fs_utils::{remove_file_if_exists, write_atomic};
use crate::EnvLayout;

const RECORD_SCHEMA_VERSION: u32 = 1;

/// First half of an operation record, written durably before the wrapped
/// command runs. Its presence alone marks the operation interrupted.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BeforeHalf {
    version: u32,
    id: u64,
    principal: String,
    command_line: String,
    started_at_unix: u64,
    freeze_before: PackageSet,
}

/// Second half, written once the wrapped command finished. The change set is
/// derivable from the two freezes and is re-checked by `verify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AfterHalf {
    version: u32,
    id: u64,
    finished_at_unix: u64,
    exit_code: i32,
    freeze_after: PackageSet,
    change_set: ChangeSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Complete,
    Interrupted { acknowledged: bool },
}

impl OperationStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Interrupted { acknowledged: false } => "interrupted",
            Self::Interrupted { acknowledged: true } => "interrupted (acknowledged)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub id: u64,
    pub principal: String,
    pub command_line: String,
    pub started_at_unix: u64,
    pub finished_at_unix: Option<u64>,
    pub freeze_before: PackageSet,
    pub freeze_after: Option<PackageSet>,
    pub change_set: Option<ChangeSet>,
    pub exit_code: Option<i32>,
    pub status: OperationStatus,
}

impl OperationRecord {
    pub fn is_complete(&self) -> bool {
        self.status == OperationStatus::Complete
    }
}

/// Append-only, gapless, monotonically numbered operation log under
/// `<root>/history/`. Writers are serialized by the environment lock; the
/// two-phase file pair keeps every state readable by concurrent readers.
#[derive(Debug, Clone)]
pub struct Journal {
    layout: EnvLayout,
}

impl Journal {
    pub fn new(layout: &EnvLayout) -> Self {
        Self {
            layout: layout.clone(),
        }
    }

    /// Allocate the next id and durably persist the PENDING half. Returns
    /// only after the record is on disk.
    pub fn begin(
        &self,
        principal: &str,
        command_line: &str,
        freeze_before: &PackageSet,
        started_at_unix: u64,
    ) -> Result<u64> {
        let history_dir = self.layout.history_dir();
        fs::create_dir_all(&history_dir)
            .with_context(|| format!("failed to create {}", history_dir.display()))?;

        let id = self.record_ids()?.last().copied().unwrap_or(0) + 1;
        let half = BeforeHalf {
            version: RECORD_SCHEMA_VERSION,
            id,
            principal: principal.to_string(),
            command_line: command_line.to_string(),
            started_at_unix,
            freeze_before: freeze_before.clone(),
        };

        let path = self.layout.record_before_path(id);
        let payload =
            serde_json::to_vec_pretty(&half).context("failed to serialize operation record")?;
        write_atomic(&path, &payload)
            .with_context(|| format!("failed to write operation record: {}", path.display()))?;
        Ok(id)
    }

    /// Persist the after half: computes the change set from the stored
    /// before-freeze, never trusting the caller to supply one.
    pub fn complete(
        &self,
        id: u64,
        freeze_after: &PackageSet,
        exit_code: i32,
        finished_at_unix: u64,
    ) -> Result<ChangeSet> {
        let before = self
            .read_before(id)?
            .ok_or(Error::UnknownOperation { id })?;
        if self.layout.record_after_path(id).exists() {
            return Err(Error::AlreadyComplete { id }.into());
        }

        let change_set = diff(&before.freeze_before, freeze_after);
        let half = AfterHalf {
            version: RECORD_SCHEMA_VERSION,
            id,
            finished_at_unix,
            exit_code,
            freeze_after: freeze_after.clone(),
            change_set: change_set.clone(),
        };

        let path = self.layout.record_after_path(id);
        let payload =
            serde_json::to_vec_pretty(&half).context("failed to serialize operation record")?;
        write_atomic(&path, &payload)
            .with_context(|| format!("failed to write operation record: {}", path.display()))?;
        Ok(change_set)
    }

    pub fn get(&self, id: u64) -> Result<OperationRecord> {
        let before = self
            .read_before(id)?
            .ok_or(Error::UnknownOperation { id })?;
        self.assemble(before)
    }

    /// Most-recent-first. Tolerates in-flight and interrupted records.
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<OperationRecord>> {
        let mut ids = self.record_ids()?;
        ids.reverse();
        if let Some(limit) = limit {
            ids.truncate(limit);
        }

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(self.get(id)?);
        }
        Ok(records)
    }

    pub fn last_n(&self, n: usize) -> Result<Vec<OperationRecord>> {
        self.list(Some(n))
    }

    /// The operation `steps_back` (1-based) positions back among COMPLETE
    /// records, counted from the latest. Interrupted records never count.
    pub fn nth_latest_complete(&self, steps_back: u64) -> Result<Option<OperationRecord>> {
        if steps_back == 0 {
            return Ok(None);
        }

        let mut remaining = steps_back;
        for record in self.list(None)? {
            if !record.is_complete() {
                continue;
            }
            remaining -= 1;
            if remaining == 0 {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Unacknowledged interrupted records, oldest first.
    pub fn unacknowledged_interrupted(&self) -> Result<Vec<OperationRecord>> {
        let mut records = Vec::new();
        for id in self.record_ids()? {
            let record = self.get(id)?;
            if record.status == (OperationStatus::Interrupted { acknowledged: false }) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Mark an interrupted record as seen. Completed records cannot be
    /// acknowledged; the marker would be meaningless.
    pub fn acknowledge(&self, id: u64) -> Result<()> {
        let record = self.get(id)?;
        if record.is_complete() {
            return Err(Error::AlreadyComplete { id }.into());
        }

        let path = self.layout.record_ack_path(id);
        write_atomic(&path, b"acknowledged\n")
            .with_context(|| format!("failed to write ack marker: {}", path.display()))
    }

    /// Drop the oldest prunable records until at most `max_entries` remain.
    /// COMPLETE and acknowledged-interrupted records are prunable;
    /// unacknowledged interrupted records are retained regardless of limit.
    /// Pruning stops at the oldest retained record rather than punching a
    /// hole around it, so the surviving id window stays contiguous and
    /// `verify` can keep treating internal gaps as corruption. Returns
    /// pruned ids.
    pub fn prune(&self, max_entries: usize) -> Result<Vec<u64>> {
        let ids = self.record_ids()?;
        let mut prunable_total = 0_usize;
        for id in &ids {
            let record = self.get(*id)?;
            if record.status != (OperationStatus::Interrupted { acknowledged: false }) {
                prunable_total += 1;
            }
        }

        let mut excess = prunable_total.saturating_sub(max_entries);
        let mut pruned = Vec::new();
        for id in ids {
            if excess == 0 {
                break;
            }
            let record = self.get(id)?;
            if record.status == (OperationStatus::Interrupted { acknowledged: false }) {
                break;
            }

            remove_file_if_exists(&self.layout.record_before_path(id)).with_context(|| {
                format!("failed to prune record {id} from {}", self.layout.history_dir().display())
            })?;
            remove_file_if_exists(&self.layout.record_after_path(id)).with_context(|| {
                format!("failed to prune record {id} from {}", self.layout.history_dir().display())
            })?;
            let _ = remove_file_if_exists(&self.layout.record_ack_path(id));
            pruned.push(id);
            excess -= 1;
        }
        Ok(pruned)
    }

    /// Integrity problems a doctor run should surface: id gaps, orphaned
    /// after-halves, and stored change sets that drift from recomputation.
    pub fn verify(&self) -> Result<Vec<String>> {
        let mut problems = Vec::new();
        let ids = self.record_ids()?;

        if let (Some(first), Some(last)) = (ids.first(), ids.last()) {
            let expected_len = (last - first + 1) as usize;
            if ids.len() != expected_len {
                let mut expected = *first;
                for id in &ids {
                    while expected < *id {
                        problems.push(format!("journal id {expected:06} is missing"));
                        expected += 1;
                    }
                    expected = id + 1;
                }
            }
        }

        for id in &ids {
            let record = self.get(*id)?;
            if let (Some(freeze_after), Some(stored)) = (&record.freeze_after, &record.change_set) {
                let recomputed = diff(&record.freeze_before, freeze_after);
                if &recomputed != stored {
                    problems.push(format!(
                        "record {id:06} change set does not match recomputation"
                    ));
                }
            }
        }

        if let Some(orphans) = self.orphaned_after_ids()? {
            for id in orphans {
                problems.push(format!(
                    "record {id:06} has an after half but no before half"
                ));
            }
        }

        Ok(problems)
    }

    pub fn record_ids(&self) -> Result<Vec<u64>> {
        self.scan_ids("_before.json")
    }

    fn orphaned_after_ids(&self) -> Result<Option<Vec<u64>>> {
        let before_ids = self.record_ids()?;
        let after_ids = self.scan_ids("_after.json")?;
        let orphans: Vec<u64> = after_ids
            .into_iter()
            .filter(|id| !before_ids.contains(id))
            .collect();
        Ok(if orphans.is_empty() { None } else { Some(orphans) })
    }

    fn scan_ids(&self, suffix: &str) -> Result<Vec<u64>> {
        let dir = self.layout.history_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(id) = name
                .strip_suffix(suffix)
                .and_then(|stem| stem.parse::<u64>().ok())
            else {
                continue;
            };
            ids.push(id);
        }

        ids.sort_unstable();
        Ok(ids)
    }

    fn read_before(&self, id: u64) -> Result<Option<BeforeHalf>> {
        read_half(self.layout.record_before_path(id))
    }

    fn read_after(&self, id: u64) -> Result<Option<AfterHalf>> {
        read_half(self.layout.record_after_path(id))
    }

    fn assemble(&self, before: BeforeHalf) -> Result<OperationRecord> {
        let after = self.read_after(before.id)?;
        let status = match &after {
            Some(_) => OperationStatus::Complete,
            None => OperationStatus::Interrupted {
                acknowledged: self.layout.record_ack_path(before.id).exists(),
            },
        };

        Ok(OperationRecord {
            id: before.id,
            principal: before.principal,
            command_line: before.command_line,
            started_at_unix: before.started_at_unix,
            finished_at_unix: after.as_ref().map(|half| half.finished_at_unix),
            freeze_before: before.freeze_before,
            freeze_after: after.as_ref().map(|half| half.freeze_after.clone()),
            change_set: after.as_ref().map(|half| half.change_set.clone()),
            exit_code: after.as_ref().map(|half| half.exit_code),
            status,
        })
    }
}

fn read_half<T: serde::de::DeserializeOwned>(path: PathBuf) -> Result<Option<T>> {
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read operation record: {}", path.display()));
        }
    };

    let half = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse operation record: {}", path.display()))?;
    Ok(Some(half))
}
