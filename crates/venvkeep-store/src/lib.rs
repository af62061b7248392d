mod config;
mod fs_utils;
mod journal;
mod layout;
mod lock;
mod snapshots;

pub use config::{Config, HistoryConfig, SnapshotsConfig, UiConfig};
pub use fs_utils::{remove_file_if_exists, stale_temp_files, write_atomic};
pub use journal::{Journal, OperationRecord, OperationStatus};
pub use layout::{default_principal_root, default_system_root, EnvLayout};
pub use lock::{lock_is_stale, read_lock_holder, remove_stale_lock, EnvLock};
pub use snapshots::{
    validate_snapshot_name, SnapshotInfo, SnapshotStore, AUTO_BACKUP_SNAPSHOT, BASELINE_SNAPSHOT,
};

#[cfg(test)]
mod tests;
