use super::*;

use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};

use venvkeep_core::PackageSet;

static TEST_ROOT_SEQ: AtomicU64 = AtomicU64::new(0);

fn test_layout() -> EnvLayout {
    let seq = TEST_ROOT_SEQ.fetch_add(1, Ordering::SeqCst);
    let root = std::env::temp_dir().join(format!(
        "venvkeep-store-test-{}-{seq}",
        std::process::id()
    ));
    EnvLayout::new(root)
}

fn sample_set(pairs: &[(&str, &str)]) -> PackageSet {
    let mut set = PackageSet::new();
    for (name, version) in pairs {
        set.insert(name, *version);
    }
    set
}

#[test]
fn layout_paths_match_on_disk_schema() {
    let layout = EnvLayout::new("/tmp/envroot");
    assert_eq!(layout.history_dir(), layout.root().join("history"));
    assert_eq!(
        layout.record_before_path(7),
        layout.history_dir().join("000007_before.json")
    );
    assert_eq!(
        layout.record_after_path(123456),
        layout.history_dir().join("123456_after.json")
    );
    assert_eq!(
        layout.snapshot_path("ml-stack"),
        layout.snapshots_dir().join("ml-stack.txt")
    );
    assert_eq!(layout.config_path(), layout.root().join("config.toml"));
    assert_eq!(layout.lock_path(), layout.root().join("lock"));

    if cfg!(windows) {
        assert!(layout.pip_bin().ends_with("Scripts/pip.exe"));
    } else {
        assert!(layout.pip_bin().ends_with("bin/pip"));
    }
}

#[test]
fn write_atomic_leaves_no_temp_files() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let path = layout.history_dir().join("payload.json");
    write_atomic(&path, b"{\"ok\":true}").expect("must write");
    assert_eq!(fs::read_to_string(&path).expect("must read"), "{\"ok\":true}");
    assert!(
        stale_temp_files(&layout.history_dir())
            .expect("must scan")
            .is_empty()
    );

    write_atomic(&path, b"{\"ok\":false}").expect("must overwrite");
    assert_eq!(fs::read_to_string(&path).expect("must read"), "{\"ok\":false}");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn stale_temp_files_are_detected() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let stale = layout.history_dir().join(".000003_after.json.tmp.1234.0");
    fs::write(&stale, b"torn").expect("must seed stale temp");

    let found = stale_temp_files(&layout.history_dir()).expect("must scan");
    assert_eq!(found, vec![stale]);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn config_defaults_apply_when_file_is_absent() {
    let layout = test_layout();
    let config = Config::load(&layout).expect("must default");
    assert_eq!(config.history.max_entries, 50);
    assert!(!config.history.auto_snapshot);
    assert!(config.history.show_diff_after_install);
    assert!(config.snapshots.auto_baseline);
    assert!(config.ui.color);
    assert!(!config.ui.verbose);
}

#[test]
fn config_round_trips_through_toml() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let mut config = Config::default();
    config.set("history.max_entries", "10").expect("must set");
    config.set("ui.verbose", "true").expect("must set");
    config.save(&layout).expect("must save");

    let reloaded = Config::load(&layout).expect("must load");
    assert_eq!(reloaded.history.max_entries, 10);
    assert!(reloaded.ui.verbose);
    assert_eq!(reloaded, config);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn config_defaults_fill_absent_keys_in_partial_file() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");
    fs::write(layout.config_path(), "[history]\nmax_entries = 5\n").expect("must seed config");

    let config = Config::load(&layout).expect("must load");
    assert_eq!(config.history.max_entries, 5);
    assert!(config.history.show_diff_after_install, "absent key takes default");
    assert!(config.snapshots.auto_baseline, "absent table takes default");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn config_rejects_unknown_keys_and_bad_values() {
    let mut config = Config::default();
    let err = config.set("history.nope", "1").expect_err("must reject key");
    assert!(err.to_string().contains("unrecognized config key"));

    let err = config
        .set("ui.color", "maybe")
        .expect_err("must reject value");
    assert!(err.to_string().contains("must be 'true' or 'false'"));

    let err = config.get("nope").expect_err("must reject key");
    assert!(err.to_string().contains("unrecognized config key"));

    assert_eq!(config.get("ui.color").expect("must get"), "true");
    assert_eq!(config.entries().len(), 6);
}

#[test]
fn journal_ids_start_at_one_and_stay_gapless() {
    let layout = test_layout();
    let journal = Journal::new(&layout);
    let empty = PackageSet::new();

    let first = journal
        .begin("alice", "venvkeep pip install six", &empty, 100)
        .expect("must begin");
    assert_eq!(first, 1);
    journal
        .complete(first, &sample_set(&[("six", "1.16.0")]), 0, 110)
        .expect("must complete");

    // An interrupted operation still consumes its id.
    let second = journal
        .begin("alice", "venvkeep pip install flask", &sample_set(&[("six", "1.16.0")]), 120)
        .expect("must begin");
    assert_eq!(second, 2);

    let third = journal
        .begin("alice", "venvkeep undo 1", &sample_set(&[("six", "1.16.0")]), 130)
        .expect("must begin");
    assert_eq!(third, 3);

    assert_eq!(journal.record_ids().expect("must scan"), vec![1, 2, 3]);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn journal_complete_stores_change_set_matching_recomputation() {
    let layout = test_layout();
    let journal = Journal::new(&layout);

    let before = sample_set(&[("six", "1.15.0")]);
    let after = sample_set(&[("six", "1.16.0"), ("requests", "2.31.0")]);
    let id = journal
        .begin("alice", "venvkeep pip install requests six -U", &before, 100)
        .expect("must begin");
    let change_set = journal.complete(id, &after, 0, 160).expect("must complete");

    assert_eq!(change_set, venvkeep_core::diff(&before, &after));
    assert_eq!(change_set.added.len(), 1);
    assert_eq!(change_set.modified.len(), 1);

    let record = journal.get(id).expect("must get");
    assert!(record.is_complete());
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(record.finished_at_unix, Some(160));
    assert_eq!(record.change_set.as_ref(), Some(&change_set));
    assert_eq!(record.freeze_after.as_ref(), Some(&after));

    assert!(journal.verify().expect("must verify").is_empty());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn journal_reports_pending_record_as_interrupted() {
    let layout = test_layout();
    let journal = Journal::new(&layout);

    let id = journal
        .begin("alice", "venvkeep pip install six", &PackageSet::new(), 100)
        .expect("must begin");

    let record = journal.get(id).expect("readers must not fail on in-flight records");
    assert_eq!(
        record.status,
        OperationStatus::Interrupted { acknowledged: false }
    );
    assert!(record.freeze_after.is_none());
    assert!(record.change_set.is_none());
    assert!(record.exit_code.is_none());

    let listed = journal.list(None).expect("must list");
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].is_complete());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn journal_complete_rejects_unknown_and_repeated_ids() {
    let layout = test_layout();
    let journal = Journal::new(&layout);
    let set = sample_set(&[("six", "1.16.0")]);

    let err = journal
        .complete(42, &set, 0, 100)
        .expect_err("unknown id must fail");
    assert!(matches!(
        err.downcast_ref::<venvkeep_core::Error>(),
        Some(venvkeep_core::Error::UnknownOperation { id: 42 })
    ));

    let id = journal
        .begin("alice", "venvkeep pip install six", &PackageSet::new(), 100)
        .expect("must begin");
    journal.complete(id, &set, 0, 110).expect("must complete");
    let err = journal
        .complete(id, &set, 0, 120)
        .expect_err("second completion must fail");
    assert!(matches!(
        err.downcast_ref::<venvkeep_core::Error>(),
        Some(venvkeep_core::Error::AlreadyComplete { id: 1 })
    ));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn journal_list_is_most_recent_first_with_limit() {
    let layout = test_layout();
    let journal = Journal::new(&layout);
    let empty = PackageSet::new();

    for index in 0..4 {
        let id = journal
            .begin("alice", &format!("venvkeep pip install pkg{index}"), &empty, 100 + index)
            .expect("must begin");
        journal.complete(id, &empty, 0, 200 + index).expect("must complete");
    }

    let all = journal.list(None).expect("must list");
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![4, 3, 2, 1]);

    let limited = journal.last_n(2).expect("must list");
    assert_eq!(limited.iter().map(|r| r.id).collect::<Vec<_>>(), vec![4, 3]);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn undo_resolution_skips_interrupted_records() {
    let layout = test_layout();
    let journal = Journal::new(&layout);

    let base = sample_set(&[("six", "1.16.0")]);
    let id = journal
        .begin("alice", "venvkeep pip install six", &PackageSet::new(), 100)
        .expect("must begin");
    journal.complete(id, &base, 0, 110).expect("must complete");

    // Crash mid-operation: before half only.
    journal
        .begin("alice", "venvkeep pip install flask", &base, 120)
        .expect("must begin");

    let target = journal
        .nth_latest_complete(1)
        .expect("must resolve")
        .expect("one complete record exists");
    assert_eq!(target.id, 1);
    assert_eq!(target.freeze_before, PackageSet::new());

    assert!(journal
        .nth_latest_complete(2)
        .expect("must resolve")
        .is_none());
    assert!(journal
        .nth_latest_complete(0)
        .expect("must resolve")
        .is_none());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn acknowledged_interrupted_records_become_prunable() {
    let layout = test_layout();
    let journal = Journal::new(&layout);
    let empty = PackageSet::new();

    // id 1: interrupted. ids 2-4: complete.
    journal
        .begin("alice", "venvkeep pip install six", &empty, 100)
        .expect("must begin");
    for index in 0..3 {
        let id = journal
            .begin("alice", &format!("venvkeep pip install pkg{index}"), &empty, 110 + index)
            .expect("must begin");
        journal.complete(id, &empty, 0, 120 + index).expect("must complete");
    }

    let interrupted = journal
        .unacknowledged_interrupted()
        .expect("must scan");
    assert_eq!(interrupted.len(), 1);
    assert_eq!(interrupted[0].id, 1);

    // The unacknowledged interruption blocks pruning: retention stops at it
    // instead of punching a hole around it.
    let pruned = journal.prune(2).expect("must prune");
    assert!(pruned.is_empty());
    assert_eq!(journal.record_ids().expect("must scan"), vec![1, 2, 3, 4]);

    journal.acknowledge(1).expect("must acknowledge");
    assert_eq!(
        journal.get(1).expect("must get").status,
        OperationStatus::Interrupted { acknowledged: true }
    );
    assert!(journal
        .unacknowledged_interrupted()
        .expect("must scan")
        .is_empty());

    let pruned = journal.prune(2).expect("must prune");
    assert_eq!(pruned, vec![1, 2]);
    assert_eq!(journal.record_ids().expect("must scan"), vec![3, 4]);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn acknowledging_a_complete_record_is_rejected() {
    let layout = test_layout();
    let journal = Journal::new(&layout);
    let empty = PackageSet::new();

    let id = journal
        .begin("alice", "venvkeep pip install six", &empty, 100)
        .expect("must begin");
    journal.complete(id, &empty, 0, 110).expect("must complete");

    let err = journal.acknowledge(id).expect_err("must reject");
    assert!(matches!(
        err.downcast_ref::<venvkeep_core::Error>(),
        Some(venvkeep_core::Error::AlreadyComplete { id: 1 })
    ));

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn verify_detects_id_gaps_and_change_set_drift() {
    let layout = test_layout();
    let journal = Journal::new(&layout);
    let empty = PackageSet::new();

    for index in 0..3 {
        let id = journal
            .begin("alice", &format!("venvkeep pip install pkg{index}"), &empty, 100 + index)
            .expect("must begin");
        journal.complete(id, &empty, 0, 110 + index).expect("must complete");
    }

    // Simulate a lost record: id 2 disappears entirely.
    fs::remove_file(layout.record_before_path(2)).expect("must remove");
    fs::remove_file(layout.record_after_path(2)).expect("must remove");

    let problems = journal.verify().expect("must verify");
    assert!(
        problems.iter().any(|p| p.contains("000002 is missing")),
        "unexpected problems: {problems:?}"
    );

    // Simulate drift: rewrite record 3's after half with a bogus change set.
    let after_path = layout.record_after_path(3);
    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&after_path).expect("must read"))
            .expect("must parse");
    value["change_set"]["added"]["bogus"] = serde_json::Value::String("9.9.9".to_string());
    fs::write(&after_path, serde_json::to_vec_pretty(&value).expect("must serialize"))
        .expect("must write");

    let problems = journal.verify().expect("must verify");
    assert!(
        problems
            .iter()
            .any(|p| p.contains("000003 change set does not match")),
        "unexpected problems: {problems:?}"
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn snapshot_store_round_trips_and_overwrites_atomically() {
    let layout = test_layout();
    let store = SnapshotStore::new(&layout);

    let first = sample_set(&[("numpy", "1.26.0"), ("pandas", "2.1.0")]);
    store.save("ml-stack", &first).expect("must save");
    assert!(store.exists("ml-stack"));
    assert_eq!(store.load("ml-stack").expect("must load"), first);

    let second = sample_set(&[("numpy", "1.26.4")]);
    store.save("ml-stack", &second).expect("must overwrite");
    assert_eq!(store.load("ml-stack").expect("must load"), second);

    assert!(
        stale_temp_files(&layout.snapshots_dir())
            .expect("must scan")
            .is_empty()
    );

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn snapshot_load_fails_with_unknown_snapshot() {
    let layout = test_layout();
    let store = SnapshotStore::new(&layout);

    let err = store.load("nonexistent").expect_err("must fail");
    assert!(matches!(
        err.downcast_ref::<venvkeep_core::Error>(),
        Some(venvkeep_core::Error::UnknownSnapshot { name }) if name == "nonexistent"
    ));
}

#[test]
fn snapshot_list_is_sorted_and_counts_packages() {
    let layout = test_layout();
    let store = SnapshotStore::new(&layout);

    store
        .save("web", &sample_set(&[("flask", "3.0.0"), ("jinja2", "3.1.2")]))
        .expect("must save");
    store
        .save(BASELINE_SNAPSHOT, &PackageSet::new())
        .expect("must save");

    let listed = store.list().expect("must list");
    assert_eq!(
        listed.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        vec!["baseline", "web"]
    );
    assert_eq!(listed[0].package_count, 0);
    assert_eq!(listed[1].package_count, 2);

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn snapshot_names_are_validated() {
    for valid in ["ml-stack", "baseline", "auto-backup", "v2", "a.b_c-d"] {
        validate_snapshot_name(valid).expect("must accept");
    }
    for invalid in ["test/snapshot", "test snapshot", "../test", ".test", "", "Big"] {
        assert!(
            validate_snapshot_name(invalid).is_err(),
            "must reject '{invalid}'"
        );
    }

    let layout = test_layout();
    let store = SnapshotStore::new(&layout);
    assert!(store.save("../escape", &PackageSet::new()).is_err());
}

#[test]
fn lock_is_exclusive_and_released_on_drop() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let lock = EnvLock::acquire(&layout).expect("must acquire");
    assert_eq!(
        read_lock_holder(&layout).expect("must read"),
        Some(std::process::id())
    );

    let err = EnvLock::acquire(&layout).expect_err("second writer must fail fast");
    match err.downcast_ref::<venvkeep_core::Error>() {
        Some(venvkeep_core::Error::EnvironmentBusy { holder }) => {
            assert_eq!(*holder, Some(std::process::id()));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    drop(lock);
    assert!(!layout.lock_path().exists(), "drop must release the lock");
    let _relock = EnvLock::acquire(&layout).expect("must re-acquire after release");

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn own_lock_is_not_stale() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    let _lock = EnvLock::acquire(&layout).expect("must acquire");
    assert!(!lock_is_stale(&layout).expect("must probe"));
    assert!(!remove_stale_lock(&layout).expect("must probe"));
    assert!(layout.lock_path().exists());

    let _ = fs::remove_dir_all(layout.root());
}

#[test]
fn absent_lock_is_not_stale() {
    let layout = test_layout();
    layout.ensure_base_dirs().expect("must create dirs");

    assert!(!lock_is_stale(&layout).expect("must probe"));
    assert!(!remove_stale_lock(&layout).expect("must probe"));

    let _ = fs::remove_dir_all(layout.root());
}
