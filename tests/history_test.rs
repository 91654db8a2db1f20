mod helpers;

use std::fs;

use cairn::memory::history::{AuditOutcome, Restoration};
use cairn::{DestructiveAction, FileOperation, MemoryError, SafetyNet};
use helpers::{open_manager, project};

#[test]
fn write_then_undo_through_manager() {
    let tmp = project();
    let mut mm = open_manager(tmp.path());
    let file = tmp.path().join("f.txt");
    fs::write(&file, "X").unwrap();

    mm.snapshot_before(DestructiveAction::WriteFile, &file, SafetyNet::Required)
        .unwrap();
    fs::write(&file, "Y").unwrap();
    mm.record_file_operation("f.txt", FileOperation::Write, true, None, None);

    let outcome = mm.undo_last_action().unwrap();
    assert_eq!(outcome.restoration, Restoration::ContentRestored { bytes: 1 });
    assert_eq!(fs::read_to_string(&file).unwrap(), "X");
    assert!(matches!(
        mm.undo_last_action(),
        Err(MemoryError::NothingToUndo)
    ));

    // Both the write and its reversal reached persistent memory.
    assert_eq!(mm.get_memory_summary().file_access_records, 2);
}

#[test]
fn failed_restore_keeps_the_undo_point() {
    let tmp = project();
    let mut mm = open_manager(tmp.path());
    let dir = tmp.path().join("pkg");
    fs::create_dir(&dir).unwrap();
    let file = dir.join("mod.rs");
    fs::write(&file, "old").unwrap();

    mm.snapshot_before(DestructiveAction::DeleteFile, &file, SafetyNet::Required)
        .unwrap();
    // Something else replaces the directory with a file; the restore cannot land.
    fs::remove_dir_all(&dir).unwrap();
    fs::write(&dir, "").unwrap();

    let err = mm.undo_last_action().unwrap_err();
    assert!(matches!(err, MemoryError::RestoreFailed { .. }));
    assert!(mm.history().can_undo());

    fs::remove_file(&dir).unwrap();
    mm.undo_last_action().unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), "old");
    assert!(!mm.history().can_undo());
}

#[test]
fn history_does_not_outlive_the_session() {
    let tmp = project();
    let file = tmp.path().join("a.txt");
    fs::write(&file, "a0").unwrap();
    {
        let mut mm = open_manager(tmp.path());
        mm.snapshot_before(DestructiveAction::WriteFile, &file, SafetyNet::Required)
            .unwrap();
        fs::write(&file, "a1").unwrap();
    }

    let mut mm = open_manager(tmp.path());
    assert!(matches!(
        mm.undo_last_action(),
        Err(MemoryError::NothingToUndo)
    ));
    assert_eq!(fs::read_to_string(&file).unwrap(), "a1");
}

#[test]
fn audit_depth_follows_config() {
    let tmp = project();
    let mut config = cairn::CairnConfig::default();
    config.history.audit_depth = 2;
    let mut mm = helpers::open_with(tmp.path(), config);

    for i in 0..5 {
        let file = tmp.path().join(format!("f{i}.txt"));
        mm.snapshot_before(DestructiveAction::WriteFile, &file, SafetyNet::Required)
            .unwrap();
    }

    let trail: Vec<AuditOutcome> = mm.history().audit_trail().map(|e| e.outcome).collect();
    assert_eq!(trail, vec![AuditOutcome::Superseded, AuditOutcome::Superseded]);
    assert!(mm.history().peek().unwrap().filepath.ends_with("f4.txt"));
}
