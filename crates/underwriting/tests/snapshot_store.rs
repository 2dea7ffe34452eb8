use std::fs;

use underwriting::workflows::underwriting::{
    AuditSnapshot, CaseBundle, CaseId, CaseType, EngineConfig, FileSnapshotStore, RuleCatalog,
    SnapshotStore, SnapshotStoreError, UnderwritingEngine,
};

fn snapshot(case_id: &str, supersedes: Option<uuid::Uuid>) -> AuditSnapshot {
    let catalog = RuleCatalog::builtin().expect("built-in rule sets");
    let engine = UnderwritingEngine::new(EngineConfig::default(), &catalog).expect("engine");
    let assessment = engine.assess(&CaseBundle::new(case_id, CaseType::Refinance));
    AuditSnapshot::capture(assessment, supersedes).expect("snapshot captured")
}

#[test]
fn appended_snapshots_are_read_back_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSnapshotStore::new(dir.path());
    let case_id = CaseId("case-file-1".to_string());

    let first = snapshot("case-file-1", None);
    let second = snapshot("case-file-1", Some(first.snapshot_id()));
    store.append(first.clone()).expect("first append");
    store.append(second.clone()).expect("second append");

    assert_eq!(store.latest(&case_id).expect("latest"), Some(second.clone()));
    assert_eq!(store.history(&case_id).expect("history"), vec![first, second]);

    let leftovers: Vec<_> = fs::read_dir(dir.path().join("case-file-1"))
        .expect("case directory")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn unknown_case_has_empty_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSnapshotStore::new(dir.path());
    let case_id = CaseId("case-none".to_string());

    assert_eq!(store.latest(&case_id).expect("latest"), None);
    assert!(store.history(&case_id).expect("history").is_empty());
}

#[test]
fn duplicate_snapshot_id_is_a_conflict() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSnapshotStore::new(dir.path());
    let snapshot = snapshot("case-dup", None);

    store.append(snapshot.clone()).expect("first append");
    let error = store.append(snapshot.clone()).expect_err("second append");

    assert!(matches!(error, SnapshotStoreError::Conflict(id) if id == snapshot.snapshot_id()));
    assert_eq!(
        store
            .history(&CaseId("case-dup".to_string()))
            .expect("history")
            .len(),
        1
    );
}

#[test]
fn case_ids_cannot_escape_the_store_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSnapshotStore::new(dir.path().join("snapshots"));

    for case_id in ["../outside", "", "a/b"] {
        let error = store
            .latest(&CaseId(case_id.to_string()))
            .expect_err("rejected case id");
        assert!(matches!(error, SnapshotStoreError::InvalidCaseId(_)));
    }
}

#[test]
fn stored_snapshot_still_verifies() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSnapshotStore::new(dir.path());
    let case_id = CaseId("case-verify".to_string());
    store
        .append(snapshot("case-verify", None))
        .expect("append");

    let stored = store.latest(&case_id).expect("latest").expect("present");
    assert!(stored.verify());
}
