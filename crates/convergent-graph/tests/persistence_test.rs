//! File-backed persistence: restart survival and snapshot/branch refs.

use chrono::Utc;
use convergent_core::protocol::*;
use convergent_graph::sqlite::SnapshotRecord;
use convergent_graph::{IntentBackend, SqliteBackend};

fn make_intent(id: &str) -> Intent {
    Intent::new(id, "agent-a", "persisted decision")
        .with_provides(vec![InterfaceSpec::new("OrderQueue", InterfaceKind::Class)
            .with_tags(vec!["orders"])])
        .with_evidence(vec![Evidence::new(EvidenceKind::Committed, "agent-a")])
}

#[test]
fn intents_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("intents.db");

    {
        let backend = SqliteBackend::open(&db_path).unwrap();
        backend.publish(&make_intent("persist-1")).unwrap();
        backend.publish(&make_intent("persist-2")).unwrap();
    }

    let backend = SqliteBackend::open(&db_path).unwrap();
    assert_eq!(backend.count().unwrap(), 2);
    let fetched = backend.get("persist-1").unwrap().unwrap();
    assert_eq!(fetched.evidence.len(), 1);
    assert_eq!(fetched.provides[0].name, "OrderQueue");
}

#[test]
fn idempotency_holds_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("intents.db");

    let seq = {
        let backend = SqliteBackend::open(&db_path).unwrap();
        backend.publish(&make_intent("persist-1")).unwrap()
    };

    let backend = SqliteBackend::open(&db_path).unwrap();
    assert_eq!(backend.publish(&make_intent("persist-1")).unwrap(), seq);
    assert_eq!(backend.count().unwrap(), 1);
}

#[test]
fn snapshots_and_branches_persist() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("intents.db");

    {
        let backend = SqliteBackend::open(&db_path).unwrap();
        let record = SnapshotRecord {
            snapshot_id: "snap-1".to_string(),
            parent_ids: vec![],
            intent_ids: vec!["persist-1".to_string()],
            branch: "main".to_string(),
            created_at: Utc::now(),
        };
        backend.save_snapshot(&record).unwrap();
        backend.set_branch("main", "snap-1").unwrap();
        // Snapshots are immutable: re-saving the same id changes nothing.
        backend.save_snapshot(&record).unwrap();
    }

    let backend = SqliteBackend::open(&db_path).unwrap();
    let snapshots = backend.snapshots().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].snapshot_id, "snap-1");
    assert_eq!(
        backend.branches().unwrap(),
        vec![("main".to_string(), "snap-1".to_string())]
    );
}

#[test]
fn corrupt_rows_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("intents.db");

    {
        let backend = SqliteBackend::open(&db_path).unwrap();
        backend.publish(&make_intent("good")).unwrap();
    }

    // Corrupt one body out-of-band.
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "INSERT INTO intents (intent_id, agent_id, created_at, content_hash, body)
             VALUES ('bad', 'agent-x', '2025-01-01T00:00:00Z', 'h', 'not json')",
            [],
        )
        .unwrap();
    }

    let backend = SqliteBackend::open(&db_path).unwrap();
    let all = backend.all().unwrap();
    assert_eq!(all.len(), 1, "corrupt record skipped, engine available");
    assert_eq!(all[0].intent_id, "good");
}
