//! Branch, merge, and replay determinism tests.

use chrono::{Duration, Utc};
use convergent_core::protocol::*;
use convergent_core::{ConflictClass, ConvergentError, CoordinationConfig};
use convergent_versioning::{merge_all, GraphSnapshot, ReplayLog, VersionedGraph};

fn provider(id: &str, agent: &str, name: &str, tags: Vec<&str>) -> Intent {
    Intent::new(id, agent, &format!("provide {name}"))
        .with_provides(vec![
            InterfaceSpec::new(name, InterfaceKind::Class).with_tags(tags)
        ])
        .with_evidence(vec![Evidence::new(EvidenceKind::Committed, agent)])
}

#[test]
fn sealing_unchanged_state_returns_the_same_snapshot() {
    let config = CoordinationConfig::default();
    let mut graph = VersionedGraph::new("main", &config);
    graph
        .publish(&provider("a", "agent-a", "AuthService", vec!["auth"]))
        .unwrap();

    let first = graph.seal().unwrap();
    let second = graph.seal().unwrap();
    assert_eq!(first.snapshot_id, second.snapshot_id);
    assert_eq!(graph.snapshots().len(), 1);
}

#[test]
fn branch_is_isolated_until_merge() {
    let config = CoordinationConfig::default();
    let mut main = VersionedGraph::new("main", &config);
    main.publish(&provider("a", "agent-a", "AuthService", vec!["auth"]))
        .unwrap();
    main.seal().unwrap();

    let branch = main.branch("agent/b").unwrap();
    branch
        .publish(&provider("b", "agent-b", "OrderQueue", vec!["orders"]))
        .unwrap();

    assert_eq!(main.graph().count().unwrap(), 1);
    assert_eq!(branch.graph().count().unwrap(), 2);

    let result = main.merge(&branch).unwrap();
    assert!(result.success());
    assert_eq!(result.merged, vec!["b".to_string()]);
    assert_eq!(main.graph().count().unwrap(), 2);

    // The merge snapshot has both parents.
    let snapshot = result.snapshot.unwrap();
    assert!(snapshot.parent_ids.len() >= 1);
}

#[test]
fn conflicting_incoming_intent_is_returned_for_resolution() {
    let config = CoordinationConfig::default();
    let now = Utc::now();
    let mut main = VersionedGraph::new("main", &config);
    let established = Intent::new("a", "agent-a", "uuid user ids")
        .with_provides(vec![InterfaceSpec::new("User", InterfaceKind::Class)
            .with_signature("id: UUID")
            .with_tags(vec!["auth"])])
        .with_evidence(vec![Evidence::new(EvidenceKind::Committed, "agent-a").at(now)]);
    main.publish(&established).unwrap();
    main.seal_at(now).unwrap();

    let branch = main.branch("agent/b").unwrap();
    let clashing = Intent::new("b", "agent-b", "integer user ids")
        .with_provides(vec![InterfaceSpec::new("User", InterfaceKind::Class)
            .with_signature("id: int")
            .with_tags(vec!["auth"])])
        .with_evidence(vec![Evidence::new(EvidenceKind::Committed, "agent-b").at(now)]);
    branch.publish(&clashing).unwrap();

    let result = main.merge_at(&branch, now).unwrap();
    assert!(!result.success());
    assert_eq!(result.unresolved.len(), 1);
    assert_eq!(result.unresolved[0].class, ConflictClass::Structural);
    // Nothing landed in the base.
    assert_eq!(main.graph().count().unwrap(), 1);
}

#[test]
fn hard_constraint_aborts_the_merge() {
    let config = CoordinationConfig::default();
    let now = Utc::now();
    let mut main = VersionedGraph::new("main", &config);
    let guarded = provider("a", "agent-a", "User", vec!["auth"]).with_constraints(vec![
        Constraint::new("User model", "id must be uuid")
            .with_severity(ConstraintSeverity::Hard)
            .with_scope(vec!["auth"]),
    ]);
    main.publish(&guarded).unwrap();
    main.seal_at(now).unwrap();

    let branch = main.branch("agent/b").unwrap();
    let violating = provider("b", "agent-b", "User", vec!["auth"]).with_constraints(vec![
        Constraint::new("User model", "id must be int").with_scope(vec!["auth"]),
    ]);
    branch.publish(&violating).unwrap();

    let result = main.merge_at(&branch, now).unwrap();
    assert!(!result.success());
    assert!(result.aborted_by.is_some());
    assert_eq!(
        result.aborted_by.unwrap().class,
        ConflictClass::HardConstraint
    );
    assert_eq!(main.graph().count().unwrap(), 1);
}

#[test]
fn soft_conflicts_merge_through() {
    let config = CoordinationConfig::default();
    let now = Utc::now();
    let mut main = VersionedGraph::new("main", &config);
    main.publish(
        &provider("a", "agent-a", "User", vec!["auth"]).with_evidence(vec![
            Evidence::new(EvidenceKind::Consumed, "agent-c").at(now),
        ]),
    )
    .unwrap();
    main.seal_at(now).unwrap();

    let branch = main.branch("agent/b").unwrap();
    branch
        .publish(
            &provider("b", "agent-b", "User", vec!["auth"]).with_evidence(vec![
                Evidence::new(EvidenceKind::Speculative, "agent-b").at(now),
            ]),
        )
        .unwrap();

    let result = main.merge_at(&branch, now).unwrap();
    assert!(result.success(), "SOFT conflicts do not block a merge");
    assert_eq!(main.graph().count().unwrap(), 2);
}

#[test]
fn three_agent_merge_replays_exactly() {
    let config = CoordinationConfig::default();
    let now = Utc::now();

    let sequence = vec![
        provider("a", "agent-a", "AuthService", vec!["auth"]),
        provider("b", "agent-b", "OrderQueue", vec!["orders"]),
        provider("c", "agent-c", "MetricsSink", vec!["metrics"]),
    ];

    let (snapshot, log) = merge_all(&sequence, &config, now).unwrap();
    let replayed = log.replay().unwrap();
    assert_eq!(snapshot.snapshot_id, replayed.snapshot_id);
    assert_eq!(snapshot.intent_ids, replayed.intent_ids);
}

#[test]
fn replay_divergence_reports_the_first_differing_snapshot() {
    let config = CoordinationConfig::default();
    let now = Utc::now();
    let mut log = ReplayLog::new(&config);

    // Record a merge whose snapshot id was (supposedly) something else.
    let intent = provider("a", "agent-a", "AuthService", vec!["auth"]);
    let fake = GraphSnapshot {
        snapshot_id: "not-the-real-id".to_string(),
        parent_ids: vec![],
        intent_ids: vec!["a".to_string()],
        branch: "main".to_string(),
        created_at: now,
    };
    log.record_merge(std::slice::from_ref(&intent), now, &fake);

    let err = log.replay().unwrap_err();
    match err {
        ConvergentError::ReplayDivergence {
            index,
            recorded,
            recomputed,
        } => {
            assert_eq!(index, 0);
            assert_eq!(recorded, "not-the-real-id");
            assert_ne!(recomputed, recorded);
        }
        other => panic!("expected ReplayDivergence, got {other:?}"),
    }
}

#[test]
fn snapshot_ids_are_stable_across_time() {
    // Same intent sequence sealed at different wall-clock times yields the
    // same snapshot id: the id covers only the ordered intent sequence.
    let config = CoordinationConfig::default();
    let sequence = vec![provider("a", "agent-a", "AuthService", vec!["auth"])];

    let (first, _) = merge_all(&sequence, &config, Utc::now()).unwrap();
    let (second, _) = merge_all(&sequence, &config, Utc::now() + Duration::hours(1)).unwrap();
    assert_eq!(first.snapshot_id, second.snapshot_id);
}
