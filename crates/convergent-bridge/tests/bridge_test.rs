//! End-to-end bridge tests: enrichment, the consensus round trip,
//! outcome recording, graceful degradation, health, and the event log.

use convergent_bridge::{CoordinationBridge, EventType};
use convergent_core::protocol::*;
use convergent_core::{ConvergentError, CoordinationConfig};
use convergent_scoring::TaskOutcome;

fn bridge() -> CoordinationBridge {
    CoordinationBridge::new(&CoordinationConfig::default()).unwrap()
}

fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn enrichment_collects_markers_flocking_and_scores() {
    let bridge = bridge();

    // Another agent left knowledge and an active modification marker.
    bridge
        .leave_marker(
            "agent-b",
            MarkerType::PatternFound,
            "src/auth.rs",
            "use the repository pattern for storage access",
        )
        .unwrap();
    bridge
        .leave_marker(
            "agent-b",
            MarkerType::FileModified,
            "src/auth.rs",
            "rewriting login flow",
        )
        .unwrap();
    bridge
        .record_task_outcome("agent-a", "code_review", TaskOutcome::Approved, &[])
        .unwrap();

    let context = bridge
        .enrich_prompt(
            "agent-a",
            "fix the login handler",
            &paths(&["src/auth.rs"]),
            "",
        )
        .unwrap();

    assert!(context.contains("Stigmergy context"));
    assert!(context.contains("repository pattern"));
    assert!(context.contains("Flocking constraints"));
    assert!(context.contains("src/auth.rs"), "separation warning present");
    assert!(context.contains("Your trust scores"));
    assert!(context.contains("code_review"));
}

#[test]
fn enrichment_is_empty_when_nothing_is_relevant() {
    let bridge = bridge();
    let context = bridge
        .enrich_prompt("agent-a", "task", &paths(&["src/new.rs"]), "")
        .unwrap();
    assert_eq!(context, "");
}

#[test]
fn consensus_round_trip_through_the_facade() {
    let bridge = bridge();

    let request_id = bridge
        .request_consensus(
            "task-7",
            "merge the schema change?",
            "migration adds author_id",
            Some(QuorumLevel::Majority),
            vec!["migrations/0042.sql".to_string()],
        )
        .unwrap();

    bridge
        .submit_agent_vote(
            &request_id,
            "agent-a",
            "reviewer",
            "claude:sonnet",
            VoteChoice::Approve,
            0.9,
            "schema is backward compatible",
        )
        .unwrap();
    bridge
        .submit_agent_vote(
            &request_id,
            "agent-b",
            "reviewer",
            "claude:sonnet",
            VoteChoice::Approve,
            0.8,
            "matches the data model intent",
        )
        .unwrap();

    let decision = bridge.evaluate(&request_id).unwrap().unwrap();
    assert_eq!(decision.outcome, DecisionOutcome::Approved);
    assert_eq!(decision.votes.len(), 2);

    let history = bridge.vote_history("task-7").unwrap();
    assert_eq!(history.len(), 1);

    let stats = bridge.agent_vote_stats("agent-a").unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.approve, 1);
}

#[test]
fn disabled_voting_degrades_gracefully() {
    let bridge = bridge().without_voting();

    let err = bridge
        .request_consensus("task-1", "q", "c", None, vec![])
        .unwrap_err();
    assert!(matches!(err, ConvergentError::Validation { .. }));

    // Enrichment still works.
    bridge
        .leave_marker("agent-b", MarkerType::KnownIssue, "src/db.rs", "slow index")
        .unwrap();
    let context = bridge
        .enrich_prompt("agent-a", "tune the db", &paths(&["src/db.rs"]), "")
        .unwrap();
    assert!(context.contains("slow index"));
}

#[test]
fn record_task_outcome_updates_phi_markers_and_signals() {
    let bridge = bridge();

    let phi = bridge
        .record_task_outcome(
            "agent-a",
            "testing",
            TaskOutcome::Approved,
            &paths(&["src/auth.rs", "src/db.rs"]),
        )
        .unwrap();
    assert!(phi > 0.5);

    // Markers landed on both files.
    let field = bridge.stigmergy().unwrap();
    assert_eq!(field.markers_for("src/auth.rs").unwrap().len(), 1);
    assert_eq!(field.markers_for("src/db.rs").unwrap().len(), 1);

    // The signal is on the bus.
    let signals = bridge
        .signal_bus()
        .unwrap()
        .signals(Some("task_outcome"), Some("agent-a"), None)
        .unwrap();
    assert_eq!(signals.len(), 1);

    // And the audit trail captured the whole flow.
    assert_eq!(bridge.events().count(Some(EventType::ScoreUpdated)).unwrap(), 1);
    assert_eq!(bridge.events().count(Some(EventType::MarkerLeft)).unwrap(), 2);
    assert_eq!(bridge.events().count(Some(EventType::SignalSent)).unwrap(), 1);
}

#[test]
fn publish_and_resolve_record_correlated_events() {
    let bridge = bridge();

    let a = Intent::new("auth-1", "agent-a", "own auth").with_provides(vec![
        InterfaceSpec::new("User", InterfaceKind::Class).with_tags(vec!["auth"]),
    ]);
    bridge.publish_intent(&a).unwrap();

    let b = Intent::new("auth-2", "agent-b", "also auth").with_provides(vec![
        InterfaceSpec::new("User", InterfaceKind::Class).with_tags(vec!["auth"]),
    ]);
    let outcome = bridge.resolve_intent(&b).unwrap();
    assert_eq!(outcome.conflicts.len(), 1);

    let published = bridge
        .events()
        .query(Some(EventType::IntentPublished), None, None, 0, 10)
        .unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].correlation_id.as_deref(), Some("auth-1"));

    let conflicts = bridge
        .events()
        .query(Some(EventType::ConflictDetected), None, Some("auth-2"), 0, 10)
        .unwrap();
    assert_eq!(conflicts.len(), 1);
}

#[test]
fn event_cursor_is_restartable() {
    // Signals off so each outcome records exactly one event.
    let bridge = bridge().without_signals();
    for i in 0..5 {
        bridge
            .record_task_outcome(&format!("agent-{i}"), "testing", TaskOutcome::Approved, &[])
            .unwrap();
    }

    let mut cursor = bridge.events().cursor(0);
    let first_two: Vec<_> = cursor.by_ref().take(2).collect();
    assert_eq!(first_two.len(), 2);
    let position = cursor.position();

    // A fresh cursor resumes exactly where the previous one stopped.
    let rest: Vec<_> = bridge.events().cursor(position).collect();
    assert_eq!(first_two.len() + rest.len(), 5);
    assert!(rest.iter().all(|e| e.seq > position - 1));
}

#[test]
fn health_reports_a_grade_and_degrades_with_issues() {
    let bridge = bridge();

    // Healthy: one stable intent, a trained agent.
    let intent = Intent::new("a", "agent-a", "own auth")
        .with_provides(vec![InterfaceSpec::new("Auth", InterfaceKind::Class)
            .with_tags(vec!["auth"])])
        .with_evidence(vec![Evidence::new(EvidenceKind::Consumed, "agent-b")]);
    bridge.publish_intent(&intent).unwrap();
    bridge
        .record_task_outcome("agent-a", "testing", TaskOutcome::Approved, &[])
        .unwrap();

    let health = bridge.health().unwrap();
    assert_eq!(health.grade, 'A');
    assert_eq!(health.intent_graph.total_intents, 1);
    assert_eq!(health.scoring.scored_agents, 1);

    // Pile up speculative intents from many agents: stability sinks.
    for i in 0..5 {
        let weak = Intent::new(&format!("weak-{i}"), &format!("agent-w{i}"), "sketch")
            .with_provides(vec![InterfaceSpec::new(
                &format!("Widget{i}"),
                InterfaceKind::Class,
            )]);
        bridge.publish_intent(&weak).unwrap();
    }
    let health = bridge.health().unwrap();
    assert!(health.grade > 'A', "issues must lower the grade");
    assert!(!health.issues.is_empty());
}

#[test]
fn file_backed_bridge_persists_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoordinationConfig {
        db_path: dir.path().join("convergent.db").display().to_string(),
        ..Default::default()
    };

    {
        let bridge = CoordinationBridge::new(&config).unwrap();
        let intent = Intent::new("persist", "agent-a", "durable decision").with_provides(vec![
            InterfaceSpec::new("Auth", InterfaceKind::Class).with_tags(vec!["auth"]),
        ]);
        bridge.publish_intent(&intent).unwrap();
        bridge
            .record_task_outcome("agent-a", "testing", TaskOutcome::Approved, &[])
            .unwrap();
    }

    let bridge = CoordinationBridge::new(&config).unwrap();
    assert!(bridge.graph().get("persist").unwrap().is_some());
    assert!(bridge.agent_score("agent-a", "testing").unwrap() > 0.5);
    assert!(bridge.events().count(None).unwrap() >= 2);
}
