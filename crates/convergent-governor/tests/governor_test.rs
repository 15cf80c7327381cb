//! Three-layer governor tests, including the hard-constraint rejection
//! and independent-convergence scenarios.

use std::sync::Arc;

use chrono::{Duration, Utc};
use convergent_core::protocol::*;
use convergent_core::CoordinationConfig;
use convergent_governor::gates::StaticGate;
use convergent_governor::{
    ConstraintEngine, ConstraintKind, GateScope, GovernorLayer, GovernorOutcome, MergeGovernor,
    TypedConstraint,
};
use convergent_graph::{IntentGraph, MemoryBackend};
use convergent_scoring::StabilityScorer;

fn graph(config: &CoordinationConfig) -> IntentGraph {
    IntentGraph::new(Box::new(MemoryBackend::new()), config)
}

fn user_intent(id: &str, agent: &str, tags: Vec<&str>) -> Intent {
    Intent::new(id, agent, &format!("{agent} owns the user surface"))
        .with_provides(vec![
            InterfaceSpec::new("User", InterfaceKind::Class).with_tags(tags)
        ])
}

#[test]
fn clean_intent_merges() {
    let config = CoordinationConfig::default();
    let graph = graph(&config);
    let mut governor = MergeGovernor::new(&config);

    let report = governor
        .evaluate(
            &user_intent("solo", "agent-a", vec!["auth"]),
            &graph,
            &GateScope::named("repo"),
        )
        .unwrap();
    assert_eq!(report.outcome, GovernorOutcome::Merge);
    assert_eq!(report.layer, GovernorLayer::Intents);
    assert!(report.approved());
}

#[test]
fn failed_test_gate_rejects_before_other_layers() {
    let config = CoordinationConfig::default();
    let graph = graph(&config);

    let mut engine = ConstraintEngine::new(StabilityScorer::new(&config));
    engine.register_gate(Arc::new(StaticGate::failing(
        "tests_pass",
        "2 tests failed in auth_test.rs",
    )));
    engine.register(
        TypedConstraint::new(ConstraintKind::TestsPass, "auth scope", "tests must pass")
            .with_gate("tests_pass")
            .with_scope(vec!["auth"]),
    );
    let mut governor = MergeGovernor::with_parts(
        engine,
        convergent_governor::EscalationPolicy::new(Default::default(), 0.0),
        convergent_governor::Budget::default(),
    );

    // Seed a conflicting intent that layer 2 would flag — it must never
    // be consulted.
    graph.publish(&user_intent("existing", "agent-b", vec!["auth"])).unwrap();

    let report = governor
        .evaluate(
            &user_intent("proposed", "agent-a", vec!["auth"]),
            &graph,
            &GateScope::named("auth"),
        )
        .unwrap();

    assert_eq!(report.outcome, GovernorOutcome::Reject);
    assert_eq!(report.layer, GovernorLayer::Constraints);
    assert!(report.conflicts.is_empty(), "layer 2 was not consulted");
    let constraint_report = report.constraint_report.unwrap();
    assert!(!constraint_report.passed);
    assert!(constraint_report.blocking[0].contains("tests failed"));
}

#[test]
fn unregistered_gate_counts_as_failure() {
    let config = CoordinationConfig::default();
    let graph = graph(&config);

    let mut governor = MergeGovernor::new(&config);
    governor.engine_mut().register(
        TypedConstraint::new(ConstraintKind::TestsPass, "auth scope", "tests must pass")
            .with_gate("missing_gate")
            .with_scope(vec!["auth"]),
    );

    let report = governor
        .evaluate(
            &user_intent("proposed", "agent-a", vec!["auth"]),
            &graph,
            &GateScope::named("auth"),
        )
        .unwrap();
    assert_eq!(report.outcome, GovernorOutcome::Reject);
}

#[test]
fn independent_convergence_auto_resolves_toward_the_stable_side() {
    // Agent A published "AuthService" with a committed User interface at
    // t=0; agent B proposes "UserStore" with a speculative one at t=1.
    let config = CoordinationConfig::default();
    let graph = graph(&config);
    let mut governor = MergeGovernor::new(&config);

    let t0 = Utc::now() - Duration::days(1);
    let t1 = Utc::now();

    let a = Intent::new("auth-service", "agent-a", "AuthService owns User")
        .with_provides(vec![InterfaceSpec::new("User", InterfaceKind::Class)
            .with_tags(vec!["auth"])])
        .with_evidence(vec![Evidence::new(EvidenceKind::Committed, "agent-a").at(t0)])
        .created_at(t0);
    graph.publish(&a).unwrap();

    let b = Intent::new("user-store", "agent-b", "UserStore persists User")
        .with_provides(vec![InterfaceSpec::new("User", InterfaceKind::Class)
            .with_tags(vec!["auth", "model"])])
        .with_evidence(vec![Evidence::new(EvidenceKind::Speculative, "agent-b").at(t1)])
        .created_at(t1);

    // The overlap itself is visible with a structural score over threshold.
    let overlaps = graph.find_overlapping(&b).unwrap();
    assert_eq!(overlaps.len(), 1);
    assert!(overlaps[0].reasons[0].structural_score >= 0.6);

    let report = governor
        .evaluate_at(&b, &graph, &GateScope::named("repo"), t1)
        .unwrap();
    assert_eq!(report.outcome, GovernorOutcome::AutoResolve);
    assert_eq!(report.winner.as_deref(), Some("auth-service"), "A wins");
}

#[test]
fn equal_stability_goes_to_economics_and_auto_resolves_by_default() {
    let config = CoordinationConfig::default();
    let graph = graph(&config);
    let mut governor = MergeGovernor::new(&config);
    let now = Utc::now();

    let a = user_intent("a", "agent-a", vec!["auth"])
        .with_evidence(vec![Evidence::new(EvidenceKind::Committed, "agent-a").at(now)]);
    graph.publish(&a).unwrap();

    let b = user_intent("b", "agent-b", vec!["auth"])
        .with_evidence(vec![Evidence::new(EvidenceKind::Committed, "agent-b").at(now)]);
    let report = governor
        .evaluate_at(&b, &graph, &GateScope::named("repo"), now)
        .unwrap();

    assert_eq!(report.layer, GovernorLayer::Economics);
    assert_eq!(report.outcome, GovernorOutcome::AutoResolve);
    assert!(!report.escalations.is_empty());
}

#[test]
fn exhausted_budget_blocks() {
    let config = CoordinationConfig::default();
    let graph = graph(&config);
    let mut governor = MergeGovernor::with_parts(
        ConstraintEngine::new(StabilityScorer::new(&config)),
        convergent_governor::EscalationPolicy::new(Default::default(), 0.0),
        convergent_governor::Budget::with_max_cost(0.0),
    );
    let now = Utc::now();

    graph
        .publish(&user_intent("a", "agent-a", vec!["auth"]).with_evidence(vec![
            Evidence::new(EvidenceKind::Committed, "agent-a").at(now),
        ]))
        .unwrap();
    let b = user_intent("b", "agent-b", vec!["auth"])
        .with_evidence(vec![Evidence::new(EvidenceKind::Committed, "agent-b").at(now)]);

    let report = governor
        .evaluate_at(&b, &graph, &GateScope::named("repo"), now)
        .unwrap();
    assert_eq!(report.outcome, GovernorOutcome::Block);
}

#[test]
fn branch_merge_evaluation_walks_every_new_intent() {
    let config = CoordinationConfig::default();
    let mut governor = MergeGovernor::new(&config);
    let now = Utc::now();

    let mut base = convergent_versioning::VersionedGraph::new("main", &config);
    base.publish(&user_intent("a", "agent-a", vec!["auth"]).with_evidence(vec![
        Evidence::new(EvidenceKind::Committed, "agent-a").at(now),
    ]))
    .unwrap();
    base.seal_at(now).unwrap();

    let branch = base.branch("agent/b").unwrap();
    branch
        .publish(&user_intent("b", "agent-b", vec!["auth"]).with_evidence(vec![
            Evidence::new(EvidenceKind::Speculative, "agent-b").at(now),
        ]))
        .unwrap();
    branch
        .publish(
            &Intent::new("c", "agent-b", "unrelated metrics sink").with_provides(vec![
                InterfaceSpec::new("MetricsSink", InterfaceKind::Class).with_tags(vec!["metrics"]),
            ]),
        )
        .unwrap();

    let report = governor
        .evaluate_merge_at(&base, &branch, &GateScope::named("repo"), now)
        .unwrap();
    // The weak duplicate provision resolves softly; the unrelated intent
    // merges; overall the merge is approved with a yield.
    assert_eq!(report.outcome, GovernorOutcome::AutoResolve);
    assert!(report.approved());
    assert_eq!(report.rationale.len(), 2);
}

#[test]
fn hard_conflict_in_the_graph_rejects_at_layer_two() {
    let config = CoordinationConfig::default();
    let graph = graph(&config);
    let mut governor = MergeGovernor::new(&config);
    let now = Utc::now();

    let guarded = user_intent("a", "agent-a", vec!["auth"]).with_constraints(vec![
        Constraint::new("User model", "id must be uuid")
            .with_severity(ConstraintSeverity::Hard)
            .with_scope(vec!["auth"]),
    ]);
    graph.publish(&guarded).unwrap();

    let violating = user_intent("b", "agent-b", vec!["auth"]).with_constraints(vec![
        Constraint::new("User model", "id must be int").with_scope(vec!["auth"]),
    ]);
    let report = governor
        .evaluate_at(&violating, &graph, &GateScope::named("repo"), now)
        .unwrap();
    assert_eq!(report.outcome, GovernorOutcome::Reject);
    assert_eq!(report.layer, GovernorLayer::Intents);
}
