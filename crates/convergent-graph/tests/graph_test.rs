//! Intent graph contract tests, run against both backends.

use std::sync::Arc;

use chrono::Utc;
use convergent_core::matching::{SemanticMatcher, SemanticVerdict};
use convergent_core::protocol::*;
use convergent_core::{ConflictClass, ConvergentError, CoordinationConfig};
use convergent_graph::{IntentBackend, IntentGraph, MemoryBackend, SqliteBackend};

fn backends() -> Vec<Box<dyn IntentBackend>> {
    vec![
        Box::new(MemoryBackend::new()),
        Box::new(SqliteBackend::open_in_memory().unwrap()),
    ]
}

fn auth_intent(id: &str, agent: &str) -> Intent {
    Intent::new(id, agent, "Own the auth service")
        .with_category(IntentCategory::Interface)
        .with_provides(vec![InterfaceSpec::new("User", InterfaceKind::Class)
            .with_tags(vec!["auth"])])
}

#[test]
fn published_content_round_trips() {
    for backend in backends() {
        let intent = auth_intent("intent-1", "agent-a")
            .with_evidence(vec![Evidence::new(EvidenceKind::Committed, "agent-a")]);
        backend.publish(&intent).unwrap();

        let fetched = backend.get("intent-1").unwrap().unwrap();
        assert_eq!(
            serde_json::to_string(&intent).unwrap(),
            serde_json::to_string(&fetched).unwrap(),
            "canonical encodings must be byte-exact"
        );
    }
}

#[test]
fn republish_identical_content_is_a_no_op() {
    for backend in backends() {
        let intent = auth_intent("intent-1", "agent-a");
        let seq = backend.publish(&intent).unwrap();
        let again = backend.publish(&intent).unwrap();
        assert_eq!(seq, again);
        assert_eq!(backend.count().unwrap(), 1);
    }
}

#[test]
fn republish_differing_content_is_rejected() {
    for backend in backends() {
        backend.publish(&auth_intent("intent-1", "agent-a")).unwrap();
        let mut changed = auth_intent("intent-1", "agent-a");
        changed.description = "Own something else".to_string();
        let err = backend.publish(&changed).unwrap_err();
        assert!(matches!(err, ConvergentError::DuplicateIntent { .. }));
        assert_eq!(backend.count().unwrap(), 1);
    }
}

#[test]
fn sequence_numbers_follow_arrival_order() {
    for backend in backends() {
        let first = backend.publish(&auth_intent("intent-1", "agent-a")).unwrap();
        let second = backend.publish(&auth_intent("intent-2", "agent-b")).unwrap();
        assert!(second > first);
        assert_eq!(backend.sequence_of("intent-1").unwrap(), Some(first));
    }
}

#[test]
fn missing_parent_is_rejected() {
    for backend in backends() {
        let orphan = auth_intent("intent-1", "agent-a").with_parent("nowhere");
        assert!(matches!(
            backend.publish(&orphan).unwrap_err(),
            ConvergentError::Validation { .. }
        ));
    }
}

#[test]
fn evidence_appends_in_place() {
    for backend in backends() {
        backend.publish(&auth_intent("intent-1", "agent-a")).unwrap();
        backend
            .add_evidence("intent-1", &Evidence::new(EvidenceKind::Tested, "gate"))
            .unwrap();
        let fetched = backend.get("intent-1").unwrap().unwrap();
        assert_eq!(fetched.evidence.len(), 1);
        assert_eq!(fetched.evidence[0].kind, EvidenceKind::Tested);
    }
}

#[test]
fn overlap_reports_prefer_earlier_intents() {
    for backend in backends() {
        let graph = IntentGraph::new(backend, &CoordinationConfig::default());
        graph.publish(&auth_intent("first", "agent-a")).unwrap();
        graph.publish(&auth_intent("second", "agent-b")).unwrap();

        let probe = auth_intent("probe", "agent-c");
        let overlaps = graph.find_overlapping(&probe).unwrap();
        assert_eq!(overlaps.len(), 2);
        assert_eq!(overlaps[0].intent.intent_id, "first");
        assert!(overlaps[0].reasons[0].structural_score >= 0.6);
    }
}

#[test]
fn self_overlap_is_excluded() {
    for backend in backends() {
        let graph = IntentGraph::new(backend, &CoordinationConfig::default());
        graph.publish(&auth_intent("first", "agent-a")).unwrap();

        let own = auth_intent("second", "agent-a");
        assert!(graph.find_overlapping(&own).unwrap().is_empty());
        assert!(graph.find_conflicting(&own).unwrap().is_empty());
    }
}

#[test]
fn kind_mismatch_never_overlaps() {
    for backend in backends() {
        let graph = IntentGraph::new(backend, &CoordinationConfig::default());
        graph.publish(&auth_intent("first", "agent-a")).unwrap();

        let probe = Intent::new("probe", "agent-b", "function with the same name")
            .with_provides(vec![InterfaceSpec::new("User", InterfaceKind::Function)
                .with_tags(vec!["auth"])]);
        assert!(graph.find_overlapping(&probe).unwrap().is_empty());
    }
}

#[test]
fn stability_gap_classifies_soft_with_the_stronger_winner() {
    for backend in backends() {
        let graph = IntentGraph::new(backend, &CoordinationConfig::default());
        let now = Utc::now();

        let strong = auth_intent("strong", "agent-a").with_evidence(vec![
            Evidence::new(EvidenceKind::Committed, "agent-a").at(now),
        ]);
        graph.publish(&strong).unwrap();

        let weak = auth_intent("weak", "agent-b").with_evidence(vec![
            Evidence::new(EvidenceKind::Speculative, "agent-b").at(now),
        ]);
        let conflicts = graph.find_conflicting_at(&weak, now).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].class, ConflictClass::Soft);
        assert_eq!(conflicts[0].winner.as_deref(), Some("strong"));
    }
}

#[test]
fn equal_stability_classifies_ambiguous() {
    for backend in backends() {
        let graph = IntentGraph::new(backend, &CoordinationConfig::default());
        let now = Utc::now();

        let a = auth_intent("a", "agent-a")
            .with_evidence(vec![Evidence::new(EvidenceKind::Committed, "agent-a").at(now)]);
        graph.publish(&a).unwrap();

        let b = auth_intent("b", "agent-b")
            .with_evidence(vec![Evidence::new(EvidenceKind::Committed, "agent-b").at(now)]);
        let conflicts = graph.find_conflicting_at(&b, now).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].class, ConflictClass::Ambiguous);
    }
}

#[test]
fn disagreeing_signatures_classify_structural() {
    for backend in backends() {
        let graph = IntentGraph::new(backend, &CoordinationConfig::default());
        let now = Utc::now();

        let a = Intent::new("a", "agent-a", "user record with uuid id")
            .with_provides(vec![InterfaceSpec::new("User", InterfaceKind::Class)
                .with_signature("id: UUID, email: str")
                .with_tags(vec!["auth"])]);
        graph.publish(&a).unwrap();

        let b = Intent::new("b", "agent-b", "user record with integer id")
            .with_provides(vec![InterfaceSpec::new("User", InterfaceKind::Class)
                .with_signature("id: int, email: str")
                .with_tags(vec!["auth"])]);
        let conflicts = graph.find_conflicting_at(&b, now).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].class, ConflictClass::Structural);
    }
}

#[test]
fn hard_constraint_disagreement_classifies_hard() {
    for backend in backends() {
        let graph = IntentGraph::new(backend, &CoordinationConfig::default());
        let now = Utc::now();

        let a = auth_intent("a", "agent-a").with_constraints(vec![Constraint::new(
            "User model",
            "id must be uuid",
        )
        .with_severity(ConstraintSeverity::Hard)
        .with_scope(vec!["auth"])]);
        graph.publish(&a).unwrap();

        let b = auth_intent("b", "agent-b").with_constraints(vec![Constraint::new(
            "User model",
            "id must be int",
        )
        .with_scope(vec!["auth"])]);
        let conflicts = graph.find_conflicting_at(&b, now).unwrap();
        assert!(conflicts
            .iter()
            .any(|c| c.class == ConflictClass::HardConstraint));
    }
}

/// Relates any two specs whose tags share the "auth" marker, regardless
/// of names — the kind of overlap structural matching cannot see.
struct TagOracle;

impl SemanticMatcher for TagOracle {
    fn relate(&self, a: &InterfaceSpec, b: &InterfaceSpec) -> SemanticVerdict {
        let related = a.tags.contains(&"auth".to_string()) && b.tags.contains(&"auth".to_string());
        SemanticVerdict {
            related,
            reason: "both sit on the auth surface".to_string(),
        }
    }
}

#[test]
fn semantic_verdict_or_merges_with_the_structural_one() {
    for backend in backends() {
        let graph = IntentGraph::new(backend, &CoordinationConfig::default())
            .with_semantic_matcher(Arc::new(TagOracle));

        // Structurally unrelated names; only the semantic hook connects them.
        let a = Intent::new("a", "agent-a", "account management")
            .with_provides(vec![InterfaceSpec::new("AccountManager", InterfaceKind::Class)
                .with_tags(vec!["auth"])]);
        graph.publish(&a).unwrap();

        let b = Intent::new("b", "agent-b", "user handling")
            .with_provides(vec![InterfaceSpec::new("SessionBroker", InterfaceKind::Class)
                .with_tags(vec!["auth"])]);
        let overlaps = graph.find_overlapping(&b).unwrap();
        assert_eq!(overlaps.len(), 1);
        assert_eq!(
            overlaps[0].reasons[0].semantic_reason.as_deref(),
            Some("both sit on the auth surface")
        );
    }
}

#[test]
fn compatible_constraints_are_adopted() {
    for backend in backends() {
        let graph = IntentGraph::new(backend, &CoordinationConfig::default());

        let a = auth_intent("a", "agent-a").with_constraints(vec![Constraint::new(
            "User model",
            "must have created_at: str",
        )
        .with_scope(vec!["auth"])]);
        graph.publish(&a).unwrap();

        let b = auth_intent("b", "agent-b");
        let outcome = graph.resolve(&b).unwrap();
        assert_eq!(outcome.adopted_constraints.len(), 1);
        assert!(outcome
            .adjustments
            .iter()
            .any(|adj| adj.kind == convergent_graph::AdjustmentKind::AdoptConstraint));
    }
}
