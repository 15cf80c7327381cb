//! Store-backed phi scoring: persistence, recomputation idempotence,
//! restart survival.

use std::sync::Arc;

use chrono::Utc;
use convergent_core::protocol::{AgentIdentity, Vote, VoteChoice};
use convergent_core::CoordinationConfig;
use convergent_scoring::{PhiScorer, ScoreStore, TaskOutcome};

fn scorer() -> PhiScorer {
    let store = Arc::new(ScoreStore::open_in_memory().unwrap());
    PhiScorer::new(store, &CoordinationConfig::default())
}

#[test]
fn unseen_agent_scores_the_prior() {
    let scorer = scorer();
    let phi = scorer.score("new-agent", "testing").unwrap();
    assert!((phi - 0.5).abs() < f64::EPSILON);
}

#[test]
fn recorded_approvals_raise_the_score() {
    let scorer = scorer();
    let now = Utc::now();
    let mut phi = 0.0;
    for _ in 0..5 {
        phi = scorer
            .record_outcome("agent-a", "code_review", TaskOutcome::Approved, now)
            .unwrap();
    }
    assert!(phi > 0.5);
    assert_eq!(scorer.score("agent-a", "code_review").unwrap(), phi);
}

#[test]
fn domains_are_independent() {
    let scorer = scorer();
    let now = Utc::now();
    for _ in 0..5 {
        scorer
            .record_outcome("agent-a", "code_review", TaskOutcome::Approved, now)
            .unwrap();
        scorer
            .record_outcome("agent-a", "testing", TaskOutcome::Failed, now)
            .unwrap();
    }
    let review = scorer.score("agent-a", "code_review").unwrap();
    let testing = scorer.score("agent-a", "testing").unwrap();
    assert!(review > 0.5);
    assert!(testing < 0.5);
}

#[test]
fn vote_weight_uses_server_side_phi() {
    let scorer = scorer();
    let now = Utc::now();
    for _ in 0..10 {
        scorer
            .record_outcome("agent-a", "reviewer", TaskOutcome::Approved, now)
            .unwrap();
    }

    // The self-reported identity claims full trust; the store disagrees.
    let mut agent = AgentIdentity::new("agent-a", "reviewer", "claude:sonnet");
    agent.phi_score = 1.0;
    let vote = Vote::new("req-1", agent, VoteChoice::Approve, 0.8, "fine");
    let weighted = scorer.weight_vote(vote).unwrap();

    let phi = scorer.score("agent-a", "reviewer").unwrap();
    assert!((weighted.weighted_score - phi * 0.8).abs() < 1e-9);
    assert!(weighted.weighted_score < 0.8, "claimed phi must be ignored");
}

#[test]
fn scores_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("scores.db");
    let config = CoordinationConfig::default();
    let now = Utc::now();

    let phi = {
        let store = Arc::new(ScoreStore::open(&db_path).unwrap());
        let scorer = PhiScorer::new(store, &config);
        scorer
            .record_outcome("agent-a", "testing", TaskOutcome::Approved, now)
            .unwrap()
    };

    let store = Arc::new(ScoreStore::open(&db_path).unwrap());
    let scorer = PhiScorer::new(store, &config);
    assert_eq!(scorer.score("agent-a", "testing").unwrap(), phi);
}
