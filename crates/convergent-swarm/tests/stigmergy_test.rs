//! Stigmergy field tests: decay law, reinforcement, purge floor,
//! context assembly.

use chrono::{Duration, Utc};
use convergent_core::protocol::MarkerType;
use convergent_core::CoordinationConfig;
use convergent_swarm::StigmergyField;

fn field() -> StigmergyField {
    StigmergyField::open_in_memory(&CoordinationConfig::default()).unwrap()
}

#[test]
fn ten_day_decay_keeps_the_marker_thirty_five_days_purges_it() {
    // κ = 0.1/day, strength 1.0: ten days later strength ≈ e^(-1) ≈ 0.368,
    // above the 0.05 floor; thirty-five days later ≈ 0.030, purged.
    let field = field();
    let t0 = Utc::now() - Duration::days(35);
    let marker = field
        .leave_marker_at(
            "agent-a",
            MarkerType::KnownIssue,
            "src/auth.rs",
            "login endpoint has a race",
            1.0,
            t0,
            None,
        )
        .unwrap();

    let purged = field.evaporate_at(t0 + Duration::days(10)).unwrap();
    assert_eq!(purged, 0);
    let surviving = field.markers_for("src/auth.rs").unwrap();
    assert!((surviving[0].strength - (-1.0f64).exp()).abs() < 0.01);

    let purged = field.evaporate_at(t0 + Duration::days(35)).unwrap();
    assert_eq!(purged, 1);
    assert_eq!(field.count().unwrap(), 0);
    assert!(!field.remove_marker(&marker.marker_id).unwrap());
}

#[test]
fn repeated_sweeps_compose_to_the_same_decay() {
    let field_many = field();
    let field_once = field();
    let t0 = Utc::now() - Duration::days(10);
    for f in [&field_many, &field_once] {
        f.leave_marker_at(
            "agent-a",
            MarkerType::PatternFound,
            "src/db.rs",
            "repository pattern",
            1.0,
            t0,
            None,
        )
        .unwrap();
    }

    // One field sweeps daily, the other once at the end.
    for day in 1..=10 {
        field_many.evaporate_at(t0 + Duration::days(day)).unwrap();
    }
    field_once.evaporate_at(t0 + Duration::days(10)).unwrap();

    let many = field_many.markers_for("src/db.rs").unwrap()[0].strength;
    let once = field_once.markers_for("src/db.rs").unwrap()[0].strength;
    assert!((many - once).abs() < 1e-6, "sweep cadence changed the decay");
}

#[test]
fn marker_at_exactly_the_floor_survives() {
    let config = CoordinationConfig::default();
    let field = StigmergyField::open_in_memory(&config).unwrap();
    let now = Utc::now();
    field
        .leave_marker_at(
            "agent-a",
            MarkerType::QualitySignal,
            "tests/auth_test.rs",
            "flaky",
            config.stigmergy_min_strength,
            now,
            None,
        )
        .unwrap();

    // Zero elapsed time: strength is exactly the floor, which stays.
    assert_eq!(field.evaporate_at(now).unwrap(), 0);
    assert_eq!(field.count().unwrap(), 1);
}

#[test]
fn reinforce_adds_strength_and_zero_is_a_no_op() {
    let field = field();
    let marker = field
        .leave_marker("agent-a", MarkerType::Dependency, "src/api.rs", "depends on db")
        .unwrap();

    assert_eq!(field.reinforce(&marker.marker_id, 0.0).unwrap(), Some(1.0));
    assert_eq!(field.reinforce(&marker.marker_id, 0.5).unwrap(), Some(1.5));
    // Capped at 2.0.
    assert_eq!(field.reinforce(&marker.marker_id, 5.0).unwrap(), Some(2.0));
    assert_eq!(field.reinforce("missing", 0.5).unwrap(), None);
}

#[test]
fn explicit_expiry_purges_regardless_of_strength() {
    let field = field();
    let now = Utc::now();
    field
        .leave_marker_at(
            "agent-a",
            MarkerType::FileModified,
            "src/auth.rs",
            "editing now",
            2.0,
            now,
            Some(now + Duration::minutes(5)),
        )
        .unwrap();

    assert_eq!(field.evaporate_at(now + Duration::minutes(4)).unwrap(), 0);
    assert_eq!(field.evaporate_at(now + Duration::minutes(6)).unwrap(), 1);
}

#[test]
fn context_assembles_markers_strongest_first() {
    let field = field();
    let now = Utc::now();
    field
        .leave_marker_at(
            "agent-a",
            MarkerType::KnownIssue,
            "src/auth.rs",
            "weak hint",
            0.3,
            now,
            None,
        )
        .unwrap();
    field
        .leave_marker_at(
            "agent-b",
            MarkerType::PatternFound,
            "src/auth.rs",
            "strong pattern",
            1.5,
            now,
            None,
        )
        .unwrap();

    let context = field
        .context_for(&["src/auth.rs".to_string(), "src/db.rs".to_string()])
        .unwrap();
    let strong_pos = context.find("strong pattern").unwrap();
    let weak_pos = context.find("weak hint").unwrap();
    assert!(strong_pos < weak_pos);
    assert!(context.contains("pattern_found"));

    assert_eq!(field.context_for(&[]).unwrap(), "");
}
