//! Signal bus tests across all three backends: delivery, targeting,
//! ordering, at-least-once redelivery, and expiry sweeps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use convergent_core::protocol::Signal;
use convergent_swarm::{
    FilesystemSignalBackend, MemorySignalBackend, SignalBackend, SignalBus, SqliteSignalBackend,
};

fn backends(dir: &std::path::Path) -> Vec<Box<dyn SignalBackend>> {
    vec![
        Box::new(MemorySignalBackend::new()),
        Box::new(FilesystemSignalBackend::open(&dir.join("signals")).unwrap()),
        Box::new(SqliteSignalBackend::open(&dir.join("signals.db")).unwrap()),
    ]
}

#[test]
fn subscribers_receive_matching_signals_once_per_poll() {
    let dir = tempfile::tempdir().unwrap();
    for backend in backends(dir.path()) {
        let bus = SignalBus::new(backend, "consumer-1");
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        bus.subscribe("task_complete", None, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish(&Signal::broadcast("task_complete", "agent-a", "{}"))
            .unwrap();
        bus.publish(&Signal::broadcast("blocked", "agent-a", "{}"))
            .unwrap();

        let drained = bus.poll_once().unwrap();
        assert_eq!(drained.len(), 2, "poll drains every signal");
        assert_eq!(received.load(Ordering::Relaxed), 1, "only the subscribed type fires");

        // Acknowledged signals are not redelivered.
        assert!(bus.poll_once().unwrap().is_empty());
    }
}

#[test]
fn targeted_signals_skip_other_agents() {
    let dir = tempfile::tempdir().unwrap();
    for backend in backends(dir.path()) {
        let bus = SignalBus::new(backend, "consumer-1");
        let for_b = Arc::new(AtomicUsize::new(0));
        let for_c = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::clone(&for_b);
        let count_c = Arc::clone(&for_c);
        bus.subscribe("handoff", Some("agent-b"), move |_| {
            count_b.fetch_add(1, Ordering::Relaxed);
        });
        bus.subscribe("handoff", Some("agent-c"), move |_| {
            count_c.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish(&Signal::targeted("handoff", "agent-a", "agent-b", "{}"))
            .unwrap();
        bus.publish(&Signal::broadcast("handoff", "agent-a", "{}"))
            .unwrap();
        bus.poll_once().unwrap();

        assert_eq!(for_b.load(Ordering::Relaxed), 2, "targeted + broadcast");
        assert_eq!(for_c.load(Ordering::Relaxed), 1, "broadcast only");
    }
}

#[test]
fn delivery_order_is_non_decreasing_by_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    for backend in backends(dir.path()) {
        let bus = SignalBus::new(backend, "consumer-1");
        let seen: Arc<Mutex<Vec<chrono::DateTime<Utc>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe("tick", None, move |signal| {
            sink.lock().unwrap().push(signal.timestamp);
        });

        let base = Utc::now();
        // Publish out of timestamp order.
        for offset in [3i64, 1, 2] {
            let mut signal = Signal::broadcast("tick", "agent-a", "{}");
            signal.timestamp = base + Duration::seconds(offset);
            bus.publish(&signal).unwrap();
        }
        bus.poll_once().unwrap();

        let order = seen.lock().unwrap().clone();
        assert_eq!(order.len(), 3);
        assert!(order.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn consumers_track_positions_independently() {
    let backend = Arc::new(SqliteSignalBackend::open_in_memory().unwrap());
    backend
        .store(&Signal::broadcast("tick", "agent-a", "{}"))
        .unwrap();

    let first = backend.unprocessed("consumer-1").unwrap();
    assert_eq!(first.len(), 1);
    backend
        .mark_processed("consumer-1", &[first[0].0.clone()])
        .unwrap();

    assert!(backend.unprocessed("consumer-1").unwrap().is_empty());
    assert_eq!(backend.unprocessed("consumer-2").unwrap().len(), 1);
}

#[test]
fn unacknowledged_signals_are_redelivered() {
    let backend = MemorySignalBackend::new();
    backend
        .store(&Signal::broadcast("tick", "agent-a", "{}"))
        .unwrap();

    // Two fetches without acknowledgement: same signal both times.
    assert_eq!(backend.unprocessed("consumer-1").unwrap().len(), 1);
    assert_eq!(backend.unprocessed("consumer-1").unwrap().len(), 1);
}

#[test]
fn expired_signals_are_swept() {
    let dir = tempfile::tempdir().unwrap();
    for backend in backends(dir.path()) {
        let now = Utc::now();
        let mut old = Signal::broadcast("tick", "agent-a", "{}");
        old.timestamp = now - Duration::hours(2);
        let fresh = Signal::broadcast("tick", "agent-a", "{}");
        backend.store(&old).unwrap();
        backend.store(&fresh).unwrap();

        let removed = backend.sweep_expired(3600, now).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.signals(Some("tick"), None, None).unwrap().len(), 1);
    }
}

#[test]
fn signals_survive_restart_on_persistent_backends() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("signals.db");
    {
        let backend = SqliteSignalBackend::open(&db_path).unwrap();
        backend
            .store(&Signal::broadcast("task_outcome", "agent-a", "{\"ok\":true}"))
            .unwrap();
    }
    let backend = SqliteSignalBackend::open(&db_path).unwrap();
    let signals = backend.signals(Some("task_outcome"), Some("agent-a"), None).unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].payload, "{\"ok\":true}");
}
