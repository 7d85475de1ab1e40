//! End-to-end coordinator workflows over a fake fleet and fake toolchain.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use capfleet_core::testkit::{FakeCaptureTools, FakeFleet};
use capfleet_core::{
    CaptureError, CaptureStore, CaptureToolchain, Coordinator, CoordinatorState, Dispatcher,
    FilterConfig, MemoryAuditSink, Outcome, Pipeline,
};

struct Fixture {
    _dir: tempfile::TempDir,
    store: CaptureStore,
    fleet: Arc<FakeFleet>,
    audit: Arc<MemoryAuditSink>,
    coordinator: Coordinator,
}

fn fixture_with(fleet: FakeFleet, tools: FakeCaptureTools) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = CaptureStore::open(dir.path()).unwrap();
    let fleet = Arc::new(fleet);
    let audit = Arc::new(MemoryAuditSink::new());

    let pipeline = Pipeline::new(
        store.clone(),
        CaptureToolchain::default(),
        Arc::new(tools),
        audit.clone() as Arc<dyn capfleet_core::AuditSink>,
    );
    let dispatcher = Dispatcher::new(fleet.clone() as Arc<dyn capfleet_core::AgentTransport>);
    let coordinator = Coordinator::new(dispatcher, pipeline, audit.clone(), Duration::ZERO);

    Fixture {
        _dir: dir,
        store,
        fleet,
        audit,
        coordinator,
    }
}

/// Fleet whose agents flush a raw capture on stop, tools that behave.
fn flushing_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = CaptureStore::open(dir.path()).unwrap();
    let fleet = Arc::new(FakeFleet::new().flushing_to(store.raw_dir()));
    let audit = Arc::new(MemoryAuditSink::new());

    let pipeline = Pipeline::new(
        store.clone(),
        CaptureToolchain::default(),
        Arc::new(FakeCaptureTools::new()),
        audit.clone() as Arc<dyn capfleet_core::AuditSink>,
    );
    let dispatcher = Dispatcher::new(fleet.clone() as Arc<dyn capfleet_core::AgentTransport>);
    let coordinator = Coordinator::new(dispatcher, pipeline, audit.clone(), Duration::ZERO);

    Fixture {
        _dir: dir,
        store,
        fleet,
        audit,
        coordinator,
    }
}

#[tokio::test]
async fn test_start_without_agents_fails() {
    let fx = fixture_with(FakeFleet::new(), FakeCaptureTools::new());
    let err = fx.coordinator.start().await.unwrap_err();
    assert!(matches!(err, CaptureError::NoAgentsRegistered));
    assert_eq!(fx.coordinator.state(), CoordinatorState::Idle);
}

#[tokio::test]
async fn test_stop_without_agents_fails() {
    let fx = fixture_with(FakeFleet::new(), FakeCaptureTools::new());
    let err = fx.coordinator.stop().await.unwrap_err();
    assert!(matches!(err, CaptureError::NoAgentsRegistered));
}

#[tokio::test]
async fn test_registration_is_idempotent_through_the_coordinator() {
    let fx = fixture_with(FakeFleet::new(), FakeCaptureTools::new());
    fx.coordinator.register("alpha");
    fx.coordinator.register("alpha");
    fx.coordinator.register("beta");
    assert_eq!(fx.coordinator.health().agents, 2);
}

#[tokio::test]
async fn test_two_agent_round_trip() {
    let fx = flushing_fixture();
    fx.coordinator.register("alpha");
    fx.coordinator.register("beta");

    let start = fx.coordinator.start().await.unwrap();
    assert_eq!(start.outcomes.len(), 2);
    assert!(start.outcomes.iter().all(|o| o.outcome == Outcome::Success));
    assert_eq!(fx.coordinator.state(), CoordinatorState::Capturing);

    let stop = fx.coordinator.stop().await.unwrap();
    assert_eq!(stop.outcomes.len(), 2);
    assert!(stop.outcomes.iter().all(|o| o.outcome == Outcome::Success));
    assert_eq!(fx.coordinator.state(), CoordinatorState::Idle);

    // Merge combined both raw captures ("alpha" + "beta" payloads, sorted).
    let merged = fs::read(fx.store.merged_capture_path()).unwrap();
    assert_eq!(merged, b"alphabeta");

    // No persisted config: the raw decoded record comes back.
    let record = stop.record.expect("decoded record");
    assert!(record.packet_count() >= 1);
    assert!(stop.filter_status.is_none());
    assert!(stop.error.is_none());
}

#[tokio::test]
async fn test_per_agent_failure_does_not_fail_the_round() {
    let dir = tempfile::tempdir().unwrap();
    let store = CaptureStore::open(dir.path()).unwrap();
    let fleet = FakeFleet::new()
        .failing_agent("beta")
        .flushing_to(store.raw_dir());
    let audit = Arc::new(MemoryAuditSink::new());
    let pipeline = Pipeline::new(
        store.clone(),
        CaptureToolchain::default(),
        Arc::new(FakeCaptureTools::new()),
        audit.clone() as Arc<dyn capfleet_core::AuditSink>,
    );
    let coordinator = Coordinator::new(
        Dispatcher::new(Arc::new(fleet)),
        pipeline,
        audit,
        Duration::ZERO,
    );

    coordinator.register("alpha");
    coordinator.register("beta");

    let start = coordinator.start().await.unwrap();
    let failed: Vec<_> = start
        .outcomes
        .iter()
        .filter(|o| o.outcome == Outcome::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].identity.as_str(), "beta");

    // alpha still flushed a capture, so the stop cycle aggregates fine.
    let stop = coordinator.stop().await.unwrap();
    assert!(stop.record.is_some());
}

#[tokio::test]
async fn test_stop_with_no_raw_captures_fails_with_no_captures_to_merge() {
    // Agents acknowledge but never flush anything.
    let fx = fixture_with(FakeFleet::new(), FakeCaptureTools::new());
    fx.coordinator.register("alpha");

    let err = fx.coordinator.stop().await.unwrap_err();
    assert!(matches!(err, CaptureError::NoCapturesToMerge));
    assert!(!fx.store.has_merged_capture());
    // Stop still returned the coordinator to idle.
    assert_eq!(fx.coordinator.state(), CoordinatorState::Idle);
}

#[tokio::test]
async fn test_repeat_rounds_leave_exactly_one_merged_capture() {
    let fx = flushing_fixture();
    fx.coordinator.register("alpha");

    fx.coordinator.start().await.unwrap();
    fx.coordinator.stop().await.unwrap();
    let first = fs::read(fx.store.merged_capture_path()).unwrap();

    fx.coordinator.start().await.unwrap();
    // start cleared the previous round's artifacts
    assert!(!fx.store.has_merged_capture());
    assert!(fx.store.raw_captures().unwrap().is_empty());

    fx.coordinator.stop().await.unwrap();
    let second = fs::read(fx.store.merged_capture_path()).unwrap();
    assert_eq!(first, second);

    let merged_files: Vec<_> = fs::read_dir(fx.store.root())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".pcap"))
        .collect();
    // Only merged.pcap at the store root; nothing accumulated.
    assert_eq!(merged_files.len(), 1);
}

#[tokio::test]
async fn test_stop_applies_persisted_config_and_returns_filtered_record() {
    let fx = flushing_fixture();
    fx.coordinator.register("alpha");

    fx.coordinator
        .submit_config(FilterConfig::from([("ip", "10.0.0.1")]))
        .await
        .unwrap();

    fx.coordinator.start().await.unwrap();
    let stop = fx.coordinator.stop().await.unwrap();

    assert_eq!(stop.filter_status.as_deref(), Some("ok"));
    assert!(stop.record.is_some());
    let filtered = fs::read(fx.store.filtered_capture_path()).unwrap();
    assert!(filtered.starts_with(b"ip.addr == 10.0.0.1:"));
}

#[tokio::test]
async fn test_filter_failure_during_stop_degrades_instead_of_failing() {
    let dir = tempfile::tempdir().unwrap();
    let store = CaptureStore::open(dir.path()).unwrap();
    let fleet = FakeFleet::new().flushing_to(store.raw_dir());
    let audit = Arc::new(MemoryAuditSink::new());
    let pipeline = Pipeline::new(
        store.clone(),
        CaptureToolchain::default(),
        Arc::new(FakeCaptureTools::new().failing_filter("syntax error")),
        audit.clone() as Arc<dyn capfleet_core::AuditSink>,
    );
    let coordinator = Coordinator::new(
        Dispatcher::new(Arc::new(fleet)),
        pipeline,
        audit,
        Duration::ZERO,
    );

    coordinator.register("alpha");
    coordinator
        .submit_config(FilterConfig::from([("protocol", "tcp")]))
        .await
        .unwrap();

    coordinator.start().await.unwrap();
    let stop = coordinator.stop().await.unwrap();

    // Stop signals are reported even though aggregation degraded.
    assert_eq!(stop.outcomes.len(), 1);
    assert_eq!(stop.filter_status.as_deref(), Some("ko"));
    assert!(stop.error.as_deref().unwrap().contains("syntax error"));
    // Falls back to the raw decoded record.
    assert!(stop.record.is_some());
}

#[tokio::test]
async fn test_audit_trail_covers_success_and_failure_paths() {
    let fx = flushing_fixture();
    fx.coordinator.register("alpha");
    fx.coordinator.start().await.unwrap();
    fx.coordinator.stop().await.unwrap();

    let events: Vec<String> = fx
        .audit
        .entries()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert!(events.contains(&"agent.registered".to_string()));
    assert!(events.contains(&"round.started".to_string()));
    assert!(events.contains(&"round.stopped".to_string()));
    assert!(events.contains(&"merge".to_string()));
    assert!(events.contains(&"decode".to_string()));

    // Failure paths audit too.
    let empty = fixture_with(FakeFleet::new(), FakeCaptureTools::new());
    let _ = empty.coordinator.start().await;
    let entries = empty.audit.entries();
    assert!(entries.iter().any(|e| e.event == "round.started" && !e.ok));
}

#[tokio::test]
async fn test_stop_signal_reaches_every_agent() {
    let fx = flushing_fixture();
    fx.coordinator.register("alpha");
    fx.coordinator.register("beta");
    fx.coordinator.start().await.unwrap();
    fx.coordinator.stop().await.unwrap();

    let stops = fx
        .fleet
        .signals()
        .into_iter()
        .filter(|(_, s)| *s == capfleet_core::CaptureSignal::Stop)
        .count();
    assert_eq!(stops, 2);
}
