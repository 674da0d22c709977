//! Control Loop Integration Tests
//!
//! Drive the wired plane end to end with a scripted prober and supervisor:
//! probe failures become bus events, the orchestrator restarts, the breaker
//! counts outcomes. Time is paused so cooldowns and grace periods run instantly.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{fast_config, test_plane, wait_until};
use health_plane::bus::event_types;
use health_plane::config::{BreakerConfig, BusConfig};
use health_plane::{
    BreakerPolicy, BreakerState, CircuitBreaker, EventBus, HandlerError, HealingActionKind,
    HealingPhase, HealthStatus, ServiceDescriptor,
};

fn svc(id: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(id, format!("http://{id}:8080/health"))
        .with_restart_command(format!("systemctl restart {id}"))
}

/// Three consecutive failures fail the service, publish exactly one
/// `service.failed` and make the orchestrator issue a restart.
#[tokio::test(start_paused = true)]
async fn test_failed_service_is_restarted() {
    let t = test_plane(fast_config(), true);
    let plane = t.plane.clone();
    plane.registry.register(svc("svc-1").with_failure_threshold(3)).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&plane.orchestrator).run(cancel.clone()));

    t.prober.set_up("svc-1", false);
    for _ in 0..3 {
        plane.registry.probe("svc-1").await.unwrap();
    }
    let record = plane.registry.get_record("svc-1").unwrap();
    assert_eq!(record.status, HealthStatus::Failed);
    assert_eq!(record.consecutive_failures, 3);
    assert_eq!(plane.bus.history_by_type(event_types::SERVICE_FAILED, 10).len(), 1);

    let healed = wait_until(|| !plane.bus.history_by_type(event_types::SERVICE_HEALED, 1).is_empty(), 100).await;
    assert!(healed, "service was not healed");

    let history = plane.orchestrator.get_healing_history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, HealingActionKind::Restart);
    assert!(history[0].success);
    assert_eq!(t.supervisor.calls(), 1);
    assert_eq!(plane.registry.get_record("svc-1").unwrap().status, HealthStatus::Healthy);
    assert_eq!(plane.orchestrator.service_status("svc-1").unwrap().phase, HealingPhase::Healed);

    let summary = plane.orchestrator.get_system_health();
    assert_eq!(summary.total_restarts, 1);
    assert_eq!(summary.health_percentage, 100.0);

    cancel.cancel();
    handle.await.unwrap();
}

/// Threshold 2, cooldown 1000ms: Open after two failures, still short-circuited
/// at 500ms, trial granted at 1100ms, closed by the trial's success.
#[tokio::test(start_paused = true)]
async fn test_breaker_cooldown_and_trial() {
    let bus = Arc::new(EventBus::new(&BusConfig::default()));
    let breaker = CircuitBreaker::new(&BreakerConfig::default(), Arc::clone(&bus));
    breaker.track_with_policy("svc-2", BreakerPolicy { failure_threshold: 2, cooldown_ms: 1_000 });

    breaker.record_failure("svc-2").await.unwrap();
    let state = breaker.record_failure("svc-2").await.unwrap();
    assert_eq!(state.state, BreakerState::Open);

    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(!breaker.allow("svc-2").await.unwrap());
    assert_eq!(breaker.get_state("svc-2").unwrap().state, BreakerState::Open);

    tokio::time::advance(Duration::from_millis(600)).await;
    assert!(breaker.allow("svc-2").await.unwrap());
    assert_eq!(breaker.get_state("svc-2").unwrap().state, BreakerState::HalfOpen);

    let closed = breaker.record_success("svc-2").await.unwrap();
    assert_eq!(closed.state, BreakerState::Closed);
    assert_eq!(closed.failure_count, 0);

    let kinds: Vec<String> = bus.history(10).into_iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![event_types::BREAKER_OPENED, event_types::BREAKER_HALF_OPEN, event_types::BREAKER_CLOSED]
    );
}

/// Two concurrent heal requests for one failure issue a single restart.
#[tokio::test(start_paused = true)]
async fn test_concurrent_heal_requests_restart_once() {
    let t = test_plane(fast_config(), true);
    let plane = &t.plane;
    plane.registry.register(svc("svc-1").with_failure_threshold(1)).await.unwrap();
    t.prober.set_up("svc-1", false);
    plane.registry.probe("svc-1").await.unwrap();

    let (a, b) = tokio::join!(plane.orchestrator.heal("svc-1"), plane.orchestrator.heal("svc-1"));
    let mut phases = vec![a.unwrap(), b.unwrap()];
    phases.sort_by_key(|p| p.to_string());
    assert_eq!(phases, vec![HealingPhase::Healed, HealingPhase::Healing]);
    assert_eq!(t.supervisor.calls(), 1);

    // Already healthy again: a late request does nothing
    assert_eq!(plane.orchestrator.heal("svc-1").await.unwrap(), HealingPhase::Healed);
    assert_eq!(t.supervisor.calls(), 1);
}

/// Quota 2 and three failures in one window: two restarts, one escalation.
#[tokio::test(start_paused = true)]
async fn test_restart_quota_caps_restarts_per_window() {
    let t = test_plane(fast_config(), true);
    let plane = &t.plane;
    plane
        .registry
        .register(svc("svc-1").with_failure_threshold(1).with_max_restarts(2))
        .await
        .unwrap();

    let mut phases = Vec::new();
    for _ in 0..3 {
        t.prober.set_up("svc-1", false);
        plane.registry.probe("svc-1").await.unwrap();
        phases.push(plane.orchestrator.heal("svc-1").await.unwrap());
    }

    assert_eq!(phases, vec![HealingPhase::Healed, HealingPhase::Healed, HealingPhase::Escalated]);
    assert_eq!(t.supervisor.calls(), 2);
    let kinds: Vec<HealingActionKind> =
        plane.orchestrator.get_healing_history(10).into_iter().map(|a| a.action).collect();
    assert_eq!(
        kinds,
        vec![HealingActionKind::Restart, HealingActionKind::Restart, HealingActionKind::Escalate]
    );
    assert_eq!(plane.orchestrator.service_status("svc-1").unwrap().restarts_in_window, 2);
}

/// A failing and a panicking subscriber do not stop delivery to the others.
#[tokio::test(start_paused = true)]
async fn test_broken_subscribers_do_not_block_healing() {
    let t = test_plane(fast_config(), true);
    let plane = t.plane.clone();
    plane
        .bus
        .subscribe_fn(event_types::SERVICE_FAILED, "broken", |_| Err(HandlerError::new("boom")));
    plane
        .bus
        .subscribe_fn(event_types::SERVICE_FAILED, "panicky", |_| -> Result<(), HandlerError> {
            panic!("subscriber bug")
        });
    plane.registry.register(svc("svc-1").with_failure_threshold(1)).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&plane.orchestrator).run(cancel.clone()));

    t.prober.set_up("svc-1", false);
    plane.registry.probe("svc-1").await.unwrap();

    let failed = plane.bus.history_by_type(event_types::SERVICE_FAILED, 1).pop().unwrap();
    assert!(failed.is_partial_failure());
    let names: Vec<&str> = failed.delivery_failures.iter().map(|f| f.subscriber.as_str()).collect();
    assert_eq!(names, vec!["broken", "panicky"]);

    let healed = wait_until(|| !plane.bus.history_by_type(event_types::SERVICE_HEALED, 1).is_empty(), 100).await;
    assert!(healed, "orchestrator never saw the failure");

    cancel.cancel();
    handle.await.unwrap();
}

/// A service that never comes back gets two restarts then an escalation,
/// and stays escalated until it is healthy again.
#[tokio::test(start_paused = true)]
async fn test_unrecoverable_service_escalates_once() {
    let t = test_plane(fast_config(), false);
    let plane = t.plane.clone();
    plane.registry.register(svc("svc-1").with_failure_threshold(1)).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&plane.orchestrator).run(cancel.clone()));

    t.prober.set_up("svc-1", false);
    plane.registry.probe("svc-1").await.unwrap();

    let escalated = wait_until(
        || !plane.bus.history_by_type(event_types::SERVICE_ESCALATED, 1).is_empty(),
        400,
    )
    .await;
    assert!(escalated);

    // Several ticks later: no new restarts for an escalated service
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(t.supervisor.calls(), 2);
    assert_eq!(plane.bus.history_by_type(event_types::SERVICE_ESCALATED, 10).len(), 1);
    assert_eq!(plane.orchestrator.get_system_health().escalated, 1);

    // Operator fixes it; the next probe returns it to Watching
    t.prober.set_up("svc-1", true);
    plane.registry.probe("svc-1").await.unwrap();
    let watching = wait_until(
        || plane.orchestrator.service_status("svc-1").map(|s| s.phase) == Ok(HealingPhase::Watching),
        20,
    )
    .await;
    assert!(watching);

    cancel.cancel();
    handle.await.unwrap();
}

/// Deregistration mid-episode aborts healing and drops all per-service state.
#[tokio::test(start_paused = true)]
async fn test_deregister_during_healing_aborts_episode() {
    let t = test_plane(fast_config(), false);
    let plane = t.plane.clone();
    plane.registry.register(svc("svc-1").with_failure_threshold(1)).await.unwrap();
    t.prober.set_up("svc-1", false);
    plane.registry.probe("svc-1").await.unwrap();

    let orchestrator = Arc::clone(&plane.orchestrator);
    let episode = tokio::spawn(async move { orchestrator.heal("svc-1").await });

    assert!(wait_until(|| t.supervisor.calls() == 1, 20).await);
    assert!(plane.registry.deregister("svc-1").await);

    let phase = episode.await.unwrap().unwrap();
    assert_eq!(phase, HealingPhase::Watching);
    assert_eq!(t.supervisor.calls(), 1);

    let kinds: Vec<HealingActionKind> =
        plane.orchestrator.get_healing_history(10).into_iter().map(|a| a.action).collect();
    assert!(!kinds.contains(&HealingActionKind::Escalate), "{kinds:?}");
    assert!(plane.bus.history_by_type(event_types::SERVICE_ESCALATED, 1).is_empty());
    assert!(plane.breaker.get_state("svc-1").is_err());
    assert!(plane.orchestrator.service_status("svc-1").is_err());
}

/// An open breaker ignores probe outcomes until the cooldown; the
/// orchestrator logs the isolation.
#[tokio::test(start_paused = true)]
async fn test_open_breaker_isolates_and_skips_probes() {
    let mut config = fast_config();
    config.breaker.failure_threshold = 2;
    config.breaker.cooldown_ms = 10_000;
    config.probe.failure_threshold = 10;
    let t = test_plane(config, false);
    let plane = t.plane.clone();
    plane.registry.register(svc("svc-1")).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&plane.orchestrator).run(cancel.clone()));

    t.prober.set_up("svc-1", false);
    plane.registry.probe("svc-1").await.unwrap();
    plane.registry.probe("svc-1").await.unwrap();
    assert_eq!(plane.breaker.get_state("svc-1").unwrap().state, BreakerState::Open);

    let isolated = wait_until(
        || !plane.bus.history_by_type(event_types::SERVICE_ISOLATED, 1).is_empty(),
        20,
    )
    .await;
    assert!(isolated);
    let last = plane.orchestrator.get_healing_history(1).pop().unwrap();
    assert_eq!(last.action, HealingActionKind::Isolate);

    // While open the health record keeps updating but the breaker ignores it
    let record = plane.registry.probe("svc-1").await.unwrap();
    assert_eq!(record.consecutive_failures, 3);
    let circuit = plane.breaker.get_state("svc-1").unwrap();
    assert_eq!(circuit.state, BreakerState::Open);
    assert_eq!(circuit.failure_count, 2);

    // After the cooldown the next probe is the HalfOpen trial and closes the breaker
    t.prober.set_up("svc-1", true);
    tokio::time::sleep(Duration::from_millis(10_100)).await;
    plane.registry.probe("svc-1").await.unwrap();
    assert_eq!(plane.breaker.get_state("svc-1").unwrap().state, BreakerState::Closed);

    cancel.cancel();
    handle.await.unwrap();
}

/// Descriptors without a probe interval use `probe.interval_ms`.
#[tokio::test(start_paused = true)]
async fn test_periodic_probing_uses_configured_interval() {
    let mut config = fast_config();
    config.probe.interval_ms = 1_000;
    let t = test_plane(config, true);
    let plane = t.plane.clone();
    plane.registry.register(svc("svc-1")).await.unwrap();

    let root = CancellationToken::new();
    plane.registry.start_periodic_probing(&root);
    assert!(plane.registry.is_probing());

    tokio::time::sleep(Duration::from_millis(5_050)).await;
    let probes = plane.registry.get_record("svc-1").unwrap().total_probes;
    assert!((4..=6).contains(&probes), "probes = {probes}");

    root.cancel();
    plane.registry.stop();
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    let after = plane.registry.get_record("svc-1").unwrap().total_probes;
    assert!(after <= probes + 1, "probing continued after stop: {probes} -> {after}");
}
