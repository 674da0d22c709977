//! Self-Healing Orchestrator - restart, verify, escalate
//!
//! Per-service state machine:
//!
//! ```text
//! Watching ──degraded──► Degraded ──failed──► Healing ──healthy re-probe──► Healed
//!    ▲                                          │
//!    │                                          └─quota / attempts / fatal──► Escalated
//!    └──────────────── healthy probe ◄───────────────────────────────────────────┘
//! ```
//!
//! The loop wakes on a fixed tick and on bus events. Bus handlers only push
//! onto a channel so that a publisher (the registry, mid-probe) is never
//! blocked by healing work. Each failure episode runs as its own task:
//!
//! 1. Claim a slot in the service's sliding restart window, else escalate.
//! 2. Publish `service.restarting`, invoke the supervisor under a timeout.
//! 3. Re-probe until Healthy or the grace period ends (early on a healthy
//!    signal from the bus).
//! 4. Healthy: record success, publish `service.healed`, reset the breaker.
//!    Otherwise back off and retry, up to `attempts_per_episode`, then escalate.
//!
//! An unreachable supervisor escalates immediately. Escalated services get no
//! automatic retry until a probe reports them Healthy again.

mod log;
mod rate_limit;
mod supervisor;

pub use log::HealingLog;
pub use rate_limit::RestartWindow;
pub use supervisor::{ProcessSupervisor, Supervisor};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::bus::{event_types, EventBus, SubscriptionToken};
use crate::config::HealingConfig;
use crate::error::{HandlerError, PlaneError, SupervisorError};
use crate::registry::ServiceRegistry;
use crate::types::{
    CircuitState, HealingAction, HealingActionKind, HealingPhase, HealingTrigger, HealthRecord,
    HealthStatus, ServiceDescriptor, ServiceHealingStatus, SystemHealthSummary,
};

const SOURCE: &str = "healing-orchestrator";

/// Pending wake-ups before new ones are dropped; the tick reconciles anyway
const WAKE_CAPACITY: usize = 256;

/// Signals delivered from bus handlers to the orchestrator loop
#[derive(Debug)]
enum Wake {
    Status(String, HealthStatus),
    BreakerOpened(CircuitState),
    Deregistered(String),
}

struct WatchState {
    phase: HealingPhase,
    restarts: RestartWindow,
    last_transition_at: DateTime<Utc>,
}

/// Orchestrator bookkeeping for one service
struct Watch {
    state: Mutex<WatchState>,
    /// Held for the duration of a failure episode
    episode: tokio::sync::Mutex<()>,
    /// Signalled when the service reports healthy, cutting the grace wait short
    healthy: Notify,
}

impl Watch {
    fn new(window: Duration) -> Self {
        Self {
            state: Mutex::new(WatchState {
                phase: HealingPhase::Watching,
                restarts: RestartWindow::new(window),
                last_transition_at: Utc::now(),
            }),
            episode: tokio::sync::Mutex::new(()),
            healthy: Notify::new(),
        }
    }

    fn phase(&self) -> HealingPhase {
        self.state.lock().phase
    }

    fn set_phase(&self, phase: HealingPhase) -> HealingPhase {
        let mut state = self.state.lock();
        let previous = state.phase;
        if previous != phase {
            state.phase = phase;
            state.last_transition_at = Utc::now();
        }
        previous
    }
}

/// How one restart attempt ended
enum AttemptOutcome {
    Recovered(HealthRecord),
    Unrecovered(String),
    Fatal(String),
    Aborted,
}

pub struct Orchestrator {
    registry: Arc<ServiceRegistry>,
    breaker: Arc<CircuitBreaker>,
    bus: Arc<EventBus>,
    supervisor: Arc<dyn Supervisor>,
    config: HealingConfig,
    log: HealingLog,
    watches: DashMap<String, Arc<Watch>>,
    wake_tx: mpsc::Sender<Wake>,
    wake_rx: Mutex<Option<mpsc::Receiver<Wake>>>,
    subscriptions: Mutex<Vec<SubscriptionToken>>,
}

impl Orchestrator {
    pub fn new(
        config: HealingConfig,
        registry: Arc<ServiceRegistry>,
        breaker: Arc<CircuitBreaker>,
        bus: Arc<EventBus>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(WAKE_CAPACITY);
        Self {
            log: HealingLog::new(config.log_capacity),
            registry,
            breaker,
            bus,
            supervisor,
            config,
            watches: DashMap::new(),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe the orchestrator's wake-up handlers on the bus.
    pub fn attach(&self) {
        let mut subs = self.subscriptions.lock();
        if !subs.is_empty() {
            return;
        }

        for status in [HealthStatus::Healthy, HealthStatus::Degraded, HealthStatus::Failed] {
            let tx = self.wake_tx.clone();
            subs.push(self.bus.subscribe_fn(status.event_type(), SOURCE, move |event| {
                let Some(id) = event.service_id() else {
                    return Ok(());
                };
                wake(&tx, Wake::Status(id.to_string(), status))
            }));
        }

        let tx = self.wake_tx.clone();
        subs.push(self.bus.subscribe_fn(event_types::BREAKER_OPENED, SOURCE, move |event| {
            let circuit: CircuitState = serde_json::from_value(event.payload["circuit"].clone())
                .map_err(|e| HandlerError::new(format!("malformed breaker payload: {e}")))?;
            wake(&tx, Wake::BreakerOpened(circuit))
        }));

        let tx = self.wake_tx.clone();
        subs.push(self.bus.subscribe_fn(event_types::SERVICE_DEREGISTERED, SOURCE, move |event| {
            let Some(id) = event.service_id() else {
                return Ok(());
            };
            wake(&tx, Wake::Deregistered(id.to_string()))
        }));
    }

    /// Remove the bus subscriptions made by [`attach`](Self::attach).
    pub fn detach(&self) {
        for token in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(token);
        }
    }

    // ========================================================================
    // Loop
    // ========================================================================

    /// Run the orchestrator loop until cancelled. Episodes still running at
    /// cancellation are aborted.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let Some(mut wake_rx) = self.wake_rx.lock().take() else {
            warn!("Orchestrator loop already running");
            return;
        };

        let tick = Duration::from_millis(self.config.tick_ms.max(1));
        info!(
            tick_ms = self.config.tick_ms,
            grace_period_ms = self.config.grace_period_ms,
            attempts_per_episode = self.config.attempts_per_episode,
            "Healing orchestrator started"
        );

        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut episodes: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for id in self.run_cycle() {
                        self.spawn_episode(&mut episodes, id);
                    }
                }
                Some(wake) = wake_rx.recv() => {
                    if let Some(id) = self.handle_wake(wake).await {
                        self.spawn_episode(&mut episodes, id);
                    }
                }
                Some(joined) = episodes.join_next(), if !episodes.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Healing episode panicked");
                        }
                    }
                }
            }
        }

        episodes.shutdown().await;
        *self.wake_rx.lock() = Some(wake_rx);
        info!("Healing orchestrator stopped");
    }

    fn spawn_episode(self: &Arc<Self>, episodes: &mut JoinSet<()>, service_id: String) {
        let orchestrator = Arc::clone(self);
        episodes.spawn(async move {
            if let Err(e) = orchestrator.heal(&service_id).await {
                debug!(service = %service_id, error = %e, "Healing episode ended early");
            }
        });
    }

    /// Reconcile phases against the registry. Returns the services that need
    /// a failure episode.
    fn run_cycle(&self) -> Vec<String> {
        let mut to_heal = Vec::new();
        for record in self.registry.records() {
            if self.apply_status(&record.service_id, record.status) {
                to_heal.push(record.service_id);
            }
        }
        to_heal
    }

    async fn handle_wake(&self, wake: Wake) -> Option<String> {
        match wake {
            Wake::Status(id, status) => self.apply_status(&id, status).then_some(id),
            Wake::BreakerOpened(circuit) => {
                self.isolate(circuit).await;
                None
            }
            Wake::Deregistered(id) => {
                if self.watches.remove(&id).is_some() {
                    info!(service = %id, "Healing state dropped for deregistered service");
                }
                None
            }
        }
    }

    /// Fold a health status into the service's phase. Returns true when a
    /// failure episode should start.
    fn apply_status(&self, service_id: &str, status: HealthStatus) -> bool {
        let Some(watch) = self.watch(service_id) else {
            return false;
        };
        let phase = watch.phase();
        match status {
            HealthStatus::Healthy => {
                if phase == HealingPhase::Healing {
                    watch.healthy.notify_waiters();
                }
                if matches!(phase, HealingPhase::Degraded | HealingPhase::Escalated) {
                    watch.set_phase(HealingPhase::Watching);
                    if phase == HealingPhase::Escalated {
                        info!(service = %service_id, "Escalated service recovered, watching again");
                    }
                }
                false
            }
            HealthStatus::Degraded => {
                if matches!(phase, HealingPhase::Watching | HealingPhase::Healed) {
                    watch.set_phase(HealingPhase::Degraded);
                }
                false
            }
            HealthStatus::Failed => !matches!(phase, HealingPhase::Healing | HealingPhase::Escalated),
            HealthStatus::Unknown => false,
        }
    }

    /// Watch for a registered service, created on first use.
    fn watch(&self, service_id: &str) -> Option<Arc<Watch>> {
        if !self.registry.contains(service_id) {
            return None;
        }
        let window = Duration::from_millis(self.config.restart_window_ms);
        Some(Arc::clone(
            self.watches
                .entry(service_id.to_string())
                .or_insert_with(|| Arc::new(Watch::new(window)))
                .value(),
        ))
    }

    // ========================================================================
    // Episodes
    // ========================================================================

    /// Run one failure episode for a service and return the phase it ends in.
    ///
    /// Does nothing unless the service is currently Failed. If an episode is
    /// already running for the service, returns `Healing` at once.
    pub async fn heal(&self, service_id: &str) -> Result<HealingPhase, PlaneError> {
        let watch = self
            .watch(service_id)
            .ok_or_else(|| PlaneError::UnknownService(service_id.to_string()))?;
        let Ok(_episode) = watch.episode.try_lock() else {
            return Ok(HealingPhase::Healing);
        };

        let phase = watch.phase();
        if phase == HealingPhase::Escalated {
            return Ok(phase);
        }
        let record = self.registry.get_record(service_id)?;
        if record.status != HealthStatus::Failed {
            return Ok(phase);
        }
        let descriptor = self.registry.descriptor(service_id)?;

        watch.set_phase(HealingPhase::Healing);
        warn!(
            service = %service_id,
            consecutive_failures = record.consecutive_failures,
            "Service failed, starting healing episode"
        );

        let trigger = HealingTrigger::Health(record);
        let quota = descriptor
            .max_restarts_per_window
            .unwrap_or(self.config.max_restarts_per_window);
        let attempts = self.config.attempts_per_episode.max(1);
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            if !self.registry.contains(service_id) {
                return Ok(self.abort(service_id));
            }

            let claimed = watch.state.lock().restarts.try_acquire(Instant::now(), quota);
            if let Err(restarts) = claimed {
                let err = PlaneError::RateLimitExceeded {
                    service_id: service_id.to_string(),
                    restarts,
                    window_ms: self.config.restart_window_ms,
                };
                return Ok(self.escalate(&watch, &trigger, attempt, err.to_string()).await);
            }

            match self.attempt_restart(&watch, &descriptor, &trigger, attempt).await {
                AttemptOutcome::Recovered(record) => {
                    watch.set_phase(HealingPhase::Healed);
                    self.bus
                        .publish_from(
                            SOURCE,
                            event_types::SERVICE_HEALED,
                            json!({ "serviceId": service_id, "attempt": attempt, "record": record }),
                        )
                        .await;
                    self.breaker.reset(service_id).await;
                    return Ok(HealingPhase::Healed);
                }
                AttemptOutcome::Fatal(reason) => {
                    let err = PlaneError::RestartInvocationFailure {
                        service_id: service_id.to_string(),
                        reason,
                    };
                    return Ok(self.escalate(&watch, &trigger, attempt, err.to_string()).await);
                }
                AttemptOutcome::Aborted => return Ok(self.abort(service_id)),
                AttemptOutcome::Unrecovered(reason) => {
                    last_failure = reason;
                    if attempt < attempts {
                        let backoff = self.backoff(attempt);
                        debug!(service = %service_id, attempt, backoff_ms = backoff.as_millis() as u64, "Backing off before next restart");
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        let reason = format!("{attempts} restart attempts did not recover the service: {last_failure}");
        Ok(self.escalate(&watch, &trigger, attempts, reason).await)
    }

    /// Operator-triggered episode. Clears an escalation first so a Failed
    /// service gets another try; the restart quota still applies.
    pub async fn heal_now(&self, service_id: &str) -> Result<HealingPhase, PlaneError> {
        let watch = self
            .watch(service_id)
            .ok_or_else(|| PlaneError::UnknownService(service_id.to_string()))?;
        if watch.phase() == HealingPhase::Escalated && watch.episode.try_lock().is_ok() {
            info!(service = %service_id, "Escalation cleared by operator");
            watch.set_phase(HealingPhase::Watching);
        }
        self.heal(service_id).await
    }

    async fn attempt_restart(
        &self,
        watch: &Watch,
        descriptor: &ServiceDescriptor,
        trigger: &HealingTrigger,
        attempt: u32,
    ) -> AttemptOutcome {
        let service_id = descriptor.id.as_str();
        let started_at = Utc::now();
        let started = Instant::now();

        info!(service = %service_id, attempt, "Restarting service");
        self.bus
            .publish_from(
                SOURCE,
                event_types::SERVICE_RESTARTING,
                json!({ "serviceId": service_id, "attempt": attempt }),
            )
            .await;

        let limit = Duration::from_millis(self.config.restart_timeout_ms);
        let invoked = match tokio::time::timeout(limit, self.supervisor.restart(descriptor)).await {
            Ok(result) => result,
            Err(_) => Err(SupervisorError::Timeout(limit)),
        };

        let outcome = match invoked {
            Err(e) if e.is_fatal() => {
                error!(service = %service_id, attempt, error = %e, "Restart could not be invoked");
                AttemptOutcome::Fatal(e.to_string())
            }
            Err(e) => {
                warn!(service = %service_id, attempt, error = %e, "Restart attempt failed");
                AttemptOutcome::Unrecovered(e.to_string())
            }
            Ok(()) => match self.await_recovery(watch, service_id).await {
                Ok(Some(record)) => AttemptOutcome::Recovered(record),
                Ok(None) => {
                    warn!(service = %service_id, attempt, "Service still unhealthy after grace period");
                    AttemptOutcome::Unrecovered("still unhealthy after grace period".to_string())
                }
                Err(_) => AttemptOutcome::Aborted,
            },
        };

        if matches!(outcome, AttemptOutcome::Aborted) {
            return outcome;
        }

        let (success, recovery_time_ms, fatal, detail) = match &outcome {
            AttemptOutcome::Recovered(_) => (true, Some(started.elapsed().as_millis() as u64), false, None),
            AttemptOutcome::Fatal(reason) => (false, None, true, Some(reason.clone())),
            AttemptOutcome::Unrecovered(reason) => (false, None, false, Some(reason.clone())),
            AttemptOutcome::Aborted => (false, None, false, None),
        };
        if let Some(ms) = recovery_time_ms {
            info!(service = %service_id, attempt, recovery_ms = ms, "Service healed");
        }

        self.log.append(HealingAction {
            service_id: service_id.to_string(),
            action: HealingActionKind::Restart,
            triggered_by: trigger.clone(),
            attempt,
            started_at,
            completed_at: Utc::now(),
            success,
            recovery_time_ms,
            fatal,
            detail,
        });

        outcome
    }

    /// Re-probe until Healthy or the grace period ends. A healthy signal from
    /// the bus triggers an immediate re-probe.
    async fn await_recovery(
        &self,
        watch: &Watch,
        service_id: &str,
    ) -> Result<Option<HealthRecord>, PlaneError> {
        let grace = Duration::from_millis(self.config.grace_period_ms);
        let reprobe = Duration::from_millis(self.config.reprobe_interval_ms.max(1));
        let deadline = Instant::now() + grace;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                _ = watch.healthy.notified() => {}
                _ = tokio::time::sleep(reprobe.min(remaining)) => {}
            }

            let record = self.registry.probe(service_id).await?;
            if record.status == HealthStatus::Healthy {
                return Ok(Some(record));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.config.restart_backoff_ms.saturating_mul(factor))
    }

    async fn escalate(
        &self,
        watch: &Watch,
        trigger: &HealingTrigger,
        attempt: u32,
        reason: String,
    ) -> HealingPhase {
        let service_id = match trigger {
            HealingTrigger::Health(r) => r.service_id.clone(),
            HealingTrigger::Circuit(c) => c.service_id.clone(),
        };
        watch.set_phase(HealingPhase::Escalated);
        error!(service = %service_id, reason = %reason, "Automatic recovery abandoned, escalating");

        let now = Utc::now();
        self.log.append(HealingAction {
            service_id: service_id.clone(),
            action: HealingActionKind::Escalate,
            triggered_by: trigger.clone(),
            attempt,
            started_at: now,
            completed_at: now,
            success: false,
            recovery_time_ms: None,
            fatal: false,
            detail: Some(reason.clone()),
        });

        self.bus
            .publish_from(
                SOURCE,
                event_types::SERVICE_ESCALATED,
                json!({ "serviceId": service_id, "reason": reason, "attempt": attempt }),
            )
            .await;
        HealingPhase::Escalated
    }

    fn abort(&self, service_id: &str) -> HealingPhase {
        info!(service = %service_id, "Service deregistered mid-episode, aborting");
        self.watches.remove(service_id);
        HealingPhase::Watching
    }

    /// Record that a breaker has cut a service off.
    async fn isolate(&self, circuit: CircuitState) {
        if !self.registry.contains(&circuit.service_id) {
            return;
        }
        let service_id = circuit.service_id.clone();
        warn!(service = %service_id, failures = circuit.failure_count, "Breaker open, service isolated");

        let now = Utc::now();
        self.log.append(HealingAction {
            service_id: service_id.clone(),
            action: HealingActionKind::Isolate,
            triggered_by: HealingTrigger::Circuit(circuit),
            attempt: 1,
            started_at: now,
            completed_at: now,
            success: true,
            recovery_time_ms: None,
            fatal: false,
            detail: None,
        });

        self.bus
            .publish_from(SOURCE, event_types::SERVICE_ISOLATED, json!({ "serviceId": service_id }))
            .await;
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Most recent `limit` healing actions, oldest first.
    pub fn get_healing_history(&self, limit: usize) -> Vec<HealingAction> {
        self.log.history(limit)
    }

    pub fn get_service_history(
        &self,
        service_id: &str,
        limit: usize,
    ) -> Result<Vec<HealingAction>, PlaneError> {
        if !self.registry.contains(service_id) {
            return Err(PlaneError::UnknownService(service_id.to_string()));
        }
        Ok(self.log.history_for(service_id, limit))
    }

    pub fn service_status(&self, service_id: &str) -> Result<ServiceHealingStatus, PlaneError> {
        let watch = self
            .watch(service_id)
            .ok_or_else(|| PlaneError::UnknownService(service_id.to_string()))?;
        let mut state = watch.state.lock();
        Ok(ServiceHealingStatus {
            service_id: service_id.to_string(),
            phase: state.phase,
            restarts_in_window: state.restarts.count(Instant::now()),
            last_transition_at: state.last_transition_at,
        })
    }

    pub fn get_system_health(&self) -> SystemHealthSummary {
        let records = self.registry.records();
        let count = |status: HealthStatus| records.iter().filter(|r| r.status == status).count();
        let healthy = count(HealthStatus::Healthy);
        let total = records.len();
        let escalated = self
            .watches
            .iter()
            .filter(|w| w.value().phase() == HealingPhase::Escalated)
            .count();

        SystemHealthSummary {
            total_services: total,
            healthy,
            degraded: count(HealthStatus::Degraded),
            failed: count(HealthStatus::Failed),
            unknown: count(HealthStatus::Unknown),
            escalated,
            health_percentage: if total == 0 {
                100.0
            } else {
                healthy as f64 / total as f64 * 100.0
            },
            total_restarts: self.log.total_restarts(),
            total_healing_actions: self.log.total_actions(),
            average_recovery_time_ms: self.log.average_recovery_time_ms(),
        }
    }
}

/// Queue a wake-up without waiting. A full queue drops it.
fn wake(tx: &mpsc::Sender<Wake>, signal: Wake) -> Result<(), HandlerError> {
    match tx.try_send(signal) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            debug!(wake = ?dropped, "Wake queue full, leaving it to the next tick");
            Ok(())
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            Err(HandlerError::new("orchestrator loop stopped"))
        }
    }
}
