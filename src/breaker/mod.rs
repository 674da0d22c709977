//! Circuit Breaker - per-service Closed/Open/HalfOpen state machine
//!
//! ```text
//!            failures >= threshold            cooldown elapsed + Allow
//!  Closed ───────────────────────────► Open ─────────────────────────► HalfOpen
//!    ▲                                  ▲                                 │
//!    │              trial failed        │                                 │
//!    │           (breaker.reopened)     └─────────────────────────────────┤
//!    └────────────────────────────────────────────────────────────────────┘
//!                       trial succeeded (breaker.closed)
//! ```
//!
//! Each service has its own lock; every transition happens under it, and the
//! resulting bus event is published after it is released. The cooldown is
//! measured on the tokio clock so tests can drive it with paused time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{event_types, EventBus};
use crate::config::BreakerConfig;
use crate::error::{PlaneError, ProbeError};
use crate::registry::ProbeObserver;
use crate::types::{BreakerPolicy, BreakerState, CircuitState, HealthRecord, ServiceDescriptor};

const SOURCE: &str = "circuit-breaker";

struct Breaker {
    policy: BreakerPolicy,
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<DateTime<Utc>>,
    opened_instant: Option<Instant>,
    trial_in_flight: bool,
}

impl Breaker {
    fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            state: BreakerState::Closed,
            failure_count: 0,
            opened_at: None,
            opened_instant: None,
            trial_in_flight: false,
        }
    }

    fn snapshot(&self, service_id: &str) -> CircuitState {
        CircuitState {
            service_id: service_id.to_string(),
            state: self.state,
            opened_at: self.opened_at,
            failure_count: self.failure_count,
            failure_threshold: self.policy.failure_threshold,
            cooldown_ms: self.policy.cooldown_ms,
            trial_in_flight: self.trial_in_flight,
        }
    }

    fn open(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Utc::now());
        self.opened_instant = Some(Instant::now());
        self.trial_in_flight = false;
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.opened_instant = None;
        self.trial_in_flight = false;
    }

    fn cooldown_elapsed(&self) -> bool {
        let cooldown = Duration::from_millis(self.policy.cooldown_ms);
        self.opened_instant
            .map_or(true, |opened| opened.elapsed() >= cooldown)
    }

    /// Returns (allowed, transition event)
    fn allow(&mut self) -> (bool, Option<&'static str>) {
        match self.state {
            BreakerState::Closed => (true, None),
            BreakerState::Open => {
                if self.cooldown_elapsed() {
                    self.state = BreakerState::HalfOpen;
                    self.trial_in_flight = true;
                    (true, Some(event_types::BREAKER_HALF_OPEN))
                } else {
                    (false, None)
                }
            }
            BreakerState::HalfOpen => {
                if self.trial_in_flight {
                    (false, None)
                } else {
                    self.trial_in_flight = true;
                    (true, None)
                }
            }
        }
    }

    fn record_failure(&mut self) -> Option<&'static str> {
        self.failure_count = self.failure_count.saturating_add(1);
        match self.state {
            BreakerState::Closed if self.failure_count >= self.policy.failure_threshold => {
                self.open();
                Some(event_types::BREAKER_OPENED)
            }
            BreakerState::Closed | BreakerState::Open => None,
            BreakerState::HalfOpen => {
                self.open();
                Some(event_types::BREAKER_REOPENED)
            }
        }
    }

    fn record_success(&mut self) -> Option<&'static str> {
        match self.state {
            BreakerState::Closed => {
                self.failure_count = 0;
                None
            }
            // Short-circuited: nothing passed through, nothing to learn.
            BreakerState::Open => None,
            BreakerState::HalfOpen => {
                self.close();
                Some(event_types::BREAKER_CLOSED)
            }
        }
    }
}

/// Circuit breakers for all tracked services.
pub struct CircuitBreaker {
    breakers: DashMap<String, Arc<Mutex<Breaker>>>,
    defaults: BreakerPolicy,
    bus: Arc<EventBus>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig, bus: Arc<EventBus>) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults: BreakerPolicy {
                failure_threshold: config.failure_threshold.max(1),
                cooldown_ms: config.cooldown_ms,
            },
            bus,
        }
    }

    /// Policy for a descriptor: per-service overrides, else plane defaults.
    pub fn policy_for(&self, descriptor: &ServiceDescriptor) -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: descriptor
                .breaker_threshold
                .unwrap_or(self.defaults.failure_threshold)
                .max(1),
            cooldown_ms: descriptor.breaker_cooldown_ms.unwrap_or(self.defaults.cooldown_ms),
        }
    }

    /// Start tracking a service with a Closed breaker. No-op if tracked.
    pub fn track(&self, descriptor: &ServiceDescriptor) {
        self.track_with_policy(&descriptor.id, self.policy_for(descriptor));
    }

    pub fn track_with_policy(&self, service_id: &str, policy: BreakerPolicy) {
        self.breakers
            .entry(service_id.to_string())
            .or_insert_with(|| {
                debug!(
                    service = %service_id,
                    threshold = policy.failure_threshold,
                    cooldown_ms = policy.cooldown_ms,
                    "Breaker tracked"
                );
                Arc::new(Mutex::new(Breaker::new(BreakerPolicy {
                    failure_threshold: policy.failure_threshold.max(1),
                    ..policy
                })))
            });
    }

    /// Drop a service's breaker entirely.
    pub fn untrack(&self, service_id: &str) -> bool {
        self.breakers.remove(service_id).is_some()
    }

    pub fn is_tracked(&self, service_id: &str) -> bool {
        self.breakers.contains_key(service_id)
    }

    fn cell(&self, service_id: &str) -> Result<Arc<Mutex<Breaker>>, PlaneError> {
        self.breakers
            .get(service_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| PlaneError::UnknownService(service_id.to_string()))
    }

    /// Whether a call to the service may proceed.
    ///
    /// An Open breaker whose cooldown has elapsed moves to HalfOpen and grants
    /// exactly one trial; further calls are refused until the trial resolves.
    pub async fn allow(&self, service_id: &str) -> Result<bool, PlaneError> {
        let cell = self.cell(service_id)?;
        let (allowed, transition, snapshot) = {
            let mut breaker = cell.lock();
            let (allowed, transition) = breaker.allow();
            (allowed, transition, breaker.snapshot(service_id))
        };
        if let Some(event_type) = transition {
            info!(service = %service_id, "Breaker half-open, trial granted");
            self.announce(event_type, snapshot).await;
        }
        Ok(allowed)
    }

    pub async fn record_failure(&self, service_id: &str) -> Result<CircuitState, PlaneError> {
        let cell = self.cell(service_id)?;
        let (transition, snapshot) = {
            let mut breaker = cell.lock();
            let transition = breaker.record_failure();
            (transition, breaker.snapshot(service_id))
        };
        if let Some(event_type) = transition {
            warn!(
                service = %service_id,
                failures = snapshot.failure_count,
                cooldown_ms = snapshot.cooldown_ms,
                "Breaker {}",
                if event_type == event_types::BREAKER_OPENED { "opened" } else { "reopened" }
            );
            self.announce(event_type, snapshot.clone()).await;
        }
        Ok(snapshot)
    }

    pub async fn record_success(&self, service_id: &str) -> Result<CircuitState, PlaneError> {
        let cell = self.cell(service_id)?;
        let (transition, snapshot) = {
            let mut breaker = cell.lock();
            let transition = breaker.record_success();
            (transition, breaker.snapshot(service_id))
        };
        if let Some(event_type) = transition {
            info!(service = %service_id, "Breaker closed after successful trial");
            self.announce(event_type, snapshot.clone()).await;
        }
        Ok(snapshot)
    }

    pub fn get_state(&self, service_id: &str) -> Result<CircuitState, PlaneError> {
        self.cell(service_id).map(|c| c.lock().snapshot(service_id))
    }

    /// All breakers, sorted by service id.
    pub fn list(&self) -> Vec<CircuitState> {
        let cells: Vec<(String, Arc<Mutex<Breaker>>)> = self
            .breakers
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        let mut out: Vec<CircuitState> = cells
            .iter()
            .map(|(id, cell)| cell.lock().snapshot(id))
            .collect();
        out.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        out
    }

    /// Force-close a breaker. Returns false if the service is not tracked.
    pub async fn reset(&self, service_id: &str) -> bool {
        let Ok(cell) = self.cell(service_id) else {
            return false;
        };
        let (previous, snapshot) = {
            let mut breaker = cell.lock();
            let previous = breaker.state;
            breaker.close();
            (previous, breaker.snapshot(service_id))
        };
        info!(service = %service_id, from = %previous, "Breaker reset");
        self.announce(event_types::BREAKER_RESET, snapshot).await;
        true
    }

    async fn announce(&self, event_type: &str, snapshot: CircuitState) {
        self.bus
            .publish_from(
                SOURCE,
                event_type,
                json!({
                    "serviceId": snapshot.service_id,
                    "state": snapshot.state,
                    "circuit": snapshot,
                }),
            )
            .await;
    }
}

/// Probe outcomes drive the breakers. While Open, probes are short-circuited
/// until the cooldown elapses; the first probe after it is the HalfOpen trial.
#[async_trait]
impl ProbeObserver for CircuitBreaker {
    async fn on_registered(&self, descriptor: &ServiceDescriptor) {
        self.track(descriptor);
    }

    async fn on_probe(&self, record: &HealthRecord, outcome: &Result<Duration, ProbeError>) {
        let id = record.service_id.as_str();
        match self.allow(id).await {
            Ok(true) => {}
            Ok(false) | Err(_) => return,
        }
        let result = match outcome {
            Ok(_) => self.record_success(id).await,
            Err(_) => self.record_failure(id).await,
        };
        if let Err(e) = result {
            debug!(error = %e, "Probe outcome for untracked breaker");
        }
    }

    async fn on_deregistered(&self, service_id: &str) {
        self.untrack(service_id);
    }
}
