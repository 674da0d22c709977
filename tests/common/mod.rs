//! Shared fixtures for the integration tests: a scripted prober, a counting
//! supervisor and a plane builder with short healing timings.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use health_plane::config::HealingConfig;
use health_plane::{ControlPlane, PlaneConfig, ProbeError, Prober, ServiceDescriptor, Supervisor, SupervisorError};

/// Probe outcome per service; services never scripted are up.
#[derive(Default)]
pub struct ScriptedProber {
    up: Mutex<HashMap<String, bool>>,
    pub calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn set_up(&self, service_id: &str, up: bool) {
        self.up.lock().insert(service_id.to_string(), up);
    }

    pub fn is_up(&self, service_id: &str) -> bool {
        self.up.lock().get(service_id).copied().unwrap_or(true)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, descriptor: &ServiceDescriptor) -> Result<Duration, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_up(&descriptor.id) {
            Ok(Duration::from_millis(5))
        } else {
            Err(ProbeError::Connection("connection refused".into()))
        }
    }
}

/// Counts restarts; optionally brings the service back up on the prober.
pub struct CountingSupervisor {
    prober: Arc<ScriptedProber>,
    revive: bool,
    pub calls: AtomicUsize,
}

impl CountingSupervisor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Supervisor for CountingSupervisor {
    async fn restart(&self, descriptor: &ServiceDescriptor) -> Result<(), SupervisorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.revive {
            self.prober.set_up(&descriptor.id, true);
        }
        Ok(())
    }
}

pub struct TestPlane {
    pub plane: ControlPlane,
    pub prober: Arc<ScriptedProber>,
    pub supervisor: Arc<CountingSupervisor>,
}

/// Default config with a healing loop short enough for paused-time tests.
pub fn fast_config() -> PlaneConfig {
    PlaneConfig {
        healing: HealingConfig {
            tick_ms: 200,
            grace_period_ms: 2_000,
            reprobe_interval_ms: 250,
            restart_backoff_ms: 100,
            ..HealingConfig::default()
        },
        ..PlaneConfig::default()
    }
}

pub fn test_plane(config: PlaneConfig, revive: bool) -> TestPlane {
    let prober = Arc::new(ScriptedProber::default());
    let supervisor = Arc::new(CountingSupervisor {
        prober: Arc::clone(&prober),
        revive,
        calls: AtomicUsize::new(0),
    });
    let plane = ControlPlane::new(
        config,
        Arc::clone(&prober) as Arc<dyn Prober>,
        Arc::clone(&supervisor) as Arc<dyn Supervisor>,
    );
    TestPlane { plane, prober, supervisor }
}

/// Poll `cond` every 50ms of (virtual) time, up to `max` polls.
pub async fn wait_until<F: Fn() -> bool>(cond: F, max: usize) -> bool {
    for _ in 0..max {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}
