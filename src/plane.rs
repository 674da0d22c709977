//! Component wiring
//!
//! Builds the five components around one shared bus and connects them:
//! registry probe outcomes feed the breaker directly, everything else
//! travels as bus events.

use std::sync::Arc;
use tracing::info;

use crate::analytics::MetricsAggregator;
use crate::breaker::CircuitBreaker;
use crate::bus::EventBus;
use crate::config::PlaneConfig;
use crate::error::PlaneError;
use crate::healing::{Orchestrator, ProcessSupervisor, Supervisor};
use crate::registry::{HttpProber, ProbeObserver, Prober, ServiceRegistry};

/// A fully wired control plane. Cheap to clone.
#[derive(Clone)]
pub struct ControlPlane {
    pub config: Arc<PlaneConfig>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<ServiceRegistry>,
    pub breaker: Arc<CircuitBreaker>,
    pub orchestrator: Arc<Orchestrator>,
    pub analytics: Arc<MetricsAggregator>,
}

impl ControlPlane {
    /// Wire the plane with explicit probe and restart transports.
    pub fn new(config: PlaneConfig, prober: Arc<dyn Prober>, supervisor: Arc<dyn Supervisor>) -> Self {
        let bus = Arc::new(EventBus::new(&config.bus));

        let registry = Arc::new(ServiceRegistry::new(config.probe.clone(), Arc::clone(&bus), prober));
        let breaker = Arc::new(CircuitBreaker::new(&config.breaker, Arc::clone(&bus)));
        registry.add_observer(Arc::clone(&breaker) as Arc<dyn ProbeObserver>);

        let orchestrator = Arc::new(Orchestrator::new(
            config.healing.clone(),
            Arc::clone(&registry),
            Arc::clone(&breaker),
            Arc::clone(&bus),
            supervisor,
        ));
        orchestrator.attach();

        let analytics = Arc::new(MetricsAggregator::new(&config.analytics));
        analytics.attach(&bus);

        Self {
            config: Arc::new(config),
            bus,
            registry,
            breaker,
            orchestrator,
            analytics,
        }
    }

    /// Wire the plane with the HTTP prober and the process supervisor.
    pub fn with_default_transports(config: PlaneConfig) -> Result<Self, reqwest::Error> {
        let prober = HttpProber::new(config.probe.timeout())?;
        Ok(Self::new(config, Arc::new(prober), Arc::new(ProcessSupervisor::new())))
    }

    /// Register the services listed in the configuration.
    pub async fn register_configured_services(&self) -> Result<usize, PlaneError> {
        for descriptor in &self.config.services {
            self.registry.register(descriptor.clone()).await?;
        }
        if !self.config.services.is_empty() {
            info!(count = self.config.services.len(), "Configured services registered");
        }
        Ok(self.config.services.len())
    }
}
