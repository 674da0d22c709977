//! Health Plane: service health control plane
//!
//! Watches a fleet of services, decides when they are unhealthy, and tries to
//! heal them before a human has to.
//!
//! ## Architecture
//!
//! - **Event Bus**: in-memory pub/sub with a bounded history ring
//! - **Service Registry**: tracked services, periodic probing, health records
//! - **Circuit Breaker**: per-service Closed/Open/HalfOpen fail-fast gate
//! - **Self-Healing Orchestrator**: restart, verify, escalate
//! - **Metrics Aggregator**: task outcome reports
//! - **HTTP API**: axum surface for operators and integrations

pub mod config;
pub mod types;
pub mod error;
pub mod ring;
pub mod bus;
pub mod registry;
pub mod breaker;
pub mod healing;
pub mod analytics;
pub mod api;
mod plane;

pub use config::PlaneConfig;
pub use error::{HandlerError, PlaneError, ProbeError, SupervisorError};
pub use plane::ControlPlane;

pub use types::{
    BreakerPolicy, BreakerState, CircuitState, Event, HealingAction, HealingActionKind,
    HealingPhase, HealthRecord, HealthStatus, ServiceDescriptor, SystemHealthSummary,
};

pub use bus::{EventBus, EventHandler, SubscriptionToken};
pub use registry::{HttpProber, Prober, ServiceRegistry};
pub use breaker::CircuitBreaker;
pub use healing::{Orchestrator, ProcessSupervisor, Supervisor};
pub use analytics::{MetricsAggregator, TaskMetric, TaskStatus};
