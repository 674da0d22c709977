//! Shared data structures for the service health control plane
//!
//! - ServiceDescriptor / HealthRecord: identity and liveness (owned by the registry)
//! - CircuitState: per-service breaker snapshot (owned by the breaker)
//! - Event: immutable bus fact
//! - HealingAction: corrective action record (owned by the orchestrator)

mod service;
mod circuit;
mod event;
mod healing;

pub use service::*;
pub use circuit::*;
pub use event::*;
pub use healing::*;
