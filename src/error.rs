//! Error taxonomy for the control plane.
//!
//! Every failure that crosses a component boundary is expressed as a
//! [`PlaneError`]. The HTTP layer maps each variant to a status code and
//! reports [`PlaneError::kind`] in the error body, so operators see the same
//! names in logs and API responses.

use std::time::Duration;
use thiserror::Error;

/// Control-plane error taxonomy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaneError {
    /// Probe timed out or the connection was refused. Retried per policy.
    #[error("probe of {service_id} failed: {reason}")]
    TransientProbeFailure { service_id: String, reason: String },

    /// The external supervisor could not be reached at all.
    #[error("restart of {service_id} could not be invoked: {reason}")]
    RestartInvocationFailure { service_id: String, reason: String },

    /// Restart quota for the sliding window is exhausted.
    #[error("restart quota exhausted for {service_id}: {restarts} restarts within {window_ms}ms")]
    RateLimitExceeded {
        service_id: String,
        restarts: usize,
        window_ms: u64,
    },

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("service already registered: {0}")]
    DuplicateService(String),

    /// A bus subscriber failed. Never propagated to the publisher.
    #[error("subscriber {subscriber} failed on {event_type}: {reason}")]
    SubscriberHandler {
        subscriber: String,
        event_type: String,
        reason: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PlaneError {
    /// Stable taxonomy name reported in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PlaneError::TransientProbeFailure { .. } => "TransientProbeFailure",
            PlaneError::RestartInvocationFailure { .. } => "RestartInvocationFailure",
            PlaneError::RateLimitExceeded { .. } => "RateLimitExceeded",
            PlaneError::UnknownService(_) => "UnknownServiceError",
            PlaneError::DuplicateService(_) => "DuplicateServiceError",
            PlaneError::SubscriberHandler { .. } => "SubscriberHandlerError",
            PlaneError::InvalidRequest(_) => "InvalidRequest",
        }
    }
}

/// Outcome of a single failed liveness probe
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unhealthy response: {0}")]
    Unhealthy(String),
}

impl ProbeError {
    /// Timeouts skip the consecutive-failure ladder and mark the service failed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeError::Timeout(_))
    }

    pub fn into_plane_error(self, service_id: &str) -> PlaneError {
        PlaneError::TransientProbeFailure {
            service_id: service_id.to_string(),
            reason: self.to_string(),
        }
    }
}

/// Outcome of a failed restart invocation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorError {
    /// Supervisor unreachable: the restart could not be issued at all. Fatal.
    #[error("supervisor unreachable: {0}")]
    Unreachable(String),

    /// Restart was issued but reported failure. Recoverable.
    #[error("restart command failed: {0}")]
    CommandFailed(String),

    #[error("restart command timed out after {0:?}")]
    Timeout(Duration),
}

impl SupervisorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SupervisorError::Unreachable(_))
    }
}

/// Failure reported by a bus subscriber
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
