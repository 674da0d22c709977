//! Circuit breaker snapshot types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Breaker position for one service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum BreakerState {
    /// Calls pass through
    #[default]
    Closed,
    /// Calls are short-circuited until the cooldown elapses
    Open,
    /// A single trial call is allowed
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Per-service breaker policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

/// Point-in-time view of a breaker, as returned by `GetState`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CircuitState {
    pub service_id: String,
    pub state: BreakerState,
    pub opened_at: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    /// A HalfOpen trial has been granted and not yet resolved
    pub trial_in_flight: bool,
}
