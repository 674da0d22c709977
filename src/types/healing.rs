//! Self-healing records: HealingAction, orchestrator phase, system summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CircuitState, HealthRecord};

/// Corrective action kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HealingActionKind {
    Restart,
    /// Traffic to the service cut off by its breaker
    Isolate,
    /// Automatic recovery abandoned; operator signal raised
    Escalate,
}

impl std::fmt::Display for HealingActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealingActionKind::Restart => write!(f, "restart"),
            HealingActionKind::Isolate => write!(f, "isolate"),
            HealingActionKind::Escalate => write!(f, "escalate"),
        }
    }
}

/// State snapshot that caused an action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "snapshot", rename_all = "camelCase")]
pub enum HealingTrigger {
    Health(HealthRecord),
    Circuit(CircuitState),
}

/// A completed corrective action. Immutable once appended to the healing log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealingAction {
    pub service_id: String,
    pub action: HealingActionKind,
    pub triggered_by: HealingTrigger,
    /// 1-based attempt number within the failure episode
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    /// Set only for successful restarts
    pub recovery_time_ms: Option<u64>,
    /// The supervisor could not be invoked at all
    #[serde(default)]
    pub fatal: bool,
    pub detail: Option<String>,
}

/// Orchestrator phase for one service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum HealingPhase {
    #[default]
    Watching,
    Degraded,
    Healing,
    Healed,
    Escalated,
}

impl std::fmt::Display for HealingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealingPhase::Watching => write!(f, "watching"),
            HealingPhase::Degraded => write!(f, "degraded"),
            HealingPhase::Healing => write!(f, "healing"),
            HealingPhase::Healed => write!(f, "healed"),
            HealingPhase::Escalated => write!(f, "escalated"),
        }
    }
}

/// Orchestrator view of one service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealingStatus {
    pub service_id: String,
    pub phase: HealingPhase,
    pub restarts_in_window: usize,
    pub last_transition_at: DateTime<Utc>,
}

/// Aggregate system health, as served by `GET /api/health/system`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealthSummary {
    pub total_services: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub failed: usize,
    pub unknown: usize,
    pub escalated: usize,
    /// Healthy share of tracked services, 0-100 (100 when nothing is tracked)
    pub health_percentage: f64,
    pub total_restarts: u64,
    pub total_healing_actions: u64,
    pub average_recovery_time_ms: f64,
}
