//! Service identity and liveness: ServiceDescriptor, HealthStatus, HealthRecord

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Service Descriptor
// ============================================================================

/// Identity and policy for one supervised service.
///
/// Created at registration, replaced only by re-registration, removed on
/// deregistration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub id: String,

    #[serde(default)]
    pub display_name: String,

    /// Address queried for liveness
    pub probe_endpoint: String,

    /// Probe cadence; the plane's `probe.interval_ms` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_interval_ms: Option<u64>,

    /// Opaque handle passed to the external supervisor
    #[serde(default)]
    pub restart_command: String,

    /// Restart quota per sliding window; the healing default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts_per_window: Option<u32>,

    /// Consecutive probe failures before `Failed`; plane default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker_threshold: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker_cooldown_ms: Option<u64>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Ids of services this one depends on (informational)
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ServiceDescriptor {
    /// Descriptor with default policy; mostly useful for tests and tooling.
    pub fn new(id: impl Into<String>, probe_endpoint: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            probe_endpoint: probe_endpoint.into(),
            probe_interval_ms: None,
            restart_command: String::new(),
            max_restarts_per_window: None,
            failure_threshold: None,
            breaker_threshold: None,
            breaker_cooldown_ms: None,
            tags: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_restart_command(mut self, command: impl Into<String>) -> Self {
        self.restart_command = command.into();
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn with_max_restarts(mut self, max: u32) -> Self {
        self.max_restarts_per_window = Some(max);
        self
    }

    pub fn with_probe_interval_ms(mut self, ms: u64) -> Self {
        self.probe_interval_ms = Some(ms);
        self
    }

    /// Effective probe cadence given the plane-wide default.
    pub fn probe_interval(&self, default_ms: u64) -> Duration {
        Duration::from_millis(self.probe_interval_ms.unwrap_or(default_ms).max(1))
    }
}

// ============================================================================
// Health Status
// ============================================================================

/// Liveness classification of a service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum HealthStatus {
    Healthy,
    /// 1 to (threshold - 1) consecutive probe failures
    Degraded,
    /// Threshold reached, or a probe timed out
    Failed,
    /// No probe has completed yet
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Bus event type announcing a transition into this status.
    pub fn event_type(self) -> &'static str {
        match self {
            HealthStatus::Healthy => crate::bus::event_types::SERVICE_HEALTHY,
            HealthStatus::Degraded => crate::bus::event_types::SERVICE_DEGRADED,
            HealthStatus::Failed => crate::bus::event_types::SERVICE_FAILED,
            HealthStatus::Unknown => crate::bus::event_types::SERVICE_UNKNOWN,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Failed => write!(f, "failed"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

// ============================================================================
// Health Record
// ============================================================================

/// Latest known state of a service. Overwritten in place by every probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub service_id: String,
    pub status: HealthStatus,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Mean latency over successful probes
    pub average_latency_ms: f64,
    pub total_probes: u64,
    pub successful_probes: u64,
    pub last_error: Option<String>,
}

impl HealthRecord {
    pub fn unknown(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            status: HealthStatus::Unknown,
            last_probe_at: None,
            last_success_at: None,
            consecutive_failures: 0,
            average_latency_ms: 0.0,
            total_probes: 0,
            successful_probes: 0,
            last_error: None,
        }
    }

    /// Fold a successful probe into the record.
    pub fn record_success(&mut self, latency: Duration, at: DateTime<Utc>) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.successful_probes += 1;
        self.total_probes += 1;
        self.average_latency_ms +=
            (latency_ms - self.average_latency_ms) / self.successful_probes as f64;
        self.consecutive_failures = 0;
        self.last_probe_at = Some(at);
        self.last_success_at = Some(at);
        self.last_error = None;
        self.status = HealthStatus::Healthy;
    }

    /// Fold a failed probe into the record.
    ///
    /// A timeout fails the service immediately; other failures climb the
    /// Degraded ladder until `failure_threshold` consecutive failures.
    pub fn record_failure(
        &mut self,
        error: &crate::error::ProbeError,
        failure_threshold: u32,
        at: DateTime<Utc>,
    ) {
        self.total_probes += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_probe_at = Some(at);
        self.last_error = Some(error.to_string());
        self.status = if error.is_timeout() || self.consecutive_failures >= failure_threshold {
            HealthStatus::Failed
        } else {
            HealthStatus::Degraded
        };
    }
}
