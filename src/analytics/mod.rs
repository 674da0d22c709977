//! Metrics/Analytics Aggregator - task outcome series and derived reports
//!
//! Holds a capped, lossy series of task outcomes fed by direct calls and by
//! `task.completed` / `task.failed` bus events. Reports are recomputed from
//! the series on every call; nothing here is authoritative.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::bus::{event_types, EventBus, SubscriptionToken};
use crate::config::AnalyticsConfig;
use crate::error::{HandlerError, PlaneError};
use crate::ring::RingBuffer;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// One task outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetric {
    pub task_id: String,
    pub service_id: String,
    pub status: TaskStatus,
    pub duration_ms: u64,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBreakdown {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    /// None when the report covers the whole retained series
    pub window_ms: Option<u64>,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub avg_duration: f64,
    pub by_service: BTreeMap<String, ServiceBreakdown>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePerformance {
    pub service_id: String,
    pub total_tasks: usize,
    /// Completed share, 0.0-1.0 (0 when there are no tasks)
    pub success_rate: f64,
    pub avg_duration: f64,
}

pub struct MetricsAggregator {
    series: Mutex<RingBuffer<TaskMetric>>,
}

impl MetricsAggregator {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            series: Mutex::new(RingBuffer::new(config.max_entries)),
        }
    }

    /// Feed `task.completed` / `task.failed` events into the series.
    /// The event type decides the status, whatever the payload says.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<SubscriptionToken> {
        [
            (event_types::TASK_COMPLETED, TaskStatus::Completed),
            (event_types::TASK_FAILED, TaskStatus::Failed),
        ]
        .into_iter()
        .map(|(event_type, status)| {
            let aggregator = Arc::clone(self);
            bus.subscribe_fn(event_type, "metrics-aggregator", move |event| {
                let mut metric = serde_json::from_value::<TaskMetric>(
                    with_status(event.payload.clone(), status),
                )
                .map_err(|e| HandlerError::new(format!("malformed task payload: {e}")))?;
                metric.status = status;
                aggregator
                    .record_task_outcome(metric)
                    .map_err(|e| HandlerError::new(e.to_string()))
            })
        })
        .collect()
    }

    pub fn record_task_outcome(&self, metric: TaskMetric) -> Result<(), PlaneError> {
        if metric.service_id.trim().is_empty() {
            return Err(PlaneError::InvalidRequest("task metric has no serviceId".into()));
        }
        debug!(
            task = %metric.task_id,
            service = %metric.service_id,
            status = ?metric.status,
            duration_ms = metric.duration_ms,
            "Task outcome recorded"
        );
        self.series.lock().push(metric);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.series.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.lock().is_empty()
    }

    /// Summary over the last `window_ms`, or the whole series when `None`.
    pub fn get_report(&self, window_ms: Option<u64>) -> AnalyticsReport {
        // A window reaching past the representable range covers everything
        let cutoff = window_ms
            .and_then(|ms| i64::try_from(ms).ok())
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|span| Utc::now().checked_sub_signed(span));

        let series = self.series.lock();
        let in_window: Vec<&TaskMetric> = series
            .iter()
            .filter(|m| cutoff.map_or(true, |c| m.recorded_at >= c))
            .collect();

        let mut by_service: BTreeMap<String, ServiceBreakdown> = BTreeMap::new();
        let mut duration_sums: BTreeMap<&str, u64> = BTreeMap::new();
        for m in &in_window {
            let entry = by_service.entry(m.service_id.clone()).or_default();
            entry.total += 1;
            match m.status {
                TaskStatus::Completed => entry.completed += 1,
                TaskStatus::Failed => entry.failed += 1,
            }
            *duration_sums.entry(m.service_id.as_str()).or_default() += m.duration_ms;
        }
        for (id, breakdown) in &mut by_service {
            let sum = duration_sums.get(id.as_str()).copied().unwrap_or(0);
            breakdown.avg_duration = mean(sum, breakdown.total);
        }

        let total = in_window.len();
        let completed = in_window.iter().filter(|m| m.status == TaskStatus::Completed).count();
        let duration_total: u64 = in_window.iter().map(|m| m.duration_ms).sum();

        AnalyticsReport {
            window_ms,
            total,
            completed,
            failed: total - completed,
            avg_duration: mean(duration_total, total),
            by_service,
        }
    }

    pub fn get_service_performance(&self, service_id: &str) -> ServicePerformance {
        let series = self.series.lock();
        let (total, completed, duration) = series
            .iter()
            .filter(|m| m.service_id == service_id)
            .fold((0usize, 0usize, 0u64), |(t, c, d), m| {
                (t + 1, c + usize::from(m.status == TaskStatus::Completed), d + m.duration_ms)
            });

        ServicePerformance {
            service_id: service_id.to_string(),
            total_tasks: total,
            success_rate: if total == 0 { 0.0 } else { completed as f64 / total as f64 },
            avg_duration: mean(duration, total),
        }
    }
}

fn mean(sum: u64, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        sum as f64 / n as f64
    }
}

fn with_status(mut payload: serde_json::Value, status: TaskStatus) -> serde_json::Value {
    if let Some(obj) = payload.as_object_mut() {
        obj.entry("status")
            .or_insert_with(|| serde_json::to_value(status).unwrap_or_default());
    }
    payload
}
