//! Task analytics endpoints

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::analytics::{AnalyticsReport, ServicePerformance, TaskMetric};
use crate::api::ApiResult;
use crate::ControlPlane;

/// POST /api/analytics/tasks
pub async fn record_task(
    State(plane): State<ControlPlane>,
    body: Result<Json<TaskMetric>, JsonRejection>,
) -> ApiResult<TaskMetric> {
    let Json(metric) = body?;
    plane.analytics.record_task_outcome(metric.clone())?;
    Ok(Json(metric))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub window_ms: Option<u64>,
}

/// GET /api/analytics/report?windowMs=
pub async fn get_analytics_report(
    State(plane): State<ControlPlane>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> ApiResult<AnalyticsReport> {
    let Query(q) = query?;
    Ok(Json(plane.analytics.get_report(q.window_ms)))
}

/// GET /api/analytics/services/:id
pub async fn get_service_performance(
    State(plane): State<ControlPlane>,
    Path(id): Path<String>,
) -> Json<ServicePerformance> {
    Json(plane.analytics.get_service_performance(&id))
}
