//! Plane health, system health and healing log endpoints

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;

use super::LimitQuery;
use crate::api::ApiResult;
use crate::types::{HealingAction, HealingPhase, ServiceHealingStatus, SystemHealthSummary};
use crate::ControlPlane;

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Control-plane self health
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneHealth {
    pub status: &'static str,
    pub services_tracked: usize,
    pub probing: bool,
    pub version: &'static str,
}

/// GET /api/health
pub async fn get_plane_health(State(plane): State<ControlPlane>) -> Json<PlaneHealth> {
    Json(PlaneHealth {
        status: "ok",
        services_tracked: plane.registry.len(),
        probing: plane.registry.is_probing(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/health/system
pub async fn get_system_health(State(plane): State<ControlPlane>) -> Json<SystemHealthSummary> {
    Json(plane.orchestrator.get_system_health())
}

/// GET /api/healing/history?limit=
pub async fn get_healing_history(
    State(plane): State<ControlPlane>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult<Vec<HealingAction>> {
    let Query(q) = query?;
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(plane.orchestrator.get_healing_history(limit)))
}

/// GET /api/healing/services/:id
pub async fn get_healing_status(
    State(plane): State<ControlPlane>,
    Path(id): Path<String>,
) -> ApiResult<ServiceHealingStatus> {
    Ok(Json(plane.orchestrator.service_status(&id)?))
}

/// GET /api/healing/services/:id/history?limit=
pub async fn get_service_healing_history(
    State(plane): State<ControlPlane>,
    Path(id): Path<String>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult<Vec<HealingAction>> {
    let Query(q) = query?;
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(plane.orchestrator.get_service_history(&id, limit)?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealOutcome {
    pub service_id: String,
    pub phase: HealingPhase,
}

/// POST /api/healing/services/:id/heal - runs an episode now and reports
/// the phase it ended in
pub async fn heal_service(
    State(plane): State<ControlPlane>,
    Path(id): Path<String>,
) -> ApiResult<HealOutcome> {
    let phase = plane.orchestrator.heal_now(&id).await?;
    Ok(Json(HealOutcome { service_id: id, phase }))
}
