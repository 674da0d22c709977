//! Registry endpoints

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::ApiResult;
use crate::types::{HealthRecord, ServiceDescriptor};
use crate::ControlPlane;

/// POST /api/services/register - 400 on duplicate id
pub async fn register_service(
    State(plane): State<ControlPlane>,
    body: Result<Json<ServiceDescriptor>, JsonRejection>,
) -> ApiResult<ServiceDescriptor> {
    let Json(descriptor) = body?;
    let registered = plane.registry.register(descriptor).await?;
    Ok(Json(registered))
}

/// DELETE /api/services/:id - false when the id was not registered
pub async fn deregister_service(
    State(plane): State<ControlPlane>,
    Path(id): Path<String>,
) -> Json<bool> {
    Json(plane.registry.deregister(&id).await)
}

/// GET /api/services
pub async fn list_services(State(plane): State<ControlPlane>) -> Json<Vec<ServiceDescriptor>> {
    Json(plane.registry.descriptors())
}

#[derive(Debug, Default, Deserialize)]
pub struct HealthQuery {
    /// Return the last record without probing
    #[serde(default)]
    pub cached: bool,
}

/// GET /api/services/:id/health?cached=
pub async fn get_service_health(
    State(plane): State<ControlPlane>,
    Path(id): Path<String>,
    query: Result<Query<HealthQuery>, QueryRejection>,
) -> ApiResult<HealthRecord> {
    let Query(q) = query?;
    let record = if q.cached {
        plane.registry.get_record(&id)?
    } else {
        plane.registry.probe(&id).await?
    };
    Ok(Json(record))
}
