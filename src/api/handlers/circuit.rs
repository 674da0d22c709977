//! Circuit breaker endpoints

use axum::extract::{Path, State};
use axum::Json;

use crate::api::ApiResult;
use crate::types::CircuitState;
use crate::ControlPlane;

/// GET /api/circuit
pub async fn list_circuits(State(plane): State<ControlPlane>) -> Json<Vec<CircuitState>> {
    Json(plane.breaker.list())
}

/// GET /api/circuit/:id
pub async fn get_circuit(
    State(plane): State<ControlPlane>,
    Path(id): Path<String>,
) -> ApiResult<CircuitState> {
    Ok(Json(plane.breaker.get_state(&id)?))
}

/// POST /api/circuit/:id/reset
pub async fn reset_circuit(State(plane): State<ControlPlane>, Path(id): Path<String>) -> Json<bool> {
    Json(plane.breaker.reset(&id).await)
}
