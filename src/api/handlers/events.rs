//! Event bus endpoints

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::{ApiError, ApiResult};
use crate::error::PlaneError;
use crate::types::{Event, EventTypeSummary};
use crate::ControlPlane;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Source component recorded on the event; "http-api" when absent
    pub source: Option<String>,
}

/// POST /api/events/publish
pub async fn publish_event(
    State(plane): State<ControlPlane>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> ApiResult<Event> {
    let Json(req) = body?;
    if req.event_type.trim().is_empty() {
        return Err(ApiError(PlaneError::InvalidRequest("event type must not be empty".into())));
    }
    let source = req.source.as_deref().unwrap_or("http-api");
    let event = plane.bus.publish_from(source, &req.event_type, req.payload).await;
    Ok(Json(event))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    /// Only events of exactly this type
    #[serde(rename = "type")]
    pub event_type: Option<String>,
}

/// GET /api/events/history?limit=&type=
pub async fn get_event_history(
    State(plane): State<ControlPlane>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Vec<Event>> {
    let Query(q) = query?;
    let limit = q.limit.unwrap_or_else(|| plane.bus.history_capacity());
    let events = match q.event_type.as_deref() {
        Some(t) => plane.bus.history_by_type(t, limit),
        None => plane.bus.history(limit),
    };
    Ok(Json(events))
}

/// GET /api/events/types
pub async fn get_event_types(State(plane): State<ControlPlane>) -> Json<Vec<EventTypeSummary>> {
    Json(plane.bus.event_types())
}
