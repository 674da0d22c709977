//! API route definitions

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers;
use crate::ControlPlane;

pub fn api_routes(plane: ControlPlane) -> Router {
    Router::new()
        // Event bus
        .route("/api/events/publish", post(handlers::publish_event))
        .route("/api/events/history", get(handlers::get_event_history))
        .route("/api/events/types", get(handlers::get_event_types))
        // Registry
        .route("/api/services/register", post(handlers::register_service))
        .route("/api/services", get(handlers::list_services))
        .route("/api/services/:id", delete(handlers::deregister_service))
        .route("/api/services/:id/health", get(handlers::get_service_health))
        // Circuit breakers
        .route("/api/circuit", get(handlers::list_circuits))
        .route("/api/circuit/:id", get(handlers::get_circuit))
        .route("/api/circuit/:id/reset", post(handlers::reset_circuit))
        // Health & healing
        .route("/api/health", get(handlers::get_plane_health))
        .route("/api/health/system", get(handlers::get_system_health))
        .route("/api/healing/history", get(handlers::get_healing_history))
        .route("/api/healing/services/:id", get(handlers::get_healing_status))
        .route("/api/healing/services/:id/history", get(handlers::get_service_healing_history))
        .route("/api/healing/services/:id/heal", post(handlers::heal_service))
        // Analytics
        .route("/api/analytics/tasks", post(handlers::record_task))
        .route("/api/analytics/report", get(handlers::get_analytics_report))
        .route("/api/analytics/services/:id", get(handlers::get_service_performance))
        .with_state(plane)
}
