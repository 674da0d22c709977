//! REST API module using Axum
//!
//! Operator and integration surface over the control plane:
//! - /api/events/*   publish, history, subscriber counts
//! - /api/services/* registration and health records
//! - /api/circuit/*  breaker state and reset
//! - /api/healing/*  healing log and per-service phase
//! - /api/health, /api/health/system
//! - /api/analytics/* task outcome reports

pub mod envelope;
pub mod handlers;
mod routes;

pub use envelope::{ApiError, ApiResult};

use axum::http::{header, Method};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::ControlPlane;

/// Largest accepted request body (descriptors and events are small)
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build a CORS layer that is restrictive by default (same-origin only).
///
/// Set `PLANE_CORS_ORIGINS` to a comma-separated list of allowed origins
/// to let browser-based tooling on other origins call the API.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    match std::env::var("PLANE_CORS_ORIGINS") {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the complete application router.
pub fn create_app(plane: ControlPlane) -> Router {
    routes::api_routes(plane)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer())
}
