//! Structured error body for all API endpoints.
//!
//! Successful responses are the bare JSON value. Errors always use
//! [`ApiErrorResponse`]: `{ "error": { "kind": "...", "message": "..." },
//! "meta": { ... } }`, where `kind` is the error taxonomy name.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::PlaneError;

/// Metadata included in every error response.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
    pub version: &'static str,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Error detail inside [`ApiErrorResponse`].
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

/// Handler error: a [`PlaneError`] rendered as [`ApiErrorResponse`].
#[derive(Debug)]
pub struct ApiError(pub PlaneError);

pub type ApiResult<T> = Result<Json<T>, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PlaneError::UnknownService(_) => StatusCode::NOT_FOUND,
            PlaneError::DuplicateService(_) | PlaneError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PlaneError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            PlaneError::TransientProbeFailure { .. }
            | PlaneError::RestartInvocationFailure { .. }
            | PlaneError::SubscriberHandler { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PlaneError> for ApiError {
    fn from(err: PlaneError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(PlaneError::InvalidRequest(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(PlaneError::InvalidRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            debug!(kind = self.0.kind(), error = %self.0, status = status.as_u16(), "Request rejected");
        }

        let body = ApiErrorResponse {
            error: ErrorDetail {
                kind: self.0.kind().to_string(),
                message: self.0.to_string(),
            },
            meta: ResponseMeta::default(),
        };
        (status, Json(body)).into_response()
    }
}
