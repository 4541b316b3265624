//! REST API handlers.
//!
//! Each handler calls into `JobService` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use linkcheck_engine::{Capacity, EngineError};
use linkcheck_state::SettingsPatch;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Map an engine error onto an HTTP status.
pub(crate) fn engine_error_response(e: &EngineError) -> Response {
    let status = match e {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::CapacityExceeded(Capacity::TooManyUrls { .. }) => StatusCode::BAD_REQUEST,
        EngineError::CapacityExceeded(Capacity::Storage(_)) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::State(s) if s.is_storage_failure() => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::State(_) | EngineError::Probe(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, %status, "request failed");
    }
    error_response(&e.to_string(), status)
}

// ── Jobs ───────────────────────────────────────────────────────

/// Job creation request body.
#[derive(serde::Deserialize)]
pub struct CreateJobRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub failure_match_texts: Vec<String>,
}

/// GET /api/v1/accounts/{owner}/jobs
pub async fn list_jobs(
    State(state): State<ApiState>,
    Path(owner): Path<String>,
) -> impl IntoResponse {
    match state.service.list(&owner) {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

/// POST /api/v1/accounts/{owner}/jobs
pub async fn create_job(
    State(state): State<ApiState>,
    Path(owner): Path<String>,
    Json(req): Json<CreateJobRequest>,
) -> impl IntoResponse {
    if req.urls.is_empty() {
        return error_response("urls must not be empty", StatusCode::BAD_REQUEST);
    }
    match state
        .service
        .create_job(&owner, req.urls, req.failure_match_texts)
        .await
    {
        Ok(job_id) => (StatusCode::CREATED, ApiResponse::ok(vec![job_id])).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

/// GET /api/v1/accounts/{owner}/jobs/{id}
pub async fn get_job(
    State(state): State<ApiState>,
    Path((owner, id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.service.detail(&owner, &id) {
        Ok(detail) => ApiResponse::ok(detail).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

/// DELETE /api/v1/accounts/{owner}/jobs/{id}
pub async fn delete_job(
    State(state): State<ApiState>,
    Path((owner, id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.service.delete(&owner, &id) {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => engine_error_response(&e),
    }
}

// ── Settings ───────────────────────────────────────────────────

/// GET /api/v1/settings
pub async fn get_settings(State(state): State<ApiState>) -> impl IntoResponse {
    match state.service.get_settings() {
        Ok(settings) => ApiResponse::ok(settings).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

/// PUT /api/v1/settings
pub async fn update_settings(
    State(state): State<ApiState>,
    Json(patch): Json<SettingsPatch>,
) -> impl IntoResponse {
    match state.service.update_settings(&patch) {
        Ok(settings) => ApiResponse::ok(settings).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}
