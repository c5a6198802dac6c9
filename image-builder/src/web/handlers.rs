//! HTTP endpoint handlers.
//!
//! `POST /build` only validates the minimum the pipeline needs (a JSON object
//! with a non-empty `architecture`) and hands the request to the submission
//! service. The rest of the configuration is carried through untouched.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::build::{BuildRequest, SubmissionService};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SubmissionService>,
}

impl AppState {
    pub fn new(service: SubmissionService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Build Submission
// =============================================================================

/// Body of every `/build` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl BuildResponse {
    fn created(image_id: String) -> Self {
        Self {
            image_id: Some(image_id),
            error: None,
        }
    }

    fn failed(error: &'static str) -> Self {
        Self {
            image_id: None,
            error: Some(error),
        }
    }
}

/// Check the raw body and return the configuration object.
pub fn validate_image_config(body: &[u8]) -> Result<Map<String, Value>, &'static str> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err("empty_body");
    }

    let config = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(config)) => config,
        Ok(_) => return Err("not_an_object"),
        Err(_) => return Err("invalid_json"),
    };

    match config.get("architecture") {
        Some(Value::String(arch)) if !arch.trim().is_empty() => Ok(config),
        _ => Err("architecture_required"),
    }
}

/// Build submission endpoint.
///
/// Responds 201 with the assigned `imageId`, 400 for an invalid body and 500
/// when the request could not be enqueued.
pub async fn build_image(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    info!(body_length = body.len(), "build_request_http_received");

    let config = match validate_image_config(&body) {
        Ok(config) => config,
        Err(reason) => {
            warn!(reason = reason, "build_request_invalid");
            return (StatusCode::BAD_REQUEST, Json(BuildResponse::failed(reason)));
        }
    };

    match state.service.submit(BuildRequest::from_config(config)).await {
        Ok(image_id) => {
            info!(image_id = %image_id, "build_request_accepted");
            (
                StatusCode::CREATED,
                Json(BuildResponse::created(image_id.to_string())),
            )
        }
        Err(e) => {
            error!(error = %e, "build_request_submit_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(BuildResponse::failed("submission_failed")),
            )
        }
    }
}
