//! HTTP front door for build submissions.
//!
//! This module provides a thin web server that:
//! - Validates the minimal shape of a build request
//! - Enqueues it through the submission service
//! - Returns the assigned image id
//!
//! The build itself happens later in the image generator.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    build_image, health, validate_image_config, AppState, BuildResponse, HealthResponse,
};

/// Routes served by the gateway.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/build", post(build_image))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
