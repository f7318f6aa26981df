//! Health check endpoints.

use axum::{Json, http::StatusCode};
use serde::Serialize;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

/// Liveness check. Returns 200 while the process is running; does not
/// verify dependencies.
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,
}

/// Readiness check. The store pool is established before the server
/// starts listening, so reaching this handler means the service can
/// take traffic.
pub async fn readiness_check() -> (StatusCode, Json<ReadinessResponse>) {
    (StatusCode::OK, Json(ReadinessResponse { ready: true }))
}
