use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::{debug, error};

use crate::handlers::diagnostics::saturating_u32;
use crate::models::{ErrorResponse, HealthResponse, ReadyResponse};
use crate::AppState;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint, ready once the session hub answers
pub async fn ready_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadyResponse>, (StatusCode, Json<ErrorResponse>)> {
    debug!("Readiness check requested");
    match state.hub.snapshot().await {
        Ok(snapshot) => Ok(Json(ReadyResponse {
            status: "ok".to_string(),
            message: "Service is ready".to_string(),
            n_sessions: saturating_u32(snapshot.session_count()),
        })),
        Err(e) => {
            error!("Readiness check failed: {}", e);
            let status = StatusCode::SERVICE_UNAVAILABLE;
            Err((
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: e.to_string(),
                }),
            ))
        }
    }
}
