use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Session hub is running", body = ReadyResponse),
        (status = 503, description = "Session hub is not running", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Sessions, connections and process load
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Current diagnostics", body = DiagnosticsResponse),
        (status = 503, description = "Session hub is not running", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Join a collaboration session over WebSocket.
///
/// Frames are JSON envelopes `{kind, sessionKey, userID, payload}`; the server
/// overwrites `sessionKey` and `userID` and relays the envelope to every
/// member of the session, the sender included.
#[utoipa::path(
    get,
    path = "/ws/{session_key}",
    params(
        ("session_key" = String, Path, description = "Document the session belongs to"),
        ("user_id" = String, Query, description = "Authenticated user id")
    ),
    responses(
        (status = 101, description = "Switching to the WebSocket protocol")
    )
)]
#[allow(dead_code)]
pub async fn websocket_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        websocket_doc,
    ),
    components(
        schemas(HealthResponse, ReadyResponse, DiagnosticsResponse, SessionDiagnostics, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
