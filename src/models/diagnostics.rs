use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Member count of one open session
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SessionDiagnostics {
    pub session_key: String,
    pub n_conn: u32,
}

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub n_conn: u32,
    pub n_sessions: u32,
    pub sessions: Vec<SessionDiagnostics>,
    pub started_at: String,
    pub uptime_secs: i64,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
