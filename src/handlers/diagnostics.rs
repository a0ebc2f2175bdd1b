use crate::{models::{DiagnosticsResponse, ErrorResponse, SessionDiagnostics}, AppState};
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::sync::Arc;
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::{error, info};

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Counts are reported as u32; anything larger is pinned at u32::MAX
pub(crate) fn saturating_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Report open sessions, connections and process load
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {

    // Aggregate diagnostics from the hub
    let snapshot = match state.hub.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("Failed to snapshot session hub: {}", e);
            let status = StatusCode::SERVICE_UNAVAILABLE;
            return Err((
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: e.to_string(),
                }),
            ));
        }
    };
    let n_conn = saturating_u32(snapshot.connection_count());
    let n_sessions = saturating_u32(snapshot.session_count());
    let sessions = snapshot
        .sessions
        .iter()
        .map(|(session_key, members)| SessionDiagnostics {
            session_key: session_key.clone(),
            n_conn: saturating_u32(members.len()),
        })
        .collect();

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    let uptime_secs = (Utc::now() - state.started_at).num_seconds();

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Sessions: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        n_sessions
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn,
            n_sessions,
            sessions,
            started_at: state.started_at.to_rfc3339(),
            uptime_secs,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
