use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::ws::connection::Connection;
use crate::AppState;

/// Identity resolved upstream and passed along on the upgrade request
#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default, alias = "userID")]
    pub user_id: String,
}

/// Upgrade `GET /ws/:session_key?user_id=...` and attach the socket to its session
pub async fn websocket_handler(
    Path(session_key): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    info!("New WebSocket connection for session {} (user {})", session_key, params.user_id);

    let hub = state.hub.clone();
    let queue_capacity = state.config.send_queue_capacity;
    ws.max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| {
            let conn = Connection::new(hub, session_key, params.user_id);
            debug!(conn_id = %conn.id(), "WebSocket upgraded");
            conn.serve(socket, queue_capacity)
        })
}
