mod models;
mod handlers;
mod routes;
mod docs;
mod config;
mod error;
mod utils;
mod ws;


use chrono::{DateTime, Utc};
use config::Config;
use routes::create_app;
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use ws::Hub;

/// Shared state handed to every request handler and WebSocket acceptor
pub struct AppState {
    pub hub: Hub,
    pub config: Config,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Start the session hub and wrap it with the configuration
    pub fn new(config: Config) -> Self {
        let hub = Hub::spawn(config.hub_config());
        Self {
            hub,
            config,
            started_at: Utc::now(),
        }
    }
}

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration before tracing so LOG_LEVEL can drive the filter
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Initialize tracing
    let default_filter = format!(
        "artboard_relay={},tower_http=debug,axum::rejection=trace,info",
        config.log_level
    );
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    info!("Starting server...");
    if let Some(e) = config_error {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
    }
    if config.is_development() {
        warn!("Running in development mode");
    }

    let address = config.server_address();
    let state = Arc::new(AppState::new(config));
    let app_routes = create_app(state);

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", address, e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket relay available at ws://{}/ws/{{session_key}}?user_id={{user_id}}", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
    info!("Server stopped");
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
