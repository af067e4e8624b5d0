//! Inspection Station
//!
//! Main entry point. `SERVICE_MODE` selects the Orchestrator host, the
//! public Gateway, or both in one process.

use inspection_station::{
    backend_api, gateway,
    event_broadcaster::EventBroadcaster,
    state::{AppConfig, BackendState, GatewayState},
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inspection_station=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Inspection Station v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        service_mode = ?config.service_mode,
        database_url = %config.database_url,
        images_dir = %config.images_dir.display(),
        processed_dir = %config.processed_dir.display(),
        backend_url = %config.backend_url,
        "Configuration loaded"
    );

    let events = Arc::new(EventBroadcaster::new(config.log_capacity));
    let mut servers = JoinSet::new();

    if config.service_mode.runs_backend() {
        // In combined mode the pipeline logs into the Gateway's ring too
        let shared_events = config.service_mode.runs_gateway().then(|| events.clone());
        let state = BackendState::initialize(config.clone(), shared_events).await?;
        tracing::info!(
            images = state.source.image_count().await,
            "Orchestrator host initialized"
        );

        let app = backend_api::create_router(state).layer(TraceLayer::new_for_http());
        let addr = format!("{}:{}", config.backend_host, config.backend_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "Orchestrator host listening");
        servers.spawn(async move { axum::serve(listener, app).await });
    }

    if config.service_mode.runs_gateway() {
        let state = GatewayState::new(config.clone(), events.clone())?;
        if let Some(dir) = &config.static_dir {
            tracing::info!(static_dir = %dir.display(), "Static file serving enabled");
        }

        let app = gateway::create_router(state)
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
            .layer(TraceLayer::new_for_http());
        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        events.info(format!("Starting gateway on {}", addr));
        servers.spawn(async move { axum::serve(listener, app).await });
    }

    // Either server exiting ends the process
    if let Some(result) = servers.join_next().await {
        result??;
    }

    Ok(())
}
