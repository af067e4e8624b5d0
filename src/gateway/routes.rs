//! Gateway routes

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::path::{Component, Path as FsPath, PathBuf};
use tower_http::services::ServeDir;

use super::{image_content_type, CaptureResponse};
use crate::error::{Error, Result};
use crate::models::SettingsResponse;
use crate::state::GatewayState;

/// Create Gateway router
pub fn create_router(state: GatewayState) -> Router {
    let router = Router::new()
        // Health & Status
        .route("/api/status", get(get_status))
        .route("/api/health", get(health_check))
        // Pipeline
        .route("/api/capture", post(capture))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/results", get(list_results))
        .route("/api/results/:id", get(get_result))
        // Images
        .route("/api/images/original/:filename", get(get_original_image))
        .route("/api/images/processed/:filename", get(get_processed_image))
        // Logs
        .route("/api/logs", get(get_logs))
        .route("/ws", get(websocket_handler));

    let router = match &state.config.static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.fallback(not_found),
    };
    router.with_state(state)
}

async fn get_status(State(state): State<GatewayState>) -> impl IntoResponse {
    state.events.info("Status endpoint called");
    Json(json!({
        "status": "online",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
    }))
}

async fn health_check(State(state): State<GatewayState>) -> impl IntoResponse {
    state.events.info("Health check endpoint called");
    match state.client.health().await {
        Ok(backend) => Json(json!({
            "status": "healthy",
            "dependencies": { "backend": "healthy" },
            "backend": backend,
        })),
        Err(e) => Json(json!({
            "status": "degraded",
            "dependencies": { "backend": "unhealthy" },
            "error": e.to_string(),
        })),
    }
}

async fn capture(State(state): State<GatewayState>) -> Result<Json<CaptureResponse>> {
    state.events.info("Gateway: Capture endpoint called");
    state.events.info("Gateway: Forwarding capture request to backend");

    match state.client.capture().await {
        Ok(report) => {
            let response = CaptureResponse::from(report);
            state.events.info(format!(
                "Backend: Capture completed with result: {} (confidence: {:.2})",
                response.result, response.confidence
            ));
            match serde_json::to_value(&response) {
                Ok(value) => state.events.broadcast_capture(value),
                Err(e) => tracing::error!(error = %e, "Failed to serialize capture result"),
            }
            Ok(Json(response))
        }
        Err(e) => {
            let origin = match e {
                Error::Upstream { .. } => "Backend",
                _ => "Gateway",
            };
            state.events.error(format!("{}: {}", origin, e));
            Err(e)
        }
    }
}

async fn get_settings(State(state): State<GatewayState>) -> Result<Json<SettingsResponse>> {
    match state.client.get_settings().await {
        Ok(settings) => Ok(Json(settings)),
        Err(e) => {
            state.events.error(format!("Error getting settings: {}", e));
            Err(e)
        }
    }
}

async fn update_settings(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<SettingsResponse>> {
    if body.is_empty() {
        return Err(Error::InvalidThreshold("No data provided".to_string()));
    }
    let doc: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| Error::InvalidThreshold("Invalid JSON body".to_string()))?;

    match state.client.update_settings(&doc).await {
        Ok(updated) => {
            state.events.info(format!(
                "Updated confidence threshold to {}",
                updated.settings.confidence_threshold
            ));
            Ok(Json(updated))
        }
        Err(e) => {
            state.events.error(format!("Error updating settings: {}", e));
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultsQuery {
    limit: Option<u32>,
}

async fn list_results(
    State(state): State<GatewayState>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<serde_json::Value>> {
    Ok(Json(state.client.results(query.limit).await?))
}

async fn get_result(
    State(state): State<GatewayState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    Ok(Json(state.client.result(id).await?))
}

async fn get_original_image(
    State(state): State<GatewayState>,
    Path(filename): Path<String>,
) -> Response {
    let root = state.config.images_dir.clone();
    serve_image(&state, &root, &filename).await
}

async fn get_processed_image(
    State(state): State<GatewayState>,
    Path(filename): Path<String>,
) -> Response {
    let root = state.config.processed_dir.clone();
    serve_image(&state, &root, &filename).await
}

/// Resolve a bare file name inside `root`; anything else is rejected
fn resolve_in(root: &FsPath, filename: &str) -> Option<PathBuf> {
    let mut components = FsPath::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(root.join(name)),
        _ => None,
    }
}

async fn serve_image(state: &GatewayState, root: &FsPath, filename: &str) -> Response {
    let path = match resolve_in(root, filename) {
        Some(path) => path,
        None => {
            state
                .events
                .error(format!("Error retrieving image {}: invalid file name", filename));
            return Error::NotFound("Image not found".to_string()).into_response();
        }
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                ("content-type", image_content_type(filename)),
                ("cache-control", "no-cache"),
            ],
            bytes,
        )
            .into_response(),
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
            state
                .events
                .error(format!("Error retrieving image {}: not found", filename));
            Error::NotFound("Image not found".to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read image");
            state
                .events
                .error(format!("Error retrieving image {}: {}", filename, e));
            Error::Io(e).into_response()
        }
    }
}

async fn get_logs(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "logs": state.events.logs(),
    }))
}

/// JSON 404 for unknown routes
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "Not found" })),
    )
}

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = socket.split();

    // Receiver already holds the log_history burst
    let (conn_id, mut rx) = state.events.subscribe();
    state.events.info("Client connected to WebSocket");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Ping(data)) => {
                    tracing::trace!("Received ping: {:?}", data);
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.events.unsubscribe(&conn_id);
}
