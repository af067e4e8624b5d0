//! BackendApi - Orchestrator host HTTP surface
//!
//! ## Responsibilities
//!
//! - Capture trigger (one cycle per request)
//! - Settings read/update against the SettingsStore
//! - Correlation row queries
//! - Health reporting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::BackendState;

/// Health check endpoint
pub async fn health_check(State(state): State<BackendState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "model_loaded": state.engine.is_loaded(),
        "source_connected": state.source.is_connected().await,
        "images": state.source.image_count().await,
    }))
}
