//! Orchestrator host routes

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::{CaptureReport, SettingsResponse};
use crate::settings_store::parse_threshold;
use crate::state::BackendState;

const DEFAULT_RESULTS_LIMIT: u32 = 20;
const MAX_RESULTS_LIMIT: u32 = 500;

/// Create Orchestrator host router
pub fn create_router(state: BackendState) -> Router {
    Router::new()
        .route("/healthz", get(super::health_check))
        .route("/capture", post(capture))
        .route("/settings", get(get_settings).post(update_settings))
        .route("/results", get(list_results))
        .route("/results/:id", get(get_result))
        .fallback(not_found)
        .with_state(state)
}

async fn capture(State(state): State<BackendState>) -> Result<Json<CaptureReport>> {
    tracing::info!("Capture requested");
    let report = state.orchestrator.capture().await?;
    Ok(Json(report))
}

async fn get_settings(State(state): State<BackendState>) -> Json<SettingsResponse> {
    Json(SettingsResponse::new(state.engine.settings().await))
}

/// Body: `{"confidence_threshold": <number | numeric string>}`
async fn update_settings(
    State(state): State<BackendState>,
    body: Bytes,
) -> Result<Json<SettingsResponse>> {
    if body.is_empty() {
        return Err(Error::InvalidThreshold("No data provided".to_string()));
    }
    let doc: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| Error::InvalidThreshold("Invalid JSON body".to_string()))?;

    let raw = doc.get("confidence_threshold").ok_or_else(|| {
        Error::InvalidThreshold("No confidence threshold provided".to_string())
    })?;
    let threshold = parse_threshold(raw)?;

    let settings = state.engine.update_threshold(threshold).await?;
    Ok(Json(SettingsResponse::new(settings)))
}

#[derive(Debug, Deserialize)]
struct ResultsQuery {
    limit: Option<u32>,
}

async fn list_results(
    State(state): State<BackendState>,
    Query(query): Query<ResultsQuery>,
) -> Result<impl IntoResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RESULTS_LIMIT)
        .clamp(1, MAX_RESULTS_LIMIT);
    let results = state.correlation.recent(limit).await?;
    let total = state.correlation.count().await?;

    Ok(Json(json!({
        "success": true,
        "results": results,
        "total": total,
    })))
}

async fn get_result(
    State(state): State<BackendState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    match state.correlation.get(id).await? {
        Some(record) => Ok(Json(json!({ "success": true, "result": record }))),
        None => Err(Error::NotFound(format!("Result {} not found", id))),
    }
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "Not found" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring_engine::ScriptedScorer;
    use crate::state::AppConfig;
    use axum::body::Body;
    use axum::http::Request;
    use image::{Rgb, RgbImage};
    use tower::ServiceExt;

    async fn backend(dir: &tempfile::TempDir, scores: Vec<f64>) -> BackendState {
        let config = AppConfig {
            database_url: format!("sqlite://{}", dir.path().join("backend.db").display()),
            images_dir: dir.path().join("images"),
            processed_dir: dir.path().join("processed"),
            ..AppConfig::default()
        };
        std::fs::create_dir_all(&config.images_dir).unwrap();
        RgbImage::from_pixel(20, 20, Rgb([10, 20, 30]))
            .save(config.images_dir.join("a.png"))
            .unwrap();
        BackendState::initialize_with_scorer(config, Box::new(ScriptedScorer::new(scores)), None)
            .await
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_capture_then_results() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(backend(&dir, vec![0.64]).await);

        let resp = app
            .clone()
            .oneshot(Request::post("/capture").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report = body_json(resp).await;
        assert_eq!(report["success"], true);
        assert_eq!(report["result"], "PASS");
        assert_eq!(report["original_image"], "a.png");
        let id = report["record_id"].as_i64().unwrap();

        let resp = app
            .clone()
            .oneshot(Request::get(format!("/results/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let row = body_json(resp).await;
        assert_eq!(row["result"]["confidence"], 0.64);
        assert_eq!(
            row["result"]["processed_result"]["filename"],
            report["processed_image"]
        );

        let resp = app
            .oneshot(Request::get("/results?limit=5").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let list = body_json(resp).await;
        assert_eq!(list["total"], 1);
        assert_eq!(list["results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_settings_validation() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(backend(&dir, vec![0.5]).await);

        let resp = app
            .clone()
            .oneshot(post_json("/settings", r#"{"confidence_threshold": "0.7"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["settings"]["confidence_threshold"], 0.7);

        let resp = app
            .clone()
            .oneshot(post_json("/settings", r#"{"confidence_threshold": 1.5}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let failure = body_json(resp).await;
        assert_eq!(failure["success"], false);
        assert_eq!(failure["error_code"], "INVALID_THRESHOLD");

        let resp = app
            .clone()
            .oneshot(post_json("/settings", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(Request::get("/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["settings"]["confidence_threshold"], 0.7);
    }

    #[tokio::test]
    async fn test_missing_result_and_unknown_route() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(backend(&dir, vec![0.5]).await);

        let resp = app
            .clone()
            .oneshot(Request::get("/results/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["success"], false);

        let resp = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_healthz() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(backend(&dir, vec![0.5]).await);
        let resp = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let health = body_json(resp).await;
        assert_eq!(health["model_loaded"], true);
        assert_eq!(health["source_connected"], true);
        assert_eq!(health["images"], 1);
    }
}
