//! ScoringEngine - Confidence scoring and verdicts
//!
//! ## Responsibilities
//!
//! - Score a frame through a pluggable `Scorer`
//! - Judge against the live threshold from SettingsStore
//! - Persist the raw outcome via CorrelationStore as part of scoring
//! - Threshold updates for all subsequent scoring

use crate::correlation_store::CorrelationStore;
use crate::error::{Error, Result};
use crate::models::{Frame, ScoreResult, Settings, Verdict};
use crate::settings_store::SettingsStore;
use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Scoring contract: confidence in [0,1] plus the verdict at `threshold`
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, frame: &Frame, threshold: f64) -> Result<(f64, Verdict)>;
}

/// Stand-in model: uniform random confidence rounded to 2 decimals
#[derive(Debug, Default)]
pub struct RandomScorer;

impl Scorer for RandomScorer {
    fn name(&self) -> &str {
        "random"
    }

    fn score(&self, _frame: &Frame, threshold: f64) -> Result<(f64, Verdict)> {
        let raw: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        let confidence = (raw * 100.0).round() / 100.0;
        Ok((confidence, Verdict::judge(confidence, threshold)))
    }
}

/// Deterministic scorer replaying a fixed sequence of confidences
#[derive(Debug)]
pub struct ScriptedScorer {
    scores: Vec<f64>,
    cursor: AtomicUsize,
}

impl ScriptedScorer {
    pub fn new(scores: Vec<f64>) -> Self {
        Self {
            scores,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Scorer for ScriptedScorer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn score(&self, _frame: &Frame, threshold: f64) -> Result<(f64, Verdict)> {
        if self.scores.is_empty() {
            return Err(Error::ScoringUnavailable("no scripted scores".to_string()));
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.scores.len();
        let confidence = self.scores[i];
        Ok((confidence, Verdict::judge(confidence, threshold)))
    }
}

/// ScoringEngine instance
pub struct ScoringEngine {
    scorer: Box<dyn Scorer>,
    settings: Arc<SettingsStore>,
    correlation: Arc<CorrelationStore>,
    loaded: AtomicBool,
}

impl ScoringEngine {
    pub fn new(
        scorer: Box<dyn Scorer>,
        settings: Arc<SettingsStore>,
        correlation: Arc<CorrelationStore>,
    ) -> Self {
        Self {
            scorer,
            settings,
            correlation,
            loaded: AtomicBool::new(false),
        }
    }

    /// Load the scoring model; scoring is unavailable until this succeeds
    pub fn load_model(&self) -> bool {
        tracing::info!(scorer = %self.scorer.name(), "Loading model");
        self.loaded.store(true, Ordering::Release);
        tracing::info!("Model loaded successfully");
        true
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Score a frame against the current threshold and persist the outcome
    pub async fn score(&self, frame: &Frame) -> Result<ScoreResult> {
        if !self.is_loaded() {
            return Err(Error::ScoringUnavailable("Model not loaded".to_string()));
        }

        tracing::info!(filename = %frame.filename, "Running inference on image");

        let threshold = self.settings.threshold().await;
        let (confidence, verdict) = self
            .scorer
            .score(frame, threshold)
            .map_err(|e| match e {
                Error::ScoringUnavailable(msg) => Error::ScoringUnavailable(msg),
                other => Error::ScoringUnavailable(other.to_string()),
            })?;

        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(Error::ScoringUnavailable(format!(
                "scorer {} produced out-of-range confidence {}",
                self.scorer.name(),
                confidence
            )));
        }

        tracing::info!(
            verdict = %verdict,
            confidence = confidence,
            threshold = threshold,
            "Inference result"
        );

        let image_path = frame.image_path();
        let record_id = self
            .correlation
            .insert(&image_path, verdict, confidence)
            .await;

        Ok(ScoreResult {
            image_path,
            filename: frame.filename.clone(),
            confidence,
            threshold,
            verdict,
            evaluated_at: Utc::now(),
            record_id,
        })
    }

    /// Current persisted settings
    pub async fn settings(&self) -> Settings {
        self.settings.get().await
    }

    /// Validate and persist a threshold for all subsequent scoring
    pub async fn update_threshold(&self, value: f64) -> Result<Settings> {
        match self.settings.set_threshold(value).await {
            Ok(settings) => Ok(settings),
            Err(e) => {
                tracing::error!(value = value, error = %e, "Threshold update rejected");
                Err(e)
            }
        }
    }

    /// Boolean form of `update_threshold`; never raises
    pub async fn set_threshold(&self, value: f64) -> bool {
        self.update_threshold(value).await.is_ok()
    }
}
