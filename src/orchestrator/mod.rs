//! Orchestrator - Capture cycle state machine
//!
//! ## Responsibilities
//!
//! - Drive one cycle: DeviceSource -> ScoringEngine -> Annotator
//! - Map stage faults onto `Failed(kind)`
//! - Merge stage outputs into a `CaptureReport`
//!
//! ## Cycle
//!
//! `Idle -> Capturing -> Scoring -> Annotating -> Done`, any stage may exit
//! to `Failed`. A row persisted while scoring is kept when annotation fails.

use crate::annotator::Annotator;
use crate::device_source::DeviceSource;
use crate::error::{Error, Result};
use crate::event_broadcaster::{EventBroadcaster, LogLevel};
use crate::models::CaptureReport;
use crate::scoring_engine::ScoringEngine;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Why a cycle ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotConnected,
    NoImageAvailable,
    ScoringUnavailable,
    AnnotationError,
}

/// Capture cycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Capturing,
    Scoring,
    Annotating,
    Done,
    Failed(FailureKind),
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Idle => f.write_str("idle"),
            CycleState::Capturing => f.write_str("capturing"),
            CycleState::Scoring => f.write_str("scoring"),
            CycleState::Annotating => f.write_str("annotating"),
            CycleState::Done => f.write_str("done"),
            CycleState::Failed(kind) => write!(f, "failed({:?})", kind),
        }
    }
}

/// Per-cycle state tracker; lives only for one `capture()` call
struct Cycle {
    state: CycleState,
}

impl Cycle {
    fn new() -> Self {
        Self {
            state: CycleState::Idle,
        }
    }

    fn advance(&mut self, next: CycleState) {
        tracing::debug!(from = %self.state, to = %next, "Cycle transition");
        self.state = next;
    }

    /// Record the failure exit for `err` and hand it back
    fn fail(&mut self, err: Error) -> Error {
        let kind = err.failure_kind().unwrap_or(match self.state {
            CycleState::Capturing => FailureKind::NotConnected,
            CycleState::Scoring => FailureKind::ScoringUnavailable,
            _ => FailureKind::AnnotationError,
        });
        self.advance(CycleState::Failed(kind));
        err
    }
}

/// Orchestrator instance
pub struct Orchestrator {
    source: Arc<DeviceSource>,
    engine: Arc<ScoringEngine>,
    annotator: Arc<Annotator>,
    events: Option<Arc<EventBroadcaster>>,
}

impl Orchestrator {
    /// Create new Orchestrator over its three collaborators
    pub fn new(
        source: Arc<DeviceSource>,
        engine: Arc<ScoringEngine>,
        annotator: Arc<Annotator>,
    ) -> Self {
        Self {
            source,
            engine,
            annotator,
            events: None,
        }
    }

    /// Also emit cycle events into a broadcaster in the same process
    pub fn with_events(mut self, events: Arc<EventBroadcaster>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn source(&self) -> &Arc<DeviceSource> {
        &self.source
    }

    /// Run one capture cycle end-to-end
    pub async fn capture(&self) -> Result<CaptureReport> {
        let mut cycle = Cycle::new();

        cycle.advance(CycleState::Capturing);
        let frame = match self.source.capture().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(self.failed(&mut cycle, Error::NoImageAvailable)),
            Err(e) => return Err(self.failed(&mut cycle, e)),
        };

        cycle.advance(CycleState::Scoring);
        let score = match self.engine.score(&frame).await {
            Ok(score) => score,
            Err(e) => return Err(self.failed(&mut cycle, e)),
        };

        cycle.advance(CycleState::Annotating);
        let artifact = match self.annotator.annotate(&frame, &score).await {
            Ok(artifact) => artifact,
            Err(e) => {
                let e = match e {
                    Error::Annotation(_) => e,
                    other => Error::Annotation(other.to_string()),
                };
                return Err(self.failed(&mut cycle, e));
            }
        };

        cycle.advance(CycleState::Done);
        let report = CaptureReport::from_stages(&score, &artifact);

        tracing::info!(
            original = %report.original_image,
            processed = %report.processed_image,
            result = %report.result,
            confidence = report.confidence,
            record_id = ?report.record_id,
            "Capture cycle complete"
        );
        self.emit(
            LogLevel::Info,
            format!(
                "Capture processed: {} -> {} ({}, {:.2})",
                report.original_image, report.processed_image, report.result, report.confidence
            ),
        );

        Ok(report)
    }

    fn failed(&self, cycle: &mut Cycle, err: Error) -> Error {
        let err = cycle.fail(err);
        if matches!(err, Error::NoImageAvailable) {
            tracing::warn!(state = %cycle.state, "No image captured");
            self.emit(LogLevel::Warning, "No image captured".to_string());
        } else {
            tracing::error!(state = %cycle.state, error = %err, "Capture cycle failed");
            self.emit(LogLevel::Error, format!("Capture cycle failed: {}", err));
        }
        err
    }

    fn emit(&self, level: LogLevel, message: String) {
        if let Some(events) = &self.events {
            events.emit(level, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_store::CorrelationStore;
    use crate::models::Verdict;
    use crate::scoring_engine::ScriptedScorer;
    use crate::settings_store::SettingsStore;
    use crate::storage;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use std::time::Duration;

    struct Station {
        _dir: tempfile::TempDir,
        images: std::path::PathBuf,
        orchestrator: Orchestrator,
        correlation: Arc<CorrelationStore>,
    }

    async fn station(scores: Vec<f64>) -> Station {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();

        let url = format!("sqlite://{}", dir.path().join("station.db").display());
        let pool = storage::connect_pool(&url, Duration::from_secs(2))
            .await
            .unwrap();
        let settings = Arc::new(SettingsStore::new(pool.clone(), Duration::from_secs(2), 0.5));
        let correlation = Arc::new(CorrelationStore::new(pool, Duration::from_secs(2)));

        let source = Arc::new(DeviceSource::new(0, &images));
        let engine = Arc::new(ScoringEngine::new(
            Box::new(ScriptedScorer::new(scores)),
            settings,
            correlation.clone(),
        ));
        engine.load_model();
        let annotator = Arc::new(Annotator::new(
            dir.path().join("processed"),
            correlation.clone(),
            None,
        ));

        Station {
            _dir: dir,
            images,
            orchestrator: Orchestrator::new(source, engine, annotator),
            correlation,
        }
    }

    fn write_image(dir: &Path, name: &str) {
        RgbImage::from_pixel(40, 30, Rgb([90, 90, 90]))
            .save(dir.join(name))
            .unwrap();
    }

    #[tokio::test]
    async fn test_two_image_scenario() {
        let st = station(vec![0.7, 0.3]).await;
        write_image(&st.images, "a.jpg");
        write_image(&st.images, "b.jpg");
        st.orchestrator.source().connect().await.unwrap();

        let first = st.orchestrator.capture().await.unwrap();
        assert!(first.success);
        assert_eq!(first.original_image, "a.jpg");
        assert_eq!(first.result, Verdict::Pass);
        assert_eq!(first.confidence, 0.7);
        assert_eq!(first.threshold, 0.5);
        assert_eq!(st.correlation.count().await.unwrap(), 1);

        let row = st.correlation.get(first.record_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(row.confidence, 0.7);
        assert_eq!(row.verdict, Verdict::Pass);
        assert!(row.processed_result.is_some());

        let second = st.orchestrator.capture().await.unwrap();
        assert_eq!(second.original_image, "b.jpg");
        assert_eq!(second.result, Verdict::Fail);

        let third = st.orchestrator.capture().await.unwrap();
        assert_eq!(third.original_image, "a.jpg");
        assert_eq!(st.correlation.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let st = station(vec![0.5]).await;
        let err = st.orchestrator.capture().await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::NotConnected));
    }

    #[tokio::test]
    async fn test_empty_source_is_no_image_available() {
        let st = station(vec![0.5]).await;
        st.orchestrator.source().connect().await.unwrap();
        let err = st.orchestrator.capture().await.unwrap_err();
        assert!(matches!(err, Error::NoImageAvailable));
        assert_eq!(st.correlation.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_annotation_failure_keeps_scored_row() {
        let st = station(vec![0.8]).await;
        std::fs::write(st.images.join("corrupt.png"), b"garbage").unwrap();
        st.orchestrator.source().connect().await.unwrap();

        let err = st.orchestrator.capture().await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::AnnotationError));

        let rows = st.correlation.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].confidence, 0.8);
        assert!(rows[0].processed_result.is_none());
    }

    #[tokio::test]
    async fn test_cycle_events_reach_broadcaster() {
        let st = station(vec![0.9]).await;
        write_image(&st.images, "a.png");
        let events = Arc::new(EventBroadcaster::new(10));
        let Station {
            _dir,
            orchestrator,
            ..
        } = st;
        let orchestrator = orchestrator.with_events(events.clone());
        orchestrator.source().connect().await.unwrap();

        orchestrator.capture().await.unwrap();
        let logs = events.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].message.contains("a.png"));
        drop(_dir);
    }
}
