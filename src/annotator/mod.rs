//! Annotator - Processed artifact production
//!
//! ## Responsibilities
//!
//! - Composite a verdict banner, marker and border onto a copy of the frame
//! - Optional text overlay (`PASS: 0.73`) when a font is configured
//! - Embed result metadata into the artifact (degrades to a plain save)
//! - Attach the processed payload to this cycle's correlation row
//!
//! Rendering runs on the blocking pool; the source file is only read.

pub mod metadata;

pub use metadata::{read_embedded_metadata, ContainerFormat};

use crate::correlation_store::CorrelationStore;
use crate::error::{Error, Result};
use crate::models::{ArtifactMetadata, Frame, ProcessedArtifact, ScoreResult, Verdict};
use ab_glyph::{FontVec, PxScale};
use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BORDER_WIDTH: u32 = 4;
const TEXT_MARGIN: i32 = 10;

/// Annotator instance
pub struct Annotator {
    output_dir: PathBuf,
    correlation: Arc<CorrelationStore>,
    font: Option<Arc<FontVec>>,
}

impl Annotator {
    /// Create new Annotator writing into `output_dir`
    ///
    /// An unreadable font is logged and the overlay falls back to
    /// banner/marker only.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        correlation: Arc<CorrelationStore>,
        font_path: Option<&Path>,
    ) -> Self {
        let output_dir = output_dir.into();
        let font = font_path.and_then(|path| match load_font(path) {
            Ok(font) => {
                tracing::info!(font = %path.display(), "Annotation font loaded");
                Some(Arc::new(font))
            }
            Err(e) => {
                tracing::warn!(font = %path.display(), error = %e, "Annotation font unavailable");
                None
            }
        });

        tracing::info!(output_dir = %output_dir.display(), "Post-processing output directory");

        Self {
            output_dir,
            correlation,
            font,
        }
    }

    /// Produce the annotated artifact for one scored frame
    pub async fn annotate(&self, frame: &Frame, score: &ScoreResult) -> Result<ProcessedArtifact> {
        tracing::info!(filename = %frame.filename, "Processing inference results for image");

        let produced_at = Utc::now();
        let filename = processed_filename(&frame.filename, produced_at);
        let artifact_path = self.output_dir.join(&filename);

        let metadata = ArtifactMetadata {
            confidence: score.confidence,
            result: score.verdict,
            processed_at: produced_at,
            original_image: frame.filename.clone(),
        };

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| Error::Annotation(format!("output directory: {}", e)))?;

        let job = RenderJob {
            source: frame.source_path.clone(),
            target: artifact_path.clone(),
            verdict: score.verdict,
            confidence: score.confidence,
            metadata: metadata.clone(),
            font: self.font.clone(),
        };
        let metadata_embedded = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| Error::Annotation(format!("render task failed: {}", e)))??;

        tracing::info!(
            path = %artifact_path.display(),
            metadata_embedded = metadata_embedded,
            "Saved processed image"
        );

        let artifact = ProcessedArtifact {
            source_image_path: score.image_path.clone(),
            artifact_path,
            filename,
            metadata,
            metadata_embedded,
            produced_at,
        };

        match score.record_id {
            Some(id) => {
                self.correlation
                    .update(id, &processed_payload(&artifact))
                    .await;
            }
            None => tracing::warn!(
                filename = %frame.filename,
                "No correlation row for this cycle, processed result not persisted"
            ),
        }

        Ok(artifact)
    }
}

/// `<stem>_processed_<YYYYmmddHHMMSSmmm><.ext>`
pub fn processed_filename(source_filename: &str, at: DateTime<Utc>) -> String {
    let path = Path::new(source_filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_filename.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{}_processed_{}{}", stem, at.format("%Y%m%d%H%M%S%3f"), ext)
}

/// Processed result as stored on the correlation row
pub fn processed_payload(artifact: &ProcessedArtifact) -> serde_json::Value {
    json!({
        "success": true,
        "original_image_path": artifact.source_image_path,
        "processed_image_path": artifact.artifact_path.to_string_lossy(),
        "confidence": artifact.metadata.confidence,
        "result": artifact.metadata.result,
        "filename": artifact.filename,
        "metadata": artifact.metadata,
        "metadata_embedded": artifact.metadata_embedded,
    })
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = std::fs::read(path)?;
    FontVec::try_from_vec(bytes).map_err(|e| Error::Config(format!("invalid font: {}", e)))
}

struct RenderJob {
    source: PathBuf,
    target: PathBuf,
    verdict: Verdict,
    confidence: f64,
    metadata: ArtifactMetadata,
    font: Option<Arc<FontVec>>,
}

impl RenderJob {
    /// Returns whether metadata made it into the saved file
    fn run(self) -> Result<bool> {
        let source = image::open(&self.source).map_err(|e| {
            Error::Annotation(format!("cannot open {}: {}", self.source.display(), e))
        })?;

        let mut canvas = source.to_rgb8();
        draw_overlay(
            &mut canvas,
            self.verdict,
            self.confidence,
            self.font.as_deref(),
        );

        save_with_metadata(&canvas, &self.target, &self.metadata)
    }
}

fn draw_overlay(canvas: &mut RgbImage, verdict: Verdict, confidence: f64, font: Option<&FontVec>) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let color = Rgb(verdict.color());

    // Half-transparent black banner
    let banner_h = (height / 10 + 20).min(height);
    for y in 0..banner_h {
        for x in 0..width {
            let px = canvas.get_pixel_mut(x, y);
            for c in px.0.iter_mut() {
                *c /= 2;
            }
        }
    }

    // Verdict marker at the right end of the banner
    let marker = banner_h.saturating_sub(8).max(1).min(width);
    let marker_x = width.saturating_sub(marker + 4);
    draw_filled_rect_mut(
        canvas,
        Rect::at(marker_x as i32, ((banner_h - marker) / 2) as i32).of_size(marker, marker),
        color,
    );

    // Confidence bar along the bottom edge of the banner
    let bar_w = ((width as f64) * confidence.clamp(0.0, 1.0)).round() as u32;
    if bar_w > 0 && banner_h >= 3 {
        draw_filled_rect_mut(
            canvas,
            Rect::at(0, (banner_h - 3) as i32).of_size(bar_w.min(width), 3),
            color,
        );
    }

    for i in 0..BORDER_WIDTH.min(width / 2).min(height / 2) {
        draw_hollow_rect_mut(
            canvas,
            Rect::at(i as i32, i as i32).of_size(width - 2 * i, height - 2 * i),
            color,
        );
    }

    if let Some(font) = font {
        let text = format!("{}: {:.2}", verdict, confidence);
        let scale = PxScale::from((height as f32 / 10.0).max(12.0));
        draw_text_mut(canvas, color, TEXT_MARGIN, TEXT_MARGIN, scale, font, &text);
    }
}

fn save_with_metadata(canvas: &RgbImage, target: &Path, metadata: &ArtifactMetadata) -> Result<bool> {
    let format = ContainerFormat::from_path(target);

    match metadata::encode_with_metadata(canvas, format, metadata) {
        Ok(bytes) => {
            std::fs::write(target, bytes)
                .map_err(|e| Error::Annotation(format!("write {}: {}", target.display(), e)))?;
            Ok(true)
        }
        Err(e) => {
            tracing::warn!(
                path = %target.display(),
                error = %e,
                "Could not save metadata, saving image without metadata"
            );
            canvas
                .save(target)
                .map_err(|e| Error::Annotation(format!("save {}: {}", target.display(), e)))?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;
    use chrono::TimeZone;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        images: PathBuf,
        annotator: Annotator,
        correlation: Arc<CorrelationStore>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        let url = format!("sqlite://{}", dir.path().join("annotator.db").display());
        let pool = storage::connect_pool(&url, Duration::from_secs(2))
            .await
            .unwrap();
        let correlation = Arc::new(CorrelationStore::new(pool, Duration::from_secs(2)));
        let annotator = Annotator::new(dir.path().join("processed"), correlation.clone(), None);
        Fixture {
            _dir: dir,
            images,
            annotator,
            correlation,
        }
    }

    fn write_source(dir: &Path, name: &str) -> Frame {
        let path = dir.join(name);
        RgbImage::from_pixel(64, 48, Rgb([200, 200, 200]))
            .save(&path)
            .unwrap();
        Frame {
            sequence_index: 0,
            source_path: path,
            filename: name.to_string(),
            captured_at: Utc::now(),
        }
    }

    fn score_for(frame: &Frame, confidence: f64, record_id: Option<i64>) -> ScoreResult {
        ScoreResult {
            image_path: frame.image_path(),
            filename: frame.filename.clone(),
            confidence,
            threshold: 0.5,
            verdict: Verdict::judge(confidence, 0.5),
            evaluated_at: Utc::now(),
            record_id,
        }
    }

    #[test]
    fn test_processed_filename() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            processed_filename("part_1.jpg", at),
            "part_1_processed_20240309140507000.jpg"
        );
        assert_eq!(processed_filename("noext", at), "noext_processed_20240309140507000");
    }

    #[tokio::test]
    async fn test_png_round_trip_and_correlation_update() {
        let fx = fixture().await;
        let frame = write_source(&fx.images, "a.png");
        let before = std::fs::read(&frame.source_path).unwrap();

        let id = fx
            .correlation
            .insert(&frame.image_path(), Verdict::Pass, 0.73)
            .await
            .unwrap();
        let score = score_for(&frame, 0.73, Some(id));
        let artifact = fx.annotator.annotate(&frame, &score).await.unwrap();

        assert!(artifact.metadata_embedded);
        assert!(artifact.filename.starts_with("a_processed_"));
        assert!(artifact.filename.ends_with(".png"));

        let meta = read_embedded_metadata(&artifact.artifact_path).unwrap().unwrap();
        assert_eq!(meta.result, Verdict::Pass);
        assert_eq!(meta.confidence, 0.73);
        assert_eq!(meta.processed_at, artifact.produced_at);
        assert_eq!(meta.original_image, "a.png");

        // Source untouched
        assert_eq!(std::fs::read(&frame.source_path).unwrap(), before);

        // Border pixel carries the verdict colour
        let out = image::open(&artifact.artifact_path).unwrap().to_rgb8();
        assert_eq!(out.get_pixel(0, 47).0, [0, 255, 0]);

        let row = fx.correlation.get(id).await.unwrap().unwrap();
        let processed = row.processed_result.unwrap();
        assert_eq!(processed["filename"], artifact.filename.as_str());
        assert_eq!(processed["result"], "PASS");
    }

    #[tokio::test]
    async fn test_jpeg_round_trip() {
        let fx = fixture().await;
        let frame = write_source(&fx.images, "b.jpg");
        let score = score_for(&frame, 0.2, None);

        let artifact = fx.annotator.annotate(&frame, &score).await.unwrap();
        assert!(artifact.metadata_embedded);

        let meta = read_embedded_metadata(&artifact.artifact_path).unwrap().unwrap();
        assert_eq!(meta.result, Verdict::Fail);
        assert_eq!(meta.confidence, 0.2);
        assert_eq!(meta.processed_at, artifact.produced_at);
    }

    #[tokio::test]
    async fn test_non_ascii_source_name_keeps_metadata() {
        let fx = fixture().await;
        let frame = write_source(&fx.images, "部品.png");
        let score = score_for(&frame, 0.61, None);

        let artifact = fx.annotator.annotate(&frame, &score).await.unwrap();
        assert!(artifact.metadata_embedded);

        let meta = read_embedded_metadata(&artifact.artifact_path).unwrap().unwrap();
        assert_eq!(meta.original_image, "部品.png");
        assert_eq!(meta.result, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_bmp_saved_without_metadata() {
        let fx = fixture().await;
        let frame = write_source(&fx.images, "c.bmp");
        let score = score_for(&frame, 0.9, None);

        let artifact = fx.annotator.annotate(&frame, &score).await.unwrap();
        assert!(!artifact.metadata_embedded);
        assert!(read_embedded_metadata(&artifact.artifact_path).unwrap().is_none());
        assert_eq!(image::open(&artifact.artifact_path).unwrap().width(), 64);
    }

    #[tokio::test]
    async fn test_undecodable_source_is_annotation_error() {
        let fx = fixture().await;
        let path = fx.images.join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        let frame = Frame {
            sequence_index: 0,
            source_path: path,
            filename: "broken.jpg".to_string(),
            captured_at: Utc::now(),
        };
        let score = score_for(&frame, 0.5, None);

        let result = fx.annotator.annotate(&frame, &score).await;
        assert!(matches!(result, Err(Error::Annotation(_))));
    }
}
