//! Shared models and types
//!
//! Value types passed between pipeline stages and across the
//! Gateway/Orchestrator boundary. Kept here to avoid circular
//! dependencies between component modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Auto-assigned correlation row identifier
pub type RecordId = i64;

/// Binary inspection outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    /// PASS iff confidence >= threshold (boundary inclusive)
    pub fn judge(confidence: f64, threshold: f64) -> Self {
        if confidence >= threshold {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }

    /// Marker colour used by the Annotator
    pub fn color(&self) -> [u8; 3] {
        match self {
            Verdict::Pass => [0, 255, 0],
            Verdict::Fail => [255, 0, 0],
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PASS" => Ok(Verdict::Pass),
            "FAIL" => Ok(Verdict::Fail),
            other => Err(crate::Error::Internal(format!("unknown verdict: {}", other))),
        }
    }
}

/// One acquired image plus its acquisition metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Captures since the source was connected (0-based)
    pub sequence_index: u64,
    pub source_path: PathBuf,
    pub filename: String,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn image_path(&self) -> String {
        self.source_path.to_string_lossy().into_owned()
    }
}

/// Durable inspection settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub confidence_threshold: f64,
}

/// Outcome of scoring one frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub image_path: String,
    pub filename: String,
    pub confidence: f64,
    pub threshold: f64,
    pub verdict: Verdict,
    pub evaluated_at: DateTime<Utc>,
    /// Correlation row created while scoring; None when persistence failed
    pub record_id: Option<RecordId>,
}

/// Payload embedded into a processed artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub confidence: f64,
    pub result: Verdict,
    pub processed_at: DateTime<Utc>,
    pub original_image: String,
}

/// Annotated copy of a source frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedArtifact {
    pub source_image_path: String,
    pub artifact_path: PathBuf,
    pub filename: String,
    pub metadata: ArtifactMetadata,
    /// False when the artifact was saved without its metadata block
    pub metadata_embedded: bool,
    pub produced_at: DateTime<Utc>,
}

/// Merged result of one successful capture cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureReport {
    pub success: bool,
    #[serde(default)]
    pub record_id: Option<RecordId>,
    pub original_image_path: String,
    pub processed_image_path: String,
    /// Source image file name
    pub original_image: String,
    /// Processed artifact file name
    pub processed_image: String,
    pub confidence: f64,
    pub threshold: f64,
    pub result: Verdict,
    pub timestamp: DateTime<Utc>,
    pub metadata: ArtifactMetadata,
    pub metadata_embedded: bool,
}

impl CaptureReport {
    pub fn from_stages(score: &ScoreResult, artifact: &ProcessedArtifact) -> Self {
        Self {
            success: true,
            record_id: score.record_id,
            original_image_path: score.image_path.clone(),
            processed_image_path: artifact.artifact_path.to_string_lossy().into_owned(),
            original_image: score.filename.clone(),
            processed_image: artifact.filename.clone(),
            confidence: score.confidence,
            threshold: score.threshold,
            result: score.verdict,
            timestamp: artifact.produced_at,
            metadata: artifact.metadata.clone(),
            metadata_embedded: artifact.metadata_embedded,
        }
    }
}

/// Settings response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub success: bool,
    pub settings: Settings,
}

impl SettingsResponse {
    pub fn new(settings: Settings) -> Self {
        Self {
            success: true,
            settings,
        }
    }
}

/// Structured failure body shared by both HTTP surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureBody {
    pub success: bool,
    pub error: String,
    #[serde(default)]
    pub error_code: Option<String>,
}
