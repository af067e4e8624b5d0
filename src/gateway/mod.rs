//! Gateway - Public request surface
//!
//! ## Responsibilities
//!
//! - Forward capture/settings/results traffic to the Orchestrator host
//! - Normalize capture responses (artifact URLs)
//! - Serve stored images from the two namespaces
//! - Log retrieval and the live event channel
//!
//! The Gateway keeps no settings of its own; the Orchestrator host's
//! SettingsStore is the only copy.

mod client;
mod routes;

pub use client::{OrchestratorClient, MAX_READ_ATTEMPTS};
pub use routes::create_router;

use crate::models::{ArtifactMetadata, CaptureReport, RecordId, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// URL prefix for source images
pub const ORIGINAL_IMAGES_ROUTE: &str = "/api/images/original";
/// URL prefix for processed artifacts
pub const PROCESSED_IMAGES_ROUTE: &str = "/api/images/processed";

/// Capture response as seen by Gateway callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub success: bool,
    #[serde(default)]
    pub record_id: Option<RecordId>,
    pub original_image: String,
    pub processed_image: String,
    pub original_image_url: String,
    pub processed_image_url: String,
    pub confidence: f64,
    pub threshold: f64,
    pub result: Verdict,
    pub timestamp: DateTime<Utc>,
    pub metadata: ArtifactMetadata,
    pub metadata_embedded: bool,
}

impl From<CaptureReport> for CaptureResponse {
    fn from(report: CaptureReport) -> Self {
        Self {
            success: report.success,
            record_id: report.record_id,
            original_image_url: format!("{}/{}", ORIGINAL_IMAGES_ROUTE, report.original_image),
            processed_image_url: format!("{}/{}", PROCESSED_IMAGES_ROUTE, report.processed_image),
            original_image: report.original_image,
            processed_image: report.processed_image,
            confidence: report.confidence,
            threshold: report.threshold,
            result: report.result,
            timestamp: report.timestamp,
            metadata: report.metadata,
            metadata_embedded: report.metadata_embedded,
        }
    }
}

/// Content type for a served image, by extension
pub fn image_content_type(filename: &str) -> &'static str {
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(image_content_type("a.PNG"), "image/png");
        assert_eq!(image_content_type("a.tiff"), "image/tiff");
        assert_eq!(image_content_type("a.jpeg"), "image/jpeg");
        assert_eq!(image_content_type("noext"), "image/jpeg");
    }
}
