//! CorrelationStore - Raw/processed result correlation
//!
//! ## Responsibilities
//!
//! - Insert one row per scoring outcome (never deduplicated)
//! - Attach the processed payload to that row later
//! - Best-effort: storage failures are logged and swallowed
//!
//! The pipeline threads the `RecordId` returned by `insert` through to
//! `update`, so concurrent captures of the same file never cross-attach.
//! `update_latest_for_path` keeps the name-based "highest id wins" match
//! for callers that only know the image path.

mod repository;

pub use repository::CorrelationRepository;

use crate::error::Result;
use crate::models::{RecordId, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::time::Duration;

/// Persisted correlation row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    pub image_path: String,
    pub verdict: Verdict,
    pub confidence: f64,
    pub processed_result: Option<serde_json::Value>,
}

/// CorrelationStore instance
pub struct CorrelationStore {
    repo: CorrelationRepository,
}

impl CorrelationStore {
    pub fn new(pool: SqlitePool, op_timeout: Duration) -> Self {
        Self {
            repo: CorrelationRepository::new(pool, op_timeout),
        }
    }

    /// Insert a scoring outcome; `None` when persistence failed
    pub async fn insert(
        &self,
        image_path: &str,
        verdict: Verdict,
        confidence: f64,
    ) -> Option<RecordId> {
        match self.repo.insert(image_path, verdict, confidence).await {
            Ok(id) => {
                tracing::info!(
                    record_id = id,
                    image_path = %image_path,
                    verdict = %verdict,
                    confidence = confidence,
                    "Stored inference result"
                );
                Some(id)
            }
            Err(e) => {
                tracing::error!(
                    image_path = %image_path,
                    error = %e,
                    "Error storing result in database"
                );
                None
            }
        }
    }

    /// Attach the processed payload to the row created by this cycle
    pub async fn update(&self, id: RecordId, payload: &serde_json::Value) -> bool {
        let result = match serde_json::to_string(payload) {
            Ok(json) => self.repo.update_by_id(id, &json).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(1) => {
                tracing::info!(record_id = id, "Updated database with processed results");
                true
            }
            Ok(rows) => {
                tracing::warn!(record_id = id, rows = rows, "No correlation row matched");
                false
            }
            Err(e) => {
                tracing::error!(record_id = id, error = %e, "Error updating database");
                false
            }
        }
    }

    /// Attach the processed payload to the most recently inserted row for a path
    pub async fn update_latest_for_path(
        &self,
        image_path: &str,
        payload: &serde_json::Value,
    ) -> bool {
        let result = match serde_json::to_string(payload) {
            Ok(json) => self.repo.update_latest_for_path(image_path, &json).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(rows) if rows > 0 => {
                tracing::info!(image_path = %image_path, "Updated latest row for image");
                true
            }
            Ok(_) => {
                tracing::warn!(image_path = %image_path, "No correlation row for image");
                false
            }
            Err(e) => {
                tracing::error!(image_path = %image_path, error = %e, "Error updating database");
                false
            }
        }
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<CorrelationRecord>> {
        self.repo.get(id).await
    }

    /// Newest rows first
    pub async fn recent(&self, limit: u32) -> Result<Vec<CorrelationRecord>> {
        self.repo.recent(limit).await
    }

    pub async fn count(&self) -> Result<i64> {
        self.repo.count().await
    }
}
