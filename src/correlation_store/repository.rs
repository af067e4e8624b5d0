//! CorrelationStore Repository
//!
//! Raw SQL against the `results` table. Every call is one scoped
//! connection acquisition under the operation timeout.

use super::CorrelationRecord;
use crate::error::Result;
use crate::models::{RecordId, Verdict};
use crate::storage;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

const CREATE_RESULTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL,
        image_path TEXT NOT NULL,
        inference_results TEXT NOT NULL,
        processed_results TEXT,
        confidence REAL NOT NULL
    )
"#;

const CREATE_IMAGE_PATH_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_results_image_path ON results (image_path, id)";

const RECORD_COLUMNS: &str =
    "id, created_at, image_path, inference_results, processed_results, confidence";

/// Repository for correlation rows
#[derive(Clone)]
pub struct CorrelationRepository {
    pool: SqlitePool,
    op_timeout: Duration,
    schema: Arc<OnceCell<()>>,
}

impl CorrelationRepository {
    pub fn new(pool: SqlitePool, op_timeout: Duration) -> Self {
        Self {
            pool,
            op_timeout,
            schema: Arc::new(OnceCell::new()),
        }
    }

    /// Create table and index if absent (once per process)
    pub async fn ensure_schema(&self) -> Result<()> {
        self.schema
            .get_or_try_init(|| async {
                storage::scoped(self.op_timeout, "results.schema", async {
                    let mut conn = storage::acquire(&self.pool).await?;
                    sqlx::query(CREATE_RESULTS_TABLE)
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query(CREATE_IMAGE_PATH_INDEX)
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
                .await
            })
            .await?;
        Ok(())
    }

    pub async fn insert(
        &self,
        image_path: &str,
        verdict: Verdict,
        confidence: f64,
    ) -> Result<RecordId> {
        self.ensure_schema().await?;
        let now = Utc::now();

        storage::scoped(self.op_timeout, "results.insert", async {
            let mut conn = storage::acquire(&self.pool).await?;
            let result = sqlx::query(
                r#"
                INSERT INTO results (created_at, image_path, inference_results, confidence)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(now)
            .bind(image_path)
            .bind(verdict.as_str())
            .bind(confidence)
            .execute(&mut *conn)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await
    }

    /// Attach processed payload to one row by id; returns rows affected
    pub async fn update_by_id(&self, id: RecordId, payload: &str) -> Result<u64> {
        self.ensure_schema().await?;

        storage::scoped(self.op_timeout, "results.update", async {
            let mut conn = storage::acquire(&self.pool).await?;
            let result = sqlx::query("UPDATE results SET processed_results = ? WHERE id = ?")
                .bind(payload)
                .bind(id)
                .execute(&mut *conn)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Attach processed payload to the highest-id row for `image_path`
    pub async fn update_latest_for_path(&self, image_path: &str, payload: &str) -> Result<u64> {
        self.ensure_schema().await?;

        storage::scoped(self.op_timeout, "results.update_latest", async {
            let mut conn = storage::acquire(&self.pool).await?;
            let result = sqlx::query(
                r#"
                UPDATE results SET processed_results = ?
                WHERE id = (SELECT MAX(id) FROM results WHERE image_path = ?)
                "#,
            )
            .bind(payload)
            .bind(image_path)
            .execute(&mut *conn)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<CorrelationRecord>> {
        self.ensure_schema().await?;

        let query = format!("SELECT {} FROM results WHERE id = ?", RECORD_COLUMNS);
        let row = storage::scoped(self.op_timeout, "results.get", async {
            let mut conn = storage::acquire(&self.pool).await?;
            let row = sqlx::query(&query)
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
            Ok(row)
        })
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<CorrelationRecord>> {
        self.ensure_schema().await?;

        let query = format!(
            "SELECT {} FROM results ORDER BY id DESC LIMIT ?",
            RECORD_COLUMNS
        );
        let rows = storage::scoped(self.op_timeout, "results.recent", async {
            let mut conn = storage::acquire(&self.pool).await?;
            let rows = sqlx::query(&query)
                .bind(i64::from(limit))
                .fetch_all(&mut *conn)
                .await?;
            Ok(rows)
        })
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        self.ensure_schema().await?;

        storage::scoped(self.op_timeout, "results.count", async {
            let mut conn = storage::acquire(&self.pool).await?;
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM results")
                .fetch_one(&mut *conn)
                .await?;
            Ok(count)
        })
        .await
    }
}

fn record_from_row(row: &SqliteRow) -> Result<CorrelationRecord> {
    let verdict: String = row.try_get("inference_results")?;
    let processed: Option<String> = row.try_get("processed_results")?;
    let processed_result = match processed {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(CorrelationRecord {
        id: row.try_get("id")?,
        created_at,
        image_path: row.try_get("image_path")?,
        verdict: verdict.parse()?,
        confidence: row.try_get("confidence")?,
        processed_result,
    })
}
