//! SettingsStore Repository
//!
//! Database access layer for the `settings` table

use super::types::SettingRow;
use crate::error::Result;
use crate::storage;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::OnceCell;

const CREATE_SETTINGS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS settings (
        setting_key TEXT PRIMARY KEY,
        setting_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

/// Settings repository for database operations
#[derive(Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
    op_timeout: Duration,
    schema: std::sync::Arc<OnceCell<()>>,
}

impl SettingsRepository {
    /// Create new repository
    pub fn new(pool: SqlitePool, op_timeout: Duration) -> Self {
        Self {
            pool,
            op_timeout,
            schema: std::sync::Arc::new(OnceCell::new()),
        }
    }

    /// Create the settings table if absent (once per process)
    async fn ensure_schema(&self) -> Result<()> {
        self.schema
            .get_or_try_init(|| async {
                storage::scoped(self.op_timeout, "settings.schema", async {
                    let mut conn = storage::acquire(&self.pool).await?;
                    sqlx::query(CREATE_SETTINGS_TABLE)
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
                .await
            })
            .await?;
        Ok(())
    }

    /// Get setting document by key
    pub async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.ensure_schema().await?;

        let row = storage::scoped(self.op_timeout, "settings.get", async {
            let mut conn = storage::acquire(&self.pool).await?;
            let row = sqlx::query_as::<_, SettingRow>(
                "SELECT setting_key, setting_json, updated_at FROM settings WHERE setting_key = ?",
            )
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
            Ok(row)
        })
        .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.setting_json)?)),
            None => Ok(None),
        }
    }

    /// Set setting document (upsert)
    pub async fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.ensure_schema().await?;

        let json = serde_json::to_string(value)?;
        let now = chrono::Utc::now();

        storage::scoped(self.op_timeout, "settings.set", async {
            let mut conn = storage::acquire(&self.pool).await?;
            sqlx::query(
                r#"
                INSERT INTO settings (setting_key, setting_json, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(setting_key) DO UPDATE
                SET setting_json = excluded.setting_json, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(&json)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            Ok(())
        })
        .await
    }
}
