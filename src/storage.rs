//! SQLite pool construction and scoped storage operations
//!
//! Every storage call acquires a pooled connection, runs one operation and
//! releases the connection on drop, all inside a short operation timeout.
//! No component holds a connection between calls.

use crate::error::{Error, Result};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Open the SQLite pool, creating the database file (and its directory) if absent
pub async fn connect_pool(database_url: &str, op_timeout: Duration) -> Result<SqlitePool> {
    if let Some(path) = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
    {
        if !path.starts_with(":memory:") {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(op_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(op_timeout)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Acquire a connection for the duration of one operation
pub async fn acquire(pool: &SqlitePool) -> Result<PoolConnection<Sqlite>> {
    pool.acquire()
        .await
        .map_err(|e| Error::Persistence(format!("connection unavailable: {}", e)))
}

/// Run a storage operation under the operation timeout
pub async fn scoped<T, F>(op_timeout: Duration, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(op_timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation = op,
                timeout_ms = op_timeout.as_millis() as u64,
                "Storage operation timed out"
            );
            Err(Error::Persistence(format!(
                "{} timed out after {}ms",
                op,
                op_timeout.as_millis()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("station.db");
        let url = format!("sqlite://{}", db_path.display());

        let pool = connect_pool(&url, Duration::from_secs(2)).await.unwrap();
        let mut conn = acquire(&pool).await.unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(one, 1);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_scoped_timeout() {
        let result: Result<()> = scoped(Duration::from_millis(20), "sleepy", async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Persistence(_))));
    }
}
