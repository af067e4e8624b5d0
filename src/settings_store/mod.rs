//! SettingsStore - Single Source of Truth for inspection settings
//!
//! ## Responsibilities
//!
//! - Durable confidence threshold
//! - Validation of threshold updates
//! - Live reads for the scoring path (no long-lived cache)
//!
//! Both the scoring path and the control API consult this store; the
//! Gateway forwards its settings traffic here instead of keeping a copy.

mod repository;
mod types;

pub use repository::SettingsRepository;
pub use types::*;

use crate::error::{Error, Result};
use crate::models::Settings;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::RwLock;

/// SettingsStore instance
pub struct SettingsStore {
    repo: SettingsRepository,
    default_threshold: f64,
    /// Last value read or written; served only when storage is unreachable
    last_known: RwLock<Settings>,
}

impl SettingsStore {
    /// Create new SettingsStore
    pub fn new(pool: SqlitePool, op_timeout: Duration, default_threshold: f64) -> Self {
        let default_threshold = validate_threshold(default_threshold)
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        Self {
            repo: SettingsRepository::new(pool, op_timeout),
            default_threshold,
            last_known: RwLock::new(Settings {
                confidence_threshold: default_threshold,
            }),
        }
    }

    /// Read the persisted settings
    pub async fn try_get(&self) -> Result<Settings> {
        let doc = self.repo.get_setting(INSPECTION_SETTINGS_KEY).await?;

        let threshold = doc
            .as_ref()
            .and_then(|d| d.get("confidence_threshold"))
            .and_then(|v| v.as_f64())
            .and_then(|v| validate_threshold(v).ok())
            .unwrap_or(self.default_threshold);

        let settings = Settings {
            confidence_threshold: threshold,
        };
        *self.last_known.write().await = settings;
        Ok(settings)
    }

    /// Read the current settings, falling back to the last known value
    pub async fn get(&self) -> Settings {
        match self.try_get().await {
            Ok(settings) => settings,
            Err(e) => {
                let fallback = *self.last_known.read().await;
                tracing::warn!(
                    error = %e,
                    threshold = fallback.confidence_threshold,
                    "Settings read failed, using last known value"
                );
                fallback
            }
        }
    }

    /// Current confidence threshold
    pub async fn threshold(&self) -> f64 {
        self.get().await.confidence_threshold
    }

    /// Validate and persist a new threshold
    pub async fn set_threshold(&self, value: f64) -> Result<Settings> {
        let threshold = validate_threshold(value)?;
        let settings = Settings {
            confidence_threshold: threshold,
        };

        self.repo
            .set_setting(INSPECTION_SETTINGS_KEY, &serde_json::to_value(settings)?)
            .await?;

        *self.last_known.write().await = settings;
        tracing::info!(threshold = threshold, "Confidence threshold updated");
        Ok(settings)
    }
}

/// Accept finite values in [0,1]
pub fn validate_threshold(value: f64) -> Result<f64> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(Error::InvalidThreshold(
            "Confidence threshold must be between 0 and 1".to_string(),
        ))
    }
}

/// Parse a JSON number or numeric string into a validated threshold
pub fn parse_threshold(value: &serde_json::Value) -> Result<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) => validate_threshold(v),
        None => Err(Error::InvalidThreshold(
            "Invalid confidence threshold format".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;
    use serde_json::json;

    async fn test_store(dir: &tempfile::TempDir) -> SettingsStore {
        let url = format!("sqlite://{}", dir.path().join("settings.db").display());
        let pool = storage::connect_pool(&url, Duration::from_secs(2))
            .await
            .unwrap();
        SettingsStore::new(pool, Duration::from_secs(2), 0.5)
    }

    #[tokio::test]
    async fn test_default_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        assert_eq!(store.threshold().await, 0.5);
    }

    #[tokio::test]
    async fn test_set_is_persisted_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        store.set_threshold(0.8).await.unwrap();
        store.set_threshold(0.8).await.unwrap();
        assert_eq!(store.try_get().await.unwrap().confidence_threshold, 0.8);

        // A second store on the same database sees the same value
        let other = test_store(&dir).await;
        assert_eq!(other.threshold().await, 0.8);
    }

    #[tokio::test]
    async fn test_out_of_range_rejected_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store.set_threshold(0.3).await.unwrap();

        for bad in [1.5, -0.1, f64::NAN, f64::INFINITY] {
            let result = store.set_threshold(bad).await;
            assert!(matches!(result, Err(Error::InvalidThreshold(_))));
        }
        assert_eq!(store.threshold().await, 0.3);
    }

    #[tokio::test]
    async fn test_boundaries_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store.set_threshold(0.0).await.unwrap();
        assert_eq!(store.threshold().await, 0.0);
        store.set_threshold(1.0).await.unwrap();
        assert_eq!(store.threshold().await, 1.0);
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold(&json!(0.25)).unwrap(), 0.25);
        assert_eq!(parse_threshold(&json!("0.75")).unwrap(), 0.75);
        assert_eq!(parse_threshold(&json!(1)).unwrap(), 1.0);
        assert!(parse_threshold(&json!("abc")).is_err());
        assert!(parse_threshold(&json!(null)).is_err());
        assert!(parse_threshold(&json!(1.5)).is_err());
        assert!(parse_threshold(&json!([0.5])).is_err());
    }
}
