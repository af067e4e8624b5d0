//! SettingsStore data types

use chrono::{DateTime, Utc};

/// Key under which the inspection settings document is stored
pub const INSPECTION_SETTINGS_KEY: &str = "inspection";

/// Threshold used until one has been persisted
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Raw settings row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SettingRow {
    pub setting_key: String,
    pub setting_json: String,
    pub updated_at: DateTime<Utc>,
}
