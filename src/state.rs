//! Application state and configuration

use crate::annotator::Annotator;
use crate::correlation_store::CorrelationStore;
use crate::device_source::DeviceSource;
use crate::error::{Error, Result};
use crate::event_broadcaster::EventBroadcaster;
use crate::gateway::OrchestratorClient;
use crate::orchestrator::Orchestrator;
use crate::scoring_engine::{RandomScorer, Scorer, ScoringEngine};
use crate::settings_store::SettingsStore;
use crate::storage;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Which HTTP surfaces this process serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    /// Orchestrator host only
    Backend,
    /// Public Gateway only
    Gateway,
    /// Both, in one process
    All,
}

impl ServiceMode {
    pub fn runs_backend(&self) -> bool {
        matches!(self, ServiceMode::Backend | ServiceMode::All)
    }

    pub fn runs_gateway(&self) -> bool {
        matches!(self, ServiceMode::Gateway | ServiceMode::All)
    }
}

impl FromStr for ServiceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backend" => Ok(ServiceMode::Backend),
            "gateway" => Ok(ServiceMode::Gateway),
            "all" => Ok(ServiceMode::All),
            other => Err(Error::Config(format!("unknown SERVICE_MODE: {}", other))),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service_mode: ServiceMode,
    /// SQLite URL for correlation rows and settings
    pub database_url: String,
    /// Source image namespace (DeviceSource root)
    pub images_dir: PathBuf,
    /// Processed artifact namespace
    pub processed_dir: PathBuf,
    /// Orchestrator host listener
    pub backend_host: String,
    pub backend_port: u16,
    /// Gateway listener
    pub host: String,
    pub port: u16,
    /// Gateway -> Orchestrator host base URL
    pub backend_url: String,
    pub backend_timeout: Duration,
    /// Attempts for idempotent reads across the boundary
    pub backend_read_attempts: u32,
    /// Per-operation storage timeout
    pub storage_timeout: Duration,
    pub log_capacity: usize,
    pub default_threshold: f64,
    pub annotation_font: Option<PathBuf>,
    /// Optional UI directory served by the Gateway
    pub static_dir: Option<PathBuf>,
    pub environment: String,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for AppConfig {
    fn default() -> Self {
        let service_mode = match std::env::var("SERVICE_MODE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to SERVICE_MODE=all");
                ServiceMode::All
            }),
            Err(_) => ServiceMode::All,
        };

        Self {
            service_mode,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/vision_system.db".to_string()),
            images_dir: std::env::var("IMAGES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/images")),
            processed_dir: std::env::var("PROCESSED_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/processed_images")),
            backend_host: std::env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            backend_port: env_parse("BACKEND_PORT", 5001),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 5000),
            backend_url: std::env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5001".to_string()),
            backend_timeout: Duration::from_secs(env_parse("BACKEND_TIMEOUT_SEC", 30)),
            backend_read_attempts: env_parse("BACKEND_READ_ATTEMPTS", 1u32)
                .clamp(1, crate::gateway::MAX_READ_ATTEMPTS),
            storage_timeout: Duration::from_millis(env_parse("STORAGE_TIMEOUT_MS", 5000)),
            log_capacity: env_parse("LOG_CAPACITY", 100),
            default_threshold: env_parse("DEFAULT_THRESHOLD", 0.5),
            annotation_font: std::env::var("ANNOTATION_FONT").ok().map(PathBuf::from),
            static_dir: std::env::var("STATIC_DIR").ok().map(PathBuf::from),
            environment: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        }
    }
}

/// Shared state of the Orchestrator host process
#[derive(Clone)]
pub struct BackendState {
    pub pool: SqlitePool,
    pub config: AppConfig,
    /// SettingsStore (SSoT for the threshold)
    pub settings: Arc<SettingsStore>,
    pub correlation: Arc<CorrelationStore>,
    pub source: Arc<DeviceSource>,
    pub engine: Arc<ScoringEngine>,
    pub orchestrator: Arc<Orchestrator>,
}

impl BackendState {
    /// Build the pipeline with the stand-in random scorer
    pub async fn initialize(config: AppConfig, events: Option<Arc<EventBroadcaster>>) -> Result<Self> {
        Self::initialize_with_scorer(config, Box::new(RandomScorer), events).await
    }

    /// Open storage, connect the source and load the scorer
    pub async fn initialize_with_scorer(
        config: AppConfig,
        scorer: Box<dyn Scorer>,
        events: Option<Arc<EventBroadcaster>>,
    ) -> Result<Self> {
        tracing::info!(database_url = %config.database_url, "Opening database");
        let pool = storage::connect_pool(&config.database_url, config.storage_timeout).await?;

        let settings = Arc::new(SettingsStore::new(
            pool.clone(),
            config.storage_timeout,
            config.default_threshold,
        ));
        let correlation = Arc::new(CorrelationStore::new(pool.clone(), config.storage_timeout));

        let source = Arc::new(DeviceSource::new(0, config.images_dir.clone()));
        source.connect().await?;

        let engine = Arc::new(ScoringEngine::new(scorer, settings.clone(), correlation.clone()));
        engine.load_model();

        let annotator = Arc::new(Annotator::new(
            config.processed_dir.clone(),
            correlation.clone(),
            config.annotation_font.as_deref(),
        ));

        let mut orchestrator = Orchestrator::new(source.clone(), engine.clone(), annotator);
        if let Some(events) = events {
            orchestrator = orchestrator.with_events(events);
        }

        Ok(Self {
            pool,
            config,
            settings,
            correlation,
            source,
            engine,
            orchestrator: Arc::new(orchestrator),
        })
    }
}

/// Shared state of the Gateway process
#[derive(Clone)]
pub struct GatewayState {
    pub config: AppConfig,
    /// Client for the Orchestrator host boundary
    pub client: Arc<OrchestratorClient>,
    /// EventBroadcaster (log ring + WebSocket fan-out)
    pub events: Arc<EventBroadcaster>,
}

impl GatewayState {
    pub fn new(config: AppConfig, events: Arc<EventBroadcaster>) -> Result<Self> {
        let client = OrchestratorClient::new(
            &config.backend_url,
            config.backend_timeout,
            config.backend_read_attempts,
        )?;
        Ok(Self {
            config,
            client: Arc::new(client),
            events,
        })
    }
}
