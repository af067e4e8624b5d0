//! Inspection Station Library
//!
//! Automated visual-inspection station: capture, score, annotate, persist
//! and broadcast.
//!
//! ## Architecture (8 Components)
//!
//! 1. SettingsStore - Durable confidence threshold (SSoT)
//! 2. DeviceSource - Simulated camera over an image directory
//! 3. ScoringEngine - Pluggable scorer + PASS/FAIL verdict
//! 4. Annotator - Processed artifact with embedded metadata
//! 5. CorrelationStore - Raw/processed result rows
//! 6. Orchestrator - Capture cycle state machine
//! 7. Gateway - Public proxy to the Orchestrator host
//! 8. EventBroadcaster - Log ring + live fan-out
//!
//! ## Data flow
//!
//! trigger -> Gateway -> Orchestrator -> {DeviceSource, ScoringEngine,
//! Annotator, CorrelationStore} -> Gateway -> EventBroadcaster + caller

pub mod annotator;
pub mod backend_api;
pub mod correlation_store;
pub mod device_source;
pub mod error;
pub mod event_broadcaster;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod scoring_engine;
pub mod settings_store;
pub mod state;
pub mod storage;

pub use error::{Error, Result};
