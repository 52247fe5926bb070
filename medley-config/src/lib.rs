//! Shared configuration library for Medley.
//!
//! This crate centralizes the typed configuration model (pairs, sync flags,
//! runtime knobs, blackbox settings, telemetry thresholds) and the JSON
//! loader, so there is a single source of truth for defaults and shapes.

pub mod error;
pub mod feature;
pub mod loader;
pub mod models;

pub use error::ConfigError;
pub use feature::{DEFAULT_FEATURES, SyncFeature};
pub use loader::{load_config, parse_config};
pub use models::{
    BlackboxSettings, Config, FeatureGates, FeatureOptions, FeatureToggle, PairConfig,
    RuntimeSettings, SyncMode, SyncSettings, TelemetrySettings,
};
