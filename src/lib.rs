// Library interface for glycorun modules
// This allows integration tests, benches and the CLI to share the core

pub mod bg_model;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod pace;
pub mod pmc;
pub mod providers;
pub mod readiness;
pub mod reducer;
pub mod run_context;
pub mod stats;
pub mod zones;

// Re-export commonly used types for convenience
pub use models::*;
pub use bg_model::{build_model, BgResponseModel, ModelConfig};
pub use cache::{LocalStore, SignalCache, SignalStore, SqliteStore, SyncOutcome, SyncProgress};
pub use pace::{calibrate_pace, CalibratedPaceTable, PaceConfig};
pub use pmc::{compute_fitness, compute_insights, FitnessDataPoint, FitnessInsights, FormZone, PmcConfig};
pub use readiness::{assess_readiness, ReadinessConfig, ReadinessGuidance, ReadinessLevel};
pub use reducer::reduce_streams;
pub use run_context::{build_run_contexts, RunBgContext, RunWindowConfig};
pub use zones::{HeartRateZones, ZoneThresholds};
pub use error::{GlycoError, ProviderError, CacheError, Result};
pub use logging::{LogConfig, LogLevel, LogFormat};
