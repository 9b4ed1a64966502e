use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bg_model::ModelConfig;
use crate::cache::sync::DEFAULT_FETCH_CONCURRENCY;
use crate::logging::LogConfig;
use crate::pace::PaceConfig;
use crate::pmc::PmcConfig;
use crate::readiness::ReadinessConfig;
use crate::run_context::RunWindowConfig;
use crate::zones::{HeartRateZones, ZoneThresholds};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application metadata
    pub metadata: ConfigMetadata,

    /// Athlete physiology
    pub athlete: AthleteSettings,

    /// Heart-rate zone boundaries
    pub zones: ZoneThresholds,

    /// BG response model settings
    pub model: ModelConfig,

    /// Training load settings
    pub pmc: PmcConfig,

    /// Pace calibration settings
    pub pace: PaceConfig,

    /// Readiness thresholds
    pub readiness: ReadinessConfig,

    /// Run-window context sizes
    pub run_context: RunWindowConfig,

    /// Signal cache settings
    pub cache: CacheSettings,

    /// Logging settings
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();
        ConfigMetadata {
            version: "1.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AthleteSettings {
    /// Lactate threshold heart rate in bpm
    pub threshold_hr: f64,

    pub max_hr: Option<f64>,

    /// Display unit for glucose; values are always stored in mmol/L
    pub glucose_unit: String,
}

impl Default for AthleteSettings {
    fn default() -> Self {
        AthleteSettings {
            threshold_hr: 168.0,
            max_hr: None,
            glucose_unit: "mmol/L".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Durable cache database; defaults to `~/.glycorun/cache.db`
    pub db_path: Option<PathBuf>,

    /// Maximum simultaneous stream fetches
    pub fetch_concurrency: usize,

    /// Entries kept in the in-memory tier
    pub local_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            db_path: None,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            local_capacity: 500,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    ///
    /// Writes a sibling temp file first and renames it over the target, so a
    /// failed write leaves the previous file intact.
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        let temp_path = path.with_extension("toml.tmp");
        fs::write(&temp_path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", temp_path.display()))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to replace config file: {}", path.display()))?;

        Ok(())
    }

    /// Default config location
    pub fn default_config_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(
                    path = %config_path.display(),
                    error = %e,
                    "Using default configuration"
                );
                Self::default()
            }
        }
    }

    /// Reject settings the analytics cannot work with
    pub fn validate(&self) -> Result<()> {
        self.zones
            .validate()
            .with_context(|| "Invalid zone configuration")?;

        if !(self.athlete.threshold_hr.is_finite() && self.athlete.threshold_hr > 0.0) {
            anyhow::bail!("threshold_hr must be positive, got {}", self.athlete.threshold_hr);
        }
        if self.readiness.low_floor >= self.readiness.high_ceiling {
            anyhow::bail!(
                "readiness low_floor ({}) must be below high_ceiling ({})",
                self.readiness.low_floor,
                self.readiness.high_ceiling
            );
        }
        if self.cache.fetch_concurrency == 0 {
            anyhow::bail!("cache fetch_concurrency must be at least 1");
        }
        Ok(())
    }

    /// Heart-rate zone frame for the configured athlete
    pub fn heart_rate_zones(&self) -> HeartRateZones {
        HeartRateZones::new(self.athlete.threshold_hr, self.zones)
    }

    /// Durable cache database path
    pub fn cache_db_path(&self) -> PathBuf {
        self.cache
            .db_path
            .clone()
            .unwrap_or_else(|| Self::home_dir().join("cache.db"))
    }

    fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".glycorun")
    }
}
