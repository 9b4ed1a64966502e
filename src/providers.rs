//! Interfaces to the external data services
//!
//! The pipeline never talks to a vendor API directly. It consumes these traits,
//! which the presentation layer implements on top of its HTTP clients. The
//! JSON-file implementations back the CLI and the integration tests.

use crate::error::ProviderError;
use crate::models::{GlucoseReading, RawStreams};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Source of raw per-second workout sensor streams
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Provider name used in logs and errors
    fn name(&self) -> &'static str;

    /// Fetch the raw streams recorded for one workout
    async fn fetch_streams(&self, workout_id: &str) -> Result<RawStreams, ProviderError>;
}

/// Source of continuous glucose readings
#[async_trait]
pub trait GlucoseProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Time-ordered readings with `from <= timestamp <= to`
    async fn readings(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<GlucoseReading>, ProviderError>;
}

/// Reads `<dir>/<workout_id>.json` files holding serialized [`RawStreams`]
#[derive(Debug, Clone)]
pub struct JsonDirStreamProvider {
    dir: PathBuf,
}

impl JsonDirStreamProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl StreamProvider for JsonDirStreamProvider {
    fn name(&self) -> &'static str {
        "json-dir"
    }

    async fn fetch_streams(&self, workout_id: &str) -> Result<RawStreams, ProviderError> {
        let path = self.dir.join(format!("{}.json", workout_id));
        let content = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProviderError::NotFound {
                resource: path.display().to_string(),
            },
            _ => ProviderError::Unreachable {
                provider: self.name().to_string(),
                reason: e.to_string(),
            },
        })?;

        serde_json::from_slice(&content).map_err(|e| ProviderError::Malformed {
            provider: self.name().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Serves readings from a JSON array file loaded once at construction
#[derive(Debug, Clone)]
pub struct JsonFileGlucoseProvider {
    readings: Vec<GlucoseReading>,
}

impl JsonFileGlucoseProvider {
    pub fn from_readings(mut readings: Vec<GlucoseReading>) -> Self {
        readings.sort_by_key(|r| r.timestamp);
        Self { readings }
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let path = path.into();
        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| ProviderError::Unreachable {
                provider: "json-file".to_string(),
                reason: format!("{}: {}", path.display(), e),
            })?;
        let readings: Vec<GlucoseReading> =
            serde_json::from_slice(&content).map_err(|e| ProviderError::Malformed {
                provider: "json-file".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_readings(readings))
    }
}

#[async_trait]
impl GlucoseProvider for JsonFileGlucoseProvider {
    fn name(&self) -> &'static str {
        "json-file"
    }

    async fn readings(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<GlucoseReading>, ProviderError> {
        Ok(self
            .readings
            .iter()
            .filter(|r| r.timestamp >= from && r.timestamp <= to)
            .cloned()
            .collect())
    }
}
