use crate::models::Zone;
use serde::{Deserialize, Serialize};

/// Errors that can occur when configuring zones
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ZoneError {
    #[error("Invalid threshold value: {0}")]
    InvalidThreshold(String),
    #[error("Zone boundaries must be strictly increasing: {0}")]
    NonMonotonic(String),
}

/// Zone boundaries as percentages of threshold heart rate.
///
/// Each boundary is the inclusive lower edge of the next zone:
/// - Easy: below `steady_pct`
/// - Steady: `steady_pct` to below `tempo_pct`
/// - Tempo: `tempo_pct` to below `hard_pct`
/// - Hard: `hard_pct` and above
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneThresholds {
    pub steady_pct: f64,
    pub tempo_pct: f64,
    pub hard_pct: f64,
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        ZoneThresholds {
            steady_pct: 66.0,
            tempo_pct: 78.0,
            hard_pct: 89.0,
        }
    }
}

impl ZoneThresholds {
    pub fn validate(&self) -> Result<(), ZoneError> {
        for (name, pct) in [
            ("steady_pct", self.steady_pct),
            ("tempo_pct", self.tempo_pct),
            ("hard_pct", self.hard_pct),
        ] {
            if !pct.is_finite() || pct <= 0.0 {
                return Err(ZoneError::InvalidThreshold(format!("{}={}", name, pct)));
            }
        }

        if !(self.steady_pct < self.tempo_pct && self.tempo_pct < self.hard_pct) {
            return Err(ZoneError::NonMonotonic(format!(
                "{} < {} < {}",
                self.steady_pct, self.tempo_pct, self.hard_pct
            )));
        }

        Ok(())
    }

    /// Classify a %-of-threshold value. Exactly one zone matches any input.
    pub fn classify(&self, pct: f64) -> Zone {
        if pct >= self.hard_pct {
            Zone::Hard
        } else if pct >= self.tempo_pct {
            Zone::Tempo
        } else if pct >= self.steady_pct {
            Zone::Steady
        } else {
            Zone::Easy
        }
    }

    /// Inclusive lower and exclusive upper edge of a zone's band
    pub fn band(&self, zone: Zone) -> (f64, Option<f64>) {
        match zone {
            Zone::Easy => (0.0, Some(self.steady_pct)),
            Zone::Steady => (self.steady_pct, Some(self.tempo_pct)),
            Zone::Tempo => (self.tempo_pct, Some(self.hard_pct)),
            Zone::Hard => (self.hard_pct, None),
        }
    }

    /// Representative intensity of a zone, used as the x-axis when fitting
    /// pace against intensity. Open-ended zones mirror the width of their
    /// neighbour.
    pub fn representative_pct(&self, zone: Zone) -> f64 {
        match zone {
            Zone::Easy => self.steady_pct - (self.tempo_pct - self.steady_pct) / 2.0,
            Zone::Steady => (self.steady_pct + self.tempo_pct) / 2.0,
            Zone::Tempo => (self.tempo_pct + self.hard_pct) / 2.0,
            Zone::Hard => self.hard_pct + (self.hard_pct - self.tempo_pct) / 2.0,
        }
    }
}

/// An athlete's heart-rate zone frame: threshold heart rate plus boundaries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateZones {
    /// Threshold heart rate in bpm
    pub threshold_hr: f64,

    pub thresholds: ZoneThresholds,
}

impl HeartRateZones {
    pub fn new(threshold_hr: f64, thresholds: ZoneThresholds) -> Self {
        HeartRateZones {
            threshold_hr,
            thresholds,
        }
    }

    /// Percentage of threshold heart rate, `None` for unusable inputs
    pub fn percent_of_threshold(&self, hr: f64) -> Option<f64> {
        if !hr.is_finite() || !self.threshold_hr.is_finite() || self.threshold_hr <= 0.0 {
            return None;
        }
        Some(hr / self.threshold_hr * 100.0)
    }

    /// Zone of a heart-rate value
    pub fn zone_for(&self, hr: f64) -> Option<Zone> {
        self.percent_of_threshold(hr)
            .map(|pct| self.thresholds.classify(pct))
    }

    /// Heart-rate range (bpm) of a zone
    pub fn hr_range(&self, zone: Zone) -> (f64, Option<f64>) {
        let (low, high) = self.thresholds.band(zone);
        (
            low * self.threshold_hr / 100.0,
            high.map(|h| h * self.threshold_hr / 100.0),
        )
    }
}
