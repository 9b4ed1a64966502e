//! Pre-run readiness from live glucose and the historical response model

use crate::bg_model::BgResponseModel;
use crate::models::{GlucoseReading, WorkoutCategory};
use crate::stats::linear_fit;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Below this glucose (mmol/L) the athlete should not start
    pub low_floor: f64,

    /// Above this glucose (mmol/L) starting needs caution
    pub high_ceiling: f64,

    /// Forecasts below this level trigger a pre-run carbohydrate suggestion
    pub target_floor: f64,

    /// Forecast horizon in minutes
    pub forecast_horizon_minutes: u32,

    /// Live readings considered for the trend slope, minutes
    pub trend_window_minutes: u32,

    /// Slope (mmol/L per 10 min) treated as a fast drop when the category has
    /// no history
    pub unknown_category_fast_drop: f64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        ReadinessConfig {
            low_floor: 3.9,
            high_ceiling: 14.0,
            target_floor: 5.0,
            forecast_horizon_minutes: 30,
            trend_window_minutes: 20,
            unknown_category_fast_drop: -1.0,
        }
    }
}

/// Ordered by severity: `Ready < Caution < Wait`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessLevel {
    Ready,
    Caution,
    Wait,
}

impl ReadinessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessLevel::Ready => "ready",
            ReadinessLevel::Caution => "caution",
            ReadinessLevel::Wait => "wait",
        }
    }
}

impl fmt::Display for ReadinessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessGuidance {
    pub level: ReadinessLevel,
    pub reasons: Vec<String>,
    pub suggestions: Vec<String>,

    /// Forecast glucose at the horizon, omitted when the category has no history
    pub estimated_bg_at_30m: Option<f64>,
    pub predicted_drop: Option<f64>,

    /// Minutes ahead the forecast looks
    pub horizon_minutes: u32,
}

/// Assess whether the athlete is ready to start a run of `category`.
///
/// Two axes contribute: the absolute glucose level and the live trend
/// compared with the category's historical rate. The overall level is the
/// more severe of the two.
pub fn assess_readiness(
    current_bg: f64,
    trend_slope: f64,
    model: &BgResponseModel,
    category: WorkoutCategory,
    config: &ReadinessConfig,
) -> ReadinessGuidance {
    if !current_bg.is_finite() {
        debug!(category = %category, "No valid glucose reading for readiness");
        return ReadinessGuidance {
            level: ReadinessLevel::Wait,
            reasons: vec!["No valid glucose reading".to_string()],
            suggestions: vec!["Recheck glucose with a fingerstick before starting".to_string()],
            estimated_bg_at_30m: None,
            predicted_drop: None,
            horizon_minutes: config.forecast_horizon_minutes,
        };
    }

    let mut reasons = Vec::new();
    let mut suggestions = Vec::new();

    let level_axis = if current_bg < config.low_floor {
        reasons.push(format!(
            "Glucose {:.1} mmol/L is below the {:.1} mmol/L safety floor",
            current_bg, config.low_floor
        ));
        suggestions.push("Take fast-acting carbohydrate and recheck in 15 minutes".to_string());
        ReadinessLevel::Wait
    } else if current_bg > config.high_ceiling {
        reasons.push(format!(
            "Glucose {:.1} mmol/L is above the {:.1} mmol/L ceiling",
            current_bg, config.high_ceiling
        ));
        suggestions.push("Check ketones before starting".to_string());
        ReadinessLevel::Caution
    } else {
        ReadinessLevel::Ready
    };

    let history = model.categories.get(category);
    let historical_rate = history.map(|stats| stats.avg_rate);

    let trend_axis = match historical_rate {
        _ if !trend_slope.is_finite() => {
            reasons.push("Glucose trend is unknown".to_string());
            ReadinessLevel::Ready
        }
        Some(avg_rate) if trend_slope < 0.0 && trend_slope < avg_rate => {
            reasons.push(format!(
                "Glucose is falling at {:.1} mmol/L per 10 min, faster than the usual {:.1} on {} runs",
                trend_slope, avg_rate, category
            ));
            suggestions.push("Pre-fuel with 15-20 g of carbohydrate before starting".to_string());
            if avg_rate < 0.0 && trend_slope <= 2.0 * avg_rate {
                ReadinessLevel::Wait
            } else {
                ReadinessLevel::Caution
            }
        }
        None if trend_slope < config.unknown_category_fast_drop => {
            reasons.push(format!(
                "Glucose is falling fast at {:.1} mmol/L per 10 min",
                trend_slope
            ));
            suggestions.push("Pre-fuel with 15-20 g of carbohydrate before starting".to_string());
            ReadinessLevel::Wait
        }
        None if trend_slope < 0.0 => {
            reasons.push(format!(
                "Glucose is falling at {:.1} mmol/L per 10 min with no {} history to compare",
                trend_slope, category
            ));
            ReadinessLevel::Caution
        }
        _ => ReadinessLevel::Ready,
    };

    let steps = f64::from(config.forecast_horizon_minutes) / 10.0;
    let estimated = historical_rate
        .map(|rate| current_bg + steps * rate)
        .filter(|bg| bg.is_finite());
    let predicted_drop = estimated.map(|bg| bg - current_bg);

    if let Some(bg) = estimated {
        if bg < config.target_floor && current_bg >= config.low_floor {
            suggestions.push(format!(
                "Expected {:.1} mmol/L after {} min: take carbohydrate before the start",
                bg, config.forecast_horizon_minutes
            ));
        }
    }

    if let Some(target) = model.target_fuel_rate(category) {
        suggestions.push(format!(
            "Fuel at ~{:.0} g/h during the run",
            target.target_fuel_rate
        ));
    }

    let level = level_axis.max(trend_axis);
    debug!(%level, current_bg, trend_slope, category = %category, "Assessed readiness");

    ReadinessGuidance {
        level,
        reasons,
        suggestions,
        estimated_bg_at_30m: estimated,
        predicted_drop,
        horizon_minutes: config.forecast_horizon_minutes,
    }
}

/// Live glucose slope in mmol/L per 10 min at `now`.
///
/// Least-squares fit over readings in the last `window_minutes`; with fewer
/// than two usable readings the latest reading's trend arrow is used.
pub fn trend_slope(readings: &[GlucoseReading], now: DateTime<Utc>, window_minutes: u32) -> Option<f64> {
    let since = now - Duration::minutes(i64::from(window_minutes));
    let recent: Vec<&GlucoseReading> = readings
        .iter()
        .filter(|r| r.timestamp > since && r.timestamp <= now && r.mmol.is_finite())
        .collect();

    let points: Vec<(f64, f64)> = recent
        .iter()
        .map(|r| ((r.timestamp - since).num_seconds() as f64 / 60.0, r.mmol))
        .collect();

    if let Some(fit) = linear_fit(&points) {
        return Some(fit.slope * 10.0);
    }

    readings
        .iter()
        .filter(|r| r.timestamp <= now)
        .max_by_key(|r| r.timestamp)
        .and_then(|r| r.trend.nominal_rate_per_10min())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bg_model::{build_model, ModelConfig};
    use crate::models::{ReducedWorkout, TimeSeriesPoint, TrendArrow};
    use crate::zones::{HeartRateZones, ZoneThresholds};
    use chrono::{NaiveDate, TimeZone};

    /// Model where long runs drop glucose at `rate` mmol/L per 10 min
    fn model_with_long_rate(rate: f64, fuel: Option<f64>) -> BgResponseModel {
        let workout = ReducedWorkout {
            workout_id: "long-1".to_string(),
            category: WorkoutCategory::Long,
            prescribed_fuel_rate: fuel,
            starting_glucose: Some(9.0),
            glucose: vec![
                TimeSeriesPoint::new(0, 9.0),
                TimeSeriesPoint::new(20, 9.0 + 2.0 * rate),
            ],
            heart_rate: (0..=20).map(|t| TimeSeriesPoint::new(t, 110.0)).collect(),
            pace: None,
            cadence: None,
            altitude: None,
            date: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
        };
        build_model(
            &[workout],
            &HeartRateZones::new(170.0, ZoneThresholds::default()),
            &ModelConfig::default(),
        )
    }

    #[test]
    fn test_below_floor_waits() {
        let model = model_with_long_rate(-0.4, None);
        let guidance = assess_readiness(3.5, -0.8, &model, WorkoutCategory::Long, &ReadinessConfig::default());

        assert_eq!(guidance.level, ReadinessLevel::Wait);
        assert!(guidance.reasons.iter().any(|r| r.contains("3.9")));
    }

    #[test]
    fn test_in_range_and_flat_is_ready() {
        let model = model_with_long_rate(-0.4, None);
        let guidance = assess_readiness(8.0, 0.0, &model, WorkoutCategory::Long, &ReadinessConfig::default());

        assert_eq!(guidance.level, ReadinessLevel::Ready);
        assert!(guidance.reasons.is_empty());
        let estimated = guidance.estimated_bg_at_30m.unwrap();
        assert!((estimated - 6.8).abs() < 1e-9);
        assert!((guidance.predicted_drop.unwrap() - (-1.2)).abs() < 1e-9);
    }

    #[test]
    fn test_high_glucose_is_caution() {
        let model = model_with_long_rate(-0.4, None);
        let guidance = assess_readiness(15.2, 0.3, &model, WorkoutCategory::Long, &ReadinessConfig::default());
        assert_eq!(guidance.level, ReadinessLevel::Caution);
    }

    #[test]
    fn test_falling_faster_than_history() {
        let model = model_with_long_rate(-0.5, None);
        let config = ReadinessConfig::default();

        let caution = assess_readiness(9.0, -0.7, &model, WorkoutCategory::Long, &config);
        assert_eq!(caution.level, ReadinessLevel::Caution);
        assert!(caution.suggestions.iter().any(|s| s.contains("Pre-fuel")));

        let wait = assess_readiness(9.0, -1.2, &model, WorkoutCategory::Long, &config);
        assert_eq!(wait.level, ReadinessLevel::Wait);
    }

    #[test]
    fn test_unknown_category_omits_forecast() {
        let model = model_with_long_rate(-0.5, None);
        let guidance = assess_readiness(8.0, -0.2, &model, WorkoutCategory::Interval, &ReadinessConfig::default());

        assert_eq!(guidance.estimated_bg_at_30m, None);
        assert_eq!(guidance.predicted_drop, None);
        assert_eq!(guidance.level, ReadinessLevel::Caution);

        let empty = BgResponseModel::default();
        let fast = assess_readiness(8.0, -1.5, &empty, WorkoutCategory::Easy, &ReadinessConfig::default());
        assert_eq!(fast.level, ReadinessLevel::Wait);
    }

    #[test]
    fn test_low_forecast_and_fuel_target_suggestions() {
        let model = model_with_long_rate(-1.0, Some(40.0));
        let guidance = assess_readiness(6.5, 0.0, &model, WorkoutCategory::Long, &ReadinessConfig::default());

        assert!(guidance.suggestions.iter().any(|s| s.contains("after 30 min")));
        assert!(guidance.suggestions.iter().any(|s| s.contains("~40 g/h")));
    }

    #[test]
    fn test_forecast_follows_configured_horizon() {
        let model = model_with_long_rate(-0.4, None);
        let config = ReadinessConfig {
            forecast_horizon_minutes: 45,
            ..ReadinessConfig::default()
        };
        let guidance = assess_readiness(8.0, 0.0, &model, WorkoutCategory::Long, &config);

        assert_eq!(guidance.horizon_minutes, 45);
        assert!((guidance.estimated_bg_at_30m.unwrap() - 6.2).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_glucose_never_ready() {
        let empty = BgResponseModel::default();
        let config = ReadinessConfig::default();

        let guidance = assess_readiness(f64::NAN, f64::NAN, &empty, WorkoutCategory::Long, &config);
        assert_eq!(guidance.level, ReadinessLevel::Wait);
        assert!(guidance.reasons.iter().any(|r| r.contains("No valid glucose")));
        assert_eq!(guidance.estimated_bg_at_30m, None);

        let infinite = assess_readiness(f64::INFINITY, 0.0, &empty, WorkoutCategory::Long, &config);
        assert_eq!(infinite.level, ReadinessLevel::Wait);
    }

    #[test]
    fn test_unknown_trend_adds_reason_without_escalating() {
        let model = model_with_long_rate(-0.4, None);
        let guidance = assess_readiness(8.0, f64::NAN, &model, WorkoutCategory::Long, &ReadinessConfig::default());

        assert_eq!(guidance.level, ReadinessLevel::Ready);
        assert!(guidance.reasons.iter().any(|r| r.contains("trend is unknown")));
        assert!(guidance.estimated_bg_at_30m.is_some());
    }

    fn reading(minute: i64, mmol: f64, trend: TrendArrow) -> GlucoseReading {
        GlucoseReading {
            timestamp: Utc.with_ymd_and_hms(2024, 9, 1, 7, 0, 0).unwrap() + Duration::minutes(minute),
            mmol,
            trend,
        }
    }

    #[test]
    fn test_trend_slope_fit() {
        let readings = vec![
            reading(0, 9.0, TrendArrow::Flat),
            reading(5, 8.5, TrendArrow::FortyFiveDown),
            reading(10, 8.0, TrendArrow::FortyFiveDown),
            reading(15, 7.5, TrendArrow::SingleDown),
        ];
        let now = readings[3].timestamp;

        let slope = trend_slope(&readings, now, 20).unwrap();
        assert!((slope - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_trend_slope_falls_back_to_arrow() {
        let readings = vec![reading(0, 9.0, TrendArrow::Flat), reading(30, 7.0, TrendArrow::SingleDown)];
        let now = readings[1].timestamp;

        assert_eq!(trend_slope(&readings, now, 20), Some(-1.1));
        assert_eq!(trend_slope(&[], now, 20), None);
    }
}
