//! Glucose context around each run: before, during and after windows

use crate::models::{GlucoseReading, TimeSeriesPoint, WorkoutRecord};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunWindowConfig {
    /// Minutes before the start included in the `before` window
    pub lookback_minutes: u32,

    /// Minutes after the end included in the `after` window
    pub lookahead_minutes: u32,
}

impl Default for RunWindowConfig {
    fn default() -> Self {
        RunWindowConfig {
            lookback_minutes: 60,
            lookahead_minutes: 120,
        }
    }
}

/// Glucose readings split around one run.
///
/// Point times are whole minutes from the start of the lookback window, so
/// the three windows share one axis. Empty windows mean no device data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunBgContext {
    pub workout_id: String,
    pub before: Vec<TimeSeriesPoint>,
    pub during: Vec<TimeSeriesPoint>,
    pub after: Vec<TimeSeriesPoint>,
}

/// Narrative summary of a run's glucose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunBgSummary {
    /// Last reading at or before the start
    pub start_bg: Option<f64>,

    /// Last reading during the run
    pub end_bg: Option<f64>,
    pub min_bg: Option<f64>,

    /// `end_bg - start_bg`
    pub in_run_change: Option<f64>,
}

impl RunBgContext {
    pub fn has_data(&self) -> bool {
        !(self.before.is_empty() && self.during.is_empty() && self.after.is_empty())
    }

    pub fn summary(&self) -> RunBgSummary {
        let start_bg = self.before.last().or(self.during.first()).map(|p| p.value);
        let end_bg = self.during.last().map(|p| p.value);
        let min_bg = self
            .during
            .iter()
            .map(|p| p.value)
            .fold(None, |min: Option<f64>, v| Some(min.map_or(v, |m| m.min(v))));

        RunBgSummary {
            start_bg,
            end_bg,
            min_bg,
            in_run_change: start_bg.zip(end_bg).map(|(start, end)| end - start),
        }
    }
}

/// Partition the glucose stream into windows around every run.
///
/// Windows are half-open on the left: `before = (start - lookback, start]`,
/// `during = (start, end]`, `after = (end, end + lookahead]`. Every run gets
/// an entry, even without readings.
pub fn build_run_contexts(
    runs: &[WorkoutRecord],
    readings: &[GlucoseReading],
    config: &RunWindowConfig,
) -> BTreeMap<String, RunBgContext> {
    let mut sorted: Vec<&GlucoseReading> = readings.iter().filter(|r| r.mmol.is_finite()).collect();
    sorted.sort_by_key(|r| r.timestamp);

    runs.iter()
        .map(|run| {
            let start = run.start_time;
            let end = run.end_time();
            let origin = start - Duration::minutes(i64::from(config.lookback_minutes));
            let horizon = end + Duration::minutes(i64::from(config.lookahead_minutes));

            let window = |from: DateTime<Utc>, to: DateTime<Utc>| -> Vec<TimeSeriesPoint> {
                sorted
                    .iter()
                    .filter(|r| r.timestamp > from && r.timestamp <= to)
                    .map(|r| {
                        let minutes = (r.timestamp - origin).num_minutes().max(0);
                        TimeSeriesPoint::new(u32::try_from(minutes).unwrap_or(u32::MAX), r.mmol)
                    })
                    .collect()
            };

            let context = RunBgContext {
                workout_id: run.id.clone(),
                before: window(origin, start),
                during: window(start, end),
                after: window(end, horizon),
            };
            (run.id.clone(), context)
        })
        .collect()
}
