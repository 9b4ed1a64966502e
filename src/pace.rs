//! Pace calibration from heart-rate-zoned segments
//!
//! Learns the athlete's typical pace per zone from steady stretches of their
//! own runs, falling back to a reference table for zones never observed.

use crate::models::{ReducedWorkout, TimeSeriesPoint, Zone};
use crate::reducer::{MAX_PACE_MIN_PER_KM, MIN_PACE_MIN_PER_KM};
use crate::stats::{linear_fit, mean};
use crate::zones::HeartRateZones;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Static per-zone paces in min/km used when a zone has no data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencePaces {
    pub easy: f64,
    pub steady: f64,
    pub tempo: f64,
    pub hard: f64,
}

impl Default for ReferencePaces {
    fn default() -> Self {
        ReferencePaces {
            easy: 6.5,
            steady: 5.75,
            tempo: 5.1,
            hard: 4.6,
        }
    }
}

impl ReferencePaces {
    pub fn get(&self, zone: Zone) -> f64 {
        match zone {
            Zone::Easy => self.easy,
            Zone::Steady => self.steady,
            Zone::Tempo => self.tempo,
            Zone::Hard => self.hard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaceConfig {
    /// Shortest same-zone stretch (minutes) accepted as a segment
    pub min_segment_minutes: u32,

    pub reference: ReferencePaces,
}

impl Default for PaceConfig {
    fn default() -> Self {
        PaceConfig {
            min_segment_minutes: 5,
            reference: ReferencePaces::default(),
        }
    }
}

/// A contiguous stretch of one workout spent in a single zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaceSegment {
    pub workout_id: String,
    pub date: NaiveDate,
    pub zone: Zone,

    /// Average pace in min/km
    pub avg_pace: f64,
    pub avg_hr: f64,
    pub duration_minutes: u32,
}

/// Calibrated pace for one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneCalibration {
    /// Pace in min/km
    pub pace: f64,

    /// Mean heart rate over the zone's segments, unknown when uncalibrated
    pub avg_hr: Option<f64>,

    /// True when derived from at least one segment
    pub calibrated: bool,
    pub sample_segments: usize,

    /// Pace change in min/km per day; negative means getting faster.
    /// Undefined with fewer than two segments.
    pub trend_slope: Option<f64>,
}

impl ZoneCalibration {
    fn reference(pace: f64) -> Self {
        ZoneCalibration {
            pace,
            avg_hr: None,
            calibrated: false,
            sample_segments: 0,
            trend_slope: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedPaceTable {
    pub easy: ZoneCalibration,
    pub steady: ZoneCalibration,
    pub tempo: ZoneCalibration,
    pub hard: ZoneCalibration,

    /// Hard pace was extended from the easier zones rather than observed
    pub hard_extrapolated: bool,
}

impl CalibratedPaceTable {
    pub fn get(&self, zone: Zone) -> &ZoneCalibration {
        match zone {
            Zone::Easy => &self.easy,
            Zone::Steady => &self.steady,
            Zone::Tempo => &self.tempo,
            Zone::Hard => &self.hard,
        }
    }

    pub fn is_extrapolated(&self, zone: Zone) -> bool {
        zone == Zone::Hard && self.hard_extrapolated
    }
}

/// Extract maximal same-zone segments of at least `min_minutes` minutes.
///
/// A segment ends at a zone change or at a gap in the heart-rate minutes.
/// Segments without any pace samples are skipped.
pub fn extract_segments(
    workout: &ReducedWorkout,
    zones: &HeartRateZones,
    min_minutes: u32,
) -> Vec<PaceSegment> {
    let Some(pace) = workout.pace.as_deref() else {
        return Vec::new();
    };

    let mut segments = Vec::new();
    let mut run: Vec<&TimeSeriesPoint> = Vec::new();
    let mut run_zone: Option<Zone> = None;

    let mut flush = |run: &mut Vec<&TimeSeriesPoint>, zone: Option<Zone>| {
        if let (Some(zone), Some(first), Some(last)) = (zone, run.first(), run.last()) {
            let duration = last.time - first.time + 1;
            if duration >= min_minutes {
                let (start, end) = (first.time, last.time);
                let paces: Vec<f64> = pace
                    .iter()
                    .filter(|p| p.time >= start && p.time <= end)
                    .map(|p| p.value)
                    .collect();
                let hrs: Vec<f64> = run.iter().map(|p| p.value).collect();

                if let (Some(avg_pace), Some(avg_hr)) = (mean(&paces), mean(&hrs)) {
                    segments.push(PaceSegment {
                        workout_id: workout.workout_id.clone(),
                        date: workout.date,
                        zone,
                        avg_pace,
                        avg_hr,
                        duration_minutes: duration,
                    });
                }
            }
        }
        run.clear();
    };

    for point in &workout.heart_rate {
        let zone = zones.zone_for(point.value);
        let contiguous = run.last().map_or(true, |prev| point.time == prev.time + 1);

        if zone.is_none() || zone != run_zone || !contiguous {
            flush(&mut run, run_zone);
            run_zone = zone;
        }
        if zone.is_some() {
            run.push(point);
        }
    }
    flush(&mut run, run_zone);

    segments
}

/// Calibrate per-zone paces from the cached workouts.
pub fn calibrate_pace(
    workouts: &[ReducedWorkout],
    zones: &HeartRateZones,
    config: &PaceConfig,
) -> CalibratedPaceTable {
    let mut ordered: Vec<&ReducedWorkout> = workouts.iter().collect();
    ordered.sort_by(|a, b| a.workout_id.cmp(&b.workout_id));

    let segments: Vec<PaceSegment> = ordered
        .iter()
        .flat_map(|w| extract_segments(w, zones, config.min_segment_minutes))
        .collect();

    let calibrate = |zone: Zone| -> ZoneCalibration {
        let in_zone: Vec<&PaceSegment> = segments.iter().filter(|s| s.zone == zone).collect();
        let paces: Vec<f64> = in_zone.iter().map(|s| s.avg_pace).collect();

        let Some(pace) = mean(&paces) else {
            return ZoneCalibration::reference(config.reference.get(zone));
        };

        let trend_slope = if in_zone.len() >= 2 {
            let points: Vec<(f64, f64)> = in_zone
                .iter()
                .map(|s| (f64::from(s.date.num_days_from_ce()), s.avg_pace))
                .collect();
            linear_fit(&points).map(|fit| fit.slope)
        } else {
            None
        };

        ZoneCalibration {
            pace,
            avg_hr: mean(&in_zone.iter().map(|s| s.avg_hr).collect::<Vec<_>>()),
            calibrated: true,
            sample_segments: in_zone.len(),
            trend_slope,
        }
    };

    let easy = calibrate(Zone::Easy);
    let steady = calibrate(Zone::Steady);
    let tempo = calibrate(Zone::Tempo);
    let mut hard = calibrate(Zone::Hard);
    let mut hard_extrapolated = false;

    if !hard.calibrated {
        let known: Vec<(f64, f64)> = [(Zone::Easy, &easy), (Zone::Steady, &steady), (Zone::Tempo, &tempo)]
            .iter()
            .filter(|(_, c)| c.calibrated)
            .map(|(zone, c)| (zones.thresholds.representative_pct(*zone), c.pace))
            .collect();

        // Pace must get faster with intensity for the extension to be meaningful
        let extended = linear_fit(&known)
            .filter(|fit| fit.slope < 0.0)
            .map(|fit| fit.predict(zones.thresholds.representative_pct(Zone::Hard)))
            .filter(|pace| pace.is_finite());

        if let Some(pace) = extended {
            hard.pace = pace.clamp(MIN_PACE_MIN_PER_KM, MAX_PACE_MIN_PER_KM);
            hard_extrapolated = true;
        }
    }

    debug!(
        segments = segments.len(),
        hard_extrapolated, "Calibrated pace table"
    );

    CalibratedPaceTable {
        easy,
        steady,
        tempo,
        hard,
        hard_extrapolated,
    }
}
