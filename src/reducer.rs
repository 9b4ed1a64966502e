//! Stream reduction: raw per-sample sensor streams to per-minute series
//!
//! Every raw sample lands in the minute slot `round(time / 60)`; samples that
//! share a slot are averaged per channel. Malformed samples (non-finite values,
//! negative or backwards timestamps, physiologically impossible readings) are
//! dropped rather than propagated, so a recording made entirely of garbage
//! reduces to empty channels, the same as "no device data".

use crate::models::{RawStreams, ReducedWorkout, TimeSeriesPoint, WorkoutRecord};
use std::collections::BTreeMap;
use tracing::trace;

/// Slowest pace kept, in min/km
pub const MAX_PACE_MIN_PER_KM: f64 = 12.0;

/// Fastest pace kept, in min/km
pub const MIN_PACE_MIN_PER_KM: f64 = 2.0;

/// Highest heart rate accepted as a real reading
const MAX_HEART_RATE: f64 = 250.0;

/// Per-minute accumulator for one channel
#[derive(Debug, Default)]
struct MinuteBuckets {
    slots: BTreeMap<u32, (f64, u32)>,
}

impl MinuteBuckets {
    fn push(&mut self, minute: u32, value: f64) {
        let slot = self.slots.entry(minute).or_insert((0.0, 0));
        slot.0 += value;
        slot.1 += 1;
    }

    fn finish(self) -> Vec<TimeSeriesPoint> {
        self.slots
            .into_iter()
            .map(|(minute, (sum, count))| TimeSeriesPoint::new(minute, sum / f64::from(count)))
            .collect()
    }

    fn finish_optional(self) -> Option<Vec<TimeSeriesPoint>> {
        if self.slots.is_empty() {
            None
        } else {
            Some(self.finish())
        }
    }
}

/// Convert a velocity in m/s to pace in min/km, discarding sensor noise
pub fn velocity_to_pace(velocity: f64) -> Option<f64> {
    if !velocity.is_finite() || velocity <= 0.0 {
        return None;
    }
    let pace = 1000.0 / (velocity * 60.0);
    (MIN_PACE_MIN_PER_KM..=MAX_PACE_MIN_PER_KM)
        .contains(&pace)
        .then_some(pace)
}

fn sample(channel: &Option<Vec<f64>>, index: usize) -> Option<f64> {
    channel
        .as_ref()
        .and_then(|values| values.get(index))
        .copied()
        .filter(|v| v.is_finite())
}

/// Reduce one workout's raw streams. Deterministic and side-effect free.
pub fn reduce_streams(record: &WorkoutRecord, raw: &RawStreams) -> ReducedWorkout {
    let mut heart_rate = MinuteBuckets::default();
    let mut pace = MinuteBuckets::default();
    let mut cadence = MinuteBuckets::default();
    let mut altitude = MinuteBuckets::default();
    let mut glucose = MinuteBuckets::default();

    let mut latest_time = f64::NEG_INFINITY;
    let mut dropped = 0usize;

    for (index, &time) in raw.time.iter().enumerate() {
        if !time.is_finite() || time < 0.0 || time < latest_time {
            dropped += 1;
            continue;
        }
        latest_time = time;

        let minute = (time / 60.0).round() as u32;

        if let Some(hr) = sample(&raw.heart_rate, index).filter(|hr| *hr > 0.0 && *hr <= MAX_HEART_RATE) {
            heart_rate.push(minute, hr);
        }
        if let Some(p) = sample(&raw.velocity, index).and_then(velocity_to_pace) {
            pace.push(minute, p);
        }
        if let Some(half) = sample(&raw.cadence, index).filter(|c| *c > 0.0) {
            cadence.push(minute, half * 2.0);
        }
        if let Some(alt) = sample(&raw.altitude, index) {
            altitude.push(minute, alt);
        }
        if let Some(bg) = sample(&raw.glucose, index).filter(|bg| *bg > 0.0) {
            glucose.push(minute, bg);
        }
    }

    if dropped > 0 {
        trace!(workout_id = %record.id, dropped, "Dropped malformed timestamps");
    }

    let glucose = glucose.finish();

    ReducedWorkout {
        workout_id: record.id.clone(),
        category: record.category(),
        prescribed_fuel_rate: record.prescribed_fuel_rate,
        starting_glucose: glucose.first().map(|p| p.value),
        glucose,
        heart_rate: heart_rate.finish(),
        pace: pace.finish_optional(),
        cadence: cadence.finish_optional(),
        altitude: altitude.finish_optional(),
        date: record.date(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkoutCategory;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn record() -> WorkoutRecord {
        WorkoutRecord {
            id: "run-1".to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 10, 1, 6, 30, 0).unwrap(),
            name: "Easy run".to_string(),
            category: None,
            duration_seconds: 1800,
            distance_meters: Some(5000.0),
            training_load: None,
            prescribed_fuel_rate: Some(30.0),
        }
    }

    #[test]
    fn test_samples_averaged_per_minute() {
        let raw = RawStreams {
            time: vec![0.0, 20.0, 40.0, 60.0, 80.0],
            heart_rate: Some(vec![120.0, 130.0, 140.0, 150.0, 160.0]),
            ..RawStreams::default()
        };

        let reduced = reduce_streams(&record(), &raw);

        // 0s and 20s round to minute 0; 40s, 60s, 80s round to minute 1
        assert_eq!(
            reduced.heart_rate,
            vec![TimeSeriesPoint::new(0, 125.0), TimeSeriesPoint::new(1, 150.0)]
        );
        assert_eq!(reduced.category, WorkoutCategory::Easy);
        assert_eq!(reduced.prescribed_fuel_rate, Some(30.0));
    }

    #[test]
    fn test_velocity_converted_and_noise_discarded() {
        // 1000 / (3.0 * 60) = 5.555 min/km; 0.5 m/s = 33 min/km (noise); 10 m/s = 1.67 (noise)
        let raw = RawStreams {
            time: vec![0.0, 60.0, 120.0],
            velocity: Some(vec![3.0, 0.5, 10.0]),
            ..RawStreams::default()
        };

        let reduced = reduce_streams(&record(), &raw);
        let pace = reduced.pace.unwrap();
        assert_eq!(pace.len(), 1);
        assert_eq!(pace[0].time, 0);
        assert!((pace[0].value - 1000.0 / 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_cadence_doubled() {
        let raw = RawStreams {
            time: vec![0.0, 30.0],
            cadence: Some(vec![85.0, 87.0]),
            ..RawStreams::default()
        };

        let reduced = reduce_streams(&record(), &raw);
        // 30s rounds half away from zero, into minute 1
        assert_eq!(
            reduced.cadence,
            Some(vec![TimeSeriesPoint::new(0, 170.0), TimeSeriesPoint::new(1, 174.0)])
        );
    }

    #[test]
    fn test_missing_channels_are_absent_not_zero_filled() {
        let raw = RawStreams {
            time: vec![0.0, 60.0],
            heart_rate: Some(vec![140.0, 141.0]),
            velocity: Some(vec![f64::NAN, 0.0]),
            ..RawStreams::default()
        };

        let reduced = reduce_streams(&record(), &raw);
        assert_eq!(reduced.heart_rate.len(), 2);
        assert!(reduced.pace.is_none());
        assert!(reduced.cadence.is_none());
        assert!(reduced.altitude.is_none());
        assert!(reduced.glucose.is_empty());
        assert_eq!(reduced.starting_glucose, None);
    }

    #[test]
    fn test_malformed_timestamps_dropped() {
        let raw = RawStreams {
            time: vec![0.0, 120.0, 60.0, f64::NAN, -5.0, 180.0],
            heart_rate: Some(vec![100.0, 110.0, 999.0, 999.0, 999.0, 120.0]),
            ..RawStreams::default()
        };

        let reduced = reduce_streams(&record(), &raw);
        assert_eq!(
            reduced.heart_rate,
            vec![
                TimeSeriesPoint::new(0, 100.0),
                TimeSeriesPoint::new(2, 110.0),
                TimeSeriesPoint::new(3, 120.0),
            ]
        );
    }

    #[test]
    fn test_all_malformed_reduces_to_empty() {
        let raw = RawStreams {
            time: vec![f64::NAN, f64::INFINITY],
            heart_rate: Some(vec![140.0, 150.0]),
            glucose: Some(vec![7.0, 6.0]),
            ..RawStreams::default()
        };

        let reduced = reduce_streams(&record(), &raw);
        assert!(reduced.is_empty());
    }

    #[test]
    fn test_starting_glucose_is_first_reduced_value() {
        let raw = RawStreams {
            time: vec![0.0, 300.0, 600.0],
            glucose: Some(vec![8.4, 7.9, 7.1]),
            ..RawStreams::default()
        };

        let reduced = reduce_streams(&record(), &raw);
        assert_eq!(reduced.starting_glucose, Some(8.4));
        assert_eq!(reduced.glucose.len(), 3);
        assert_eq!(reduced.glucose[2].time, 10);
    }

    #[test]
    fn test_null_samples_dropped_without_losing_workout() {
        let raw: RawStreams = serde_json::from_str(
            r#"{"time":[0,60,120],"heartrate":[120,null,130],"glucose":[7.0,6.8,6.5]}"#,
        )
        .unwrap();

        let reduced = reduce_streams(&record(), &raw);
        assert_eq!(
            reduced.heart_rate,
            vec![TimeSeriesPoint::new(0, 120.0), TimeSeriesPoint::new(2, 130.0)]
        );
        assert_eq!(reduced.glucose.len(), 3);
        assert_eq!(reduced.starting_glucose, Some(7.0));
    }

    #[test]
    fn test_short_channels_tolerated() {
        let raw = RawStreams {
            time: vec![0.0, 60.0, 120.0],
            heart_rate: Some(vec![130.0]),
            ..RawStreams::default()
        };

        let reduced = reduce_streams(&record(), &raw);
        assert_eq!(reduced.heart_rate, vec![TimeSeriesPoint::new(0, 130.0)]);
    }

    proptest! {
        #[test]
        fn test_reduction_is_deterministic_and_pace_bounded(
            samples in prop::collection::vec((0.0f64..20.0, 0.0f64..8.0, 60.0f64..200.0), 0..200)
        ) {
            let mut time = Vec::new();
            let mut t = 0.0;
            for (step, _, _) in &samples {
                t += step;
                time.push(t);
            }
            let raw = RawStreams {
                time,
                velocity: Some(samples.iter().map(|(_, v, _)| *v).collect()),
                heart_rate: Some(samples.iter().map(|(_, _, hr)| *hr).collect()),
                ..RawStreams::default()
            };

            let first = reduce_streams(&record(), &raw);
            let second = reduce_streams(&record(), &raw);
            prop_assert_eq!(&first, &second);

            if let Some(pace) = &first.pace {
                prop_assert!(!pace.is_empty());
                for point in pace {
                    prop_assert!(point.value >= MIN_PACE_MIN_PER_KM && point.value <= MAX_PACE_MIN_PER_KM);
                }
            }
            prop_assert!(first.heart_rate.windows(2).all(|w| w[0].time < w[1].time));
        }
    }
}
