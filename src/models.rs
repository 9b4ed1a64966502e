use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One reduced sample on the per-minute axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Minutes from the start of the series
    pub time: u32,

    /// Averaged channel value for this minute
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time: u32, value: f64) -> Self {
        Self { time, value }
    }
}

/// Purpose classification of a workout, independent of intensity zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkoutCategory {
    Easy,
    Long,
    Interval,
}

impl WorkoutCategory {
    pub const ALL: [WorkoutCategory; 3] = [
        WorkoutCategory::Easy,
        WorkoutCategory::Long,
        WorkoutCategory::Interval,
    ];

    /// Infer the category from a workout's name, duration and distance.
    ///
    /// Structured-session keywords win over length, so a long interval session
    /// is still an interval session.
    pub fn infer(name: &str, duration_seconds: u32, distance_meters: Option<f64>) -> Self {
        let lower = name.to_lowercase();
        const INTERVAL_WORDS: [&str; 8] = [
            "interval", "tempo", "threshold", "hill", "repeat", "fartlek", "progression", "speed",
        ];
        if INTERVAL_WORDS.iter().any(|w| lower.contains(w)) || Self::has_rep_pattern(&lower) {
            return WorkoutCategory::Interval;
        }

        let long_by_name = lower.contains("long")
            || lower.split_whitespace().any(|w| w == "lr");
        let long_by_size = duration_seconds >= 90 * 60
            || distance_meters.map_or(false, |d| d >= 16_000.0);

        if long_by_name || long_by_size {
            WorkoutCategory::Long
        } else {
            WorkoutCategory::Easy
        }
    }

    /// Matches rep notations such as "6x800" or "4 x 1km"
    fn has_rep_pattern(name: &str) -> bool {
        let bytes = name.as_bytes();
        bytes.iter().enumerate().any(|(i, &b)| {
            if b != b'x' {
                return false;
            }
            let before = name[..i].trim_end();
            let after = name[i + 1..].trim_start();
            before.chars().last().map_or(false, |c| c.is_ascii_digit())
                && after.chars().next().map_or(false, |c| c.is_ascii_digit())
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkoutCategory::Easy => "easy",
            WorkoutCategory::Long => "long",
            WorkoutCategory::Interval => "interval",
        }
    }
}

impl fmt::Display for WorkoutCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkoutCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "easy" => Ok(WorkoutCategory::Easy),
            "long" => Ok(WorkoutCategory::Long),
            "interval" | "intervals" => Ok(WorkoutCategory::Interval),
            _ => Err(format!("Invalid workout category: {}", s)),
        }
    }
}

/// Intensity band on the %-of-threshold-heart-rate axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Easy,
    Steady,
    Tempo,
    Hard,
}

impl Zone {
    /// Zones ordered from easiest to hardest
    pub const ALL: [Zone; 4] = [Zone::Easy, Zone::Steady, Zone::Tempo, Zone::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Easy => "easy",
            Zone::Steady => "steady",
            Zone::Tempo => "tempo",
            Zone::Hard => "hard",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workout's sensor recording collapsed to one value per channel per minute.
///
/// Heart rate and glucose are always present (possibly empty). The optional
/// channels are `None` when the recording carried no valid sample for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedWorkout {
    /// Stable workout identifier from the workout provider
    pub workout_id: String,

    /// Purpose classification
    pub category: WorkoutCategory,

    /// Prescribed carbohydrate intake in g/h
    pub prescribed_fuel_rate: Option<f64>,

    /// First glucose value of the run (mmol/L)
    pub starting_glucose: Option<f64>,

    /// Glucose in mmol/L
    pub glucose: Vec<TimeSeriesPoint>,

    /// Heart rate in bpm
    pub heart_rate: Vec<TimeSeriesPoint>,

    /// Pace in min/km
    pub pace: Option<Vec<TimeSeriesPoint>>,

    /// Cadence in steps per minute
    pub cadence: Option<Vec<TimeSeriesPoint>>,

    /// Altitude in meters
    pub altitude: Option<Vec<TimeSeriesPoint>>,

    /// Calendar date of the workout
    pub date: NaiveDate,
}

impl ReducedWorkout {
    /// Placeholder cached for a workout whose streams could not be fetched.
    /// Caching it means the workout is never retried.
    pub fn empty(record: &WorkoutRecord) -> Self {
        ReducedWorkout {
            workout_id: record.id.clone(),
            category: record.category(),
            prescribed_fuel_rate: record.prescribed_fuel_rate,
            starting_glucose: None,
            glucose: Vec::new(),
            heart_rate: Vec::new(),
            pace: None,
            cadence: None,
            altitude: None,
            date: record.date(),
        }
    }

    /// True when the workout carries no signal at all ("no data", not "not tried")
    pub fn is_empty(&self) -> bool {
        self.glucose.is_empty()
            && self.heart_rate.is_empty()
            && self.pace.is_none()
            && self.cadence.is_none()
            && self.altitude.is_none()
    }
}

/// One glucose-rate sample from a contiguous same-zone segment of a workout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub workout_id: String,
    pub zone: Zone,
    pub category: WorkoutCategory,

    /// Net glucose change in mmol/L per 10 minutes
    pub bg_rate: f64,

    /// Fuel rate in g/h during the segment, when prescribed
    pub fuel_rate: Option<f64>,

    /// Segment start offset in minutes from workout start
    pub start_minute: u32,

    /// Segment length in minutes
    pub duration_minutes: u32,
}

/// Workout history entry as returned by the workout provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    /// Unique identifier for the workout
    pub id: String,

    /// Start of the workout
    pub start_time: DateTime<Utc>,

    /// Workout title, used for category inference
    pub name: String,

    /// Explicit category, overriding inference from the name
    #[serde(default)]
    pub category: Option<WorkoutCategory>,

    /// Duration of the workout in seconds
    pub duration_seconds: u32,

    /// Distance covered in meters
    #[serde(default)]
    pub distance_meters: Option<f64>,

    /// Scalar training load (TSS-like)
    #[serde(default)]
    pub training_load: Option<Decimal>,

    /// Prescribed carbohydrate intake in g/h
    #[serde(default)]
    pub prescribed_fuel_rate: Option<f64>,
}

impl WorkoutRecord {
    pub fn date(&self) -> NaiveDate {
        self.start_time.date_naive()
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::seconds(i64::from(self.duration_seconds))
    }

    pub fn category(&self) -> WorkoutCategory {
        self.category.unwrap_or_else(|| {
            WorkoutCategory::infer(&self.name, self.duration_seconds, self.distance_meters)
        })
    }
}

/// Raw per-sample streams for one workout, keyed by channel name.
///
/// Every channel is parallel to `time` (seconds from start). A channel that is
/// shorter than `time` simply has no value for the trailing samples. Provider
/// payloads may carry `null` samples; those load as NaN and the reducer drops
/// them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStreams {
    #[serde(default, deserialize_with = "nullable_samples")]
    pub time: Vec<f64>,

    #[serde(default, rename = "heartrate", deserialize_with = "nullable_channel")]
    pub heart_rate: Option<Vec<f64>>,

    /// Velocity in m/s
    #[serde(default, rename = "velocity_smooth", deserialize_with = "nullable_channel")]
    pub velocity: Option<Vec<f64>>,

    /// Half-cadence counter (one foot)
    #[serde(default, deserialize_with = "nullable_channel")]
    pub cadence: Option<Vec<f64>>,

    #[serde(default, deserialize_with = "nullable_channel")]
    pub altitude: Option<Vec<f64>>,

    /// Glucose in mmol/L
    #[serde(default, deserialize_with = "nullable_channel")]
    pub glucose: Option<Vec<f64>>,
}

fn nullable_samples<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn nullable_channel<'de, D>(deserializer: D) -> Result<Option<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Option<Vec<Option<f64>>> = Option::deserialize(deserializer)?;
    Ok(values.map(|v| v.into_iter().map(|s| s.unwrap_or(f64::NAN)).collect()))
}

/// Device-reported glucose trend arrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TrendArrow {
    DoubleUp,
    SingleUp,
    FortyFiveUp,
    Flat,
    FortyFiveDown,
    SingleDown,
    DoubleDown,
    #[default]
    #[serde(other)]
    Unknown,
}

impl TrendArrow {
    /// Nominal rate of change for the arrow in mmol/L per 10 minutes
    pub fn nominal_rate_per_10min(&self) -> Option<f64> {
        match self {
            TrendArrow::DoubleUp => Some(2.0),
            TrendArrow::SingleUp => Some(1.1),
            TrendArrow::FortyFiveUp => Some(0.6),
            TrendArrow::Flat => Some(0.0),
            TrendArrow::FortyFiveDown => Some(-0.6),
            TrendArrow::SingleDown => Some(-1.1),
            TrendArrow::DoubleDown => Some(-2.0),
            TrendArrow::Unknown => None,
        }
    }
}

/// A single continuous-glucose-monitor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseReading {
    pub timestamp: DateTime<Utc>,

    /// Glucose in mmol/L
    pub mmol: f64,

    #[serde(default)]
    pub trend: TrendArrow,
}
