//! Glucose response model
//!
//! Turns cached reduced workouts into glucose-response statistics: per
//! intensity zone, per workout category, per starting-glucose band and per
//! elapsed-time bucket, plus derived fuel targets and fuel-increase
//! suggestions.
//!
//! The model is a pure function of its input and is rebuilt from scratch on
//! every call, at O(workouts × minutes) cost. There is no
//! incremental update path. Zones and categories without observations are
//! absent (`None` / missing key), never zero-filled.

use crate::models::{Observation, ReducedWorkout, TimeSeriesPoint, WorkoutCategory, Zone};
use crate::stats::{distinct_count, linear_fit, mean};
use crate::zones::HeartRateZones;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Highest fuel rate a target is allowed to recommend, g/h
const MAX_TARGET_FUEL_RATE: f64 = 120.0;

/// Sample-count cutoffs for confidence levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    /// Fewer samples than this is `low`
    pub low_below: usize,

    /// At least this many samples is `high`
    pub high_at_least: usize,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        ConfidenceThresholds {
            low_below: 3,
            high_at_least: 10,
        }
    }
}

/// BG model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Average rate (mmol/L per 10 min) below which a category is crashing
    pub crash_threshold: f64,

    /// Fuel increase (g/h) per mmol/L/10min below the crash threshold
    pub fuel_step_per_unit: f64,

    /// Largest single fuel increase suggested, g/h
    pub max_fuel_step: f64,

    /// Lower-inclusive edges of the starting-glucose bands, mmol/L
    pub band_edges: [f64; 3],

    /// Width of the elapsed-time buckets in minutes
    pub time_bucket_minutes: u32,

    pub confidence: ConfidenceThresholds,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            crash_threshold: -0.5,
            fuel_step_per_unit: 12.0,
            max_fuel_step: 15.0,
            band_edges: [4.0, 7.0, 10.0],
            time_bucket_minutes: 10,
            confidence: ConfidenceThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_samples(samples: usize, thresholds: &ConfidenceThresholds) -> Self {
        if samples < thresholds.low_below {
            Confidence::Low
        } else if samples >= thresholds.high_at_least {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }
}

/// Aggregated response for one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneStats {
    /// Mean bg rate in mmol/L per 10 min
    pub avg_rate: f64,
    pub sample_count: usize,
    pub confidence: Confidence,
    pub avg_fuel_rate: Option<f64>,
}

/// Aggregated response for one workout category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub avg_rate: f64,
    pub sample_count: usize,
    pub confidence: Confidence,
    pub avg_fuel_rate: Option<f64>,

    /// Distinct workouts contributing observations
    pub activity_count: usize,
}

/// Per-zone statistics; a zone without observations is `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneTable {
    pub easy: Option<ZoneStats>,
    pub steady: Option<ZoneStats>,
    pub tempo: Option<ZoneStats>,
    pub hard: Option<ZoneStats>,
}

impl ZoneTable {
    pub fn get(&self, zone: Zone) -> Option<&ZoneStats> {
        match zone {
            Zone::Easy => self.easy.as_ref(),
            Zone::Steady => self.steady.as_ref(),
            Zone::Tempo => self.tempo.as_ref(),
            Zone::Hard => self.hard.as_ref(),
        }
    }

    fn slot(&mut self, zone: Zone) -> &mut Option<ZoneStats> {
        match zone {
            Zone::Easy => &mut self.easy,
            Zone::Steady => &mut self.steady,
            Zone::Tempo => &mut self.tempo,
            Zone::Hard => &mut self.hard,
        }
    }

    /// Present zones, easiest first
    pub fn iter(&self) -> impl Iterator<Item = (Zone, &ZoneStats)> {
        Zone::ALL
            .into_iter()
            .filter_map(move |zone| self.get(zone).map(|stats| (zone, stats)))
    }
}

/// Per-category statistics; a category without observations is `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTable {
    pub easy: Option<CategoryStats>,
    pub long: Option<CategoryStats>,
    pub interval: Option<CategoryStats>,
}

impl CategoryTable {
    pub fn get(&self, category: WorkoutCategory) -> Option<&CategoryStats> {
        match category {
            WorkoutCategory::Easy => self.easy.as_ref(),
            WorkoutCategory::Long => self.long.as_ref(),
            WorkoutCategory::Interval => self.interval.as_ref(),
        }
    }

    fn slot(&mut self, category: WorkoutCategory) -> &mut Option<CategoryStats> {
        match category {
            WorkoutCategory::Easy => &mut self.easy,
            WorkoutCategory::Long => &mut self.long,
            WorkoutCategory::Interval => &mut self.interval,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkoutCategory, &CategoryStats)> {
        WorkoutCategory::ALL
            .into_iter()
            .filter_map(move |category| self.get(category).map(|stats| (category, stats)))
    }
}

/// Starting-glucose band of a workout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GlucoseBand {
    Low,
    Target,
    Elevated,
    High,
}

impl GlucoseBand {
    pub fn classify(glucose: f64, edges: &[f64; 3]) -> Self {
        if glucose < edges[0] {
            GlucoseBand::Low
        } else if glucose < edges[1] {
            GlucoseBand::Target
        } else if glucose < edges[2] {
            GlucoseBand::Elevated
        } else {
            GlucoseBand::High
        }
    }

    pub fn label(&self, edges: &[f64; 3]) -> String {
        match self {
            GlucoseBand::Low => format!("<{}", edges[0]),
            GlucoseBand::Target => format!("{}-{}", edges[0], edges[1]),
            GlucoseBand::Elevated => format!("{}-{}", edges[1], edges[2]),
            GlucoseBand::High => format!(">{}", edges[2]),
        }
    }
}

/// Rate statistics for a band or bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateStats {
    pub avg_rate: f64,
    pub sample_count: usize,
}

/// Fuel rate at which the category's glucose is expected to hold steady
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFuelRate {
    pub category: WorkoutCategory,

    /// Recommended fuel rate in g/h
    pub target_fuel_rate: f64,

    /// Average fuel rate actually used
    pub current_avg_fuel: f64,

    /// False when the target is just the current average
    pub adjusted: bool,

    /// Observations with a known fuel rate
    pub sample_count: usize,
}

/// Proposal for a category whose glucose drops faster than the crash threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelSuggestion {
    pub category: WorkoutCategory,
    pub avg_rate: f64,

    /// Current average fuel rate, when known
    pub current_fuel_rate: Option<f64>,

    /// Suggested increase in g/h; `None` means only a qualitative flag
    pub increase: Option<f64>,

    /// Suggested new fuel rate in g/h
    pub suggested_fuel_rate: Option<f64>,
}

/// Read-only glucose response model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BgResponseModel {
    pub zones: ZoneTable,
    pub categories: CategoryTable,
    pub starting_levels: BTreeMap<GlucoseBand, RateStats>,

    /// Keyed by bucket start minute
    pub time_buckets: BTreeMap<u32, RateStats>,
    pub target_fuel_rates: Vec<TargetFuelRate>,
    pub fuel_suggestions: Vec<FuelSuggestion>,

    /// Workouts that produced at least one observation
    pub observed_workouts: usize,
    pub observations: Vec<Observation>,
}

impl BgResponseModel {
    pub fn total_observations(&self) -> usize {
        self.observations.len()
    }

    pub fn target_fuel_rate(&self, category: WorkoutCategory) -> Option<&TargetFuelRate> {
        self.target_fuel_rates.iter().find(|t| t.category == category)
    }
}

/// Net glucose rate over `[start, end]` in mmol/L per 10 min.
///
/// Uses the first and last glucose points inside the window and requires two
/// distinct sample times.
pub fn window_rate(glucose: &[TimeSeriesPoint], start: u32, end: u32) -> Option<f64> {
    let mut inside = glucose.iter().filter(|p| p.time >= start && p.time <= end);
    let first = inside.next()?;
    let last = inside.last()?;

    if last.time <= first.time {
        return None;
    }
    let minutes = f64::from(last.time - first.time);
    Some((last.value - first.value) / (minutes / 10.0))
}

/// Split a workout into maximal same-zone heart-rate runs and emit one
/// observation per run that has a defined glucose rate. A run also ends at any
/// minute without a zoned heart-rate sample.
pub fn extract_observations(workout: &ReducedWorkout, zones: &HeartRateZones) -> Vec<Observation> {
    let mut observations = Vec::new();
    if workout.glucose.len() < 2 || workout.heart_rate.is_empty() {
        return observations;
    }

    let mut segment: Option<(Zone, u32, u32)> = None;
    let close = |segment: (Zone, u32, u32), observations: &mut Vec<Observation>| {
        let (zone, start, end) = segment;
        if let Some(bg_rate) = window_rate(&workout.glucose, start, end) {
            observations.push(Observation {
                workout_id: workout.workout_id.clone(),
                zone,
                category: workout.category,
                bg_rate,
                fuel_rate: workout.prescribed_fuel_rate,
                start_minute: start,
                duration_minutes: end - start,
            });
        }
    };

    for point in &workout.heart_rate {
        let Some(zone) = zones.zone_for(point.value) else {
            continue;
        };

        segment = match segment {
            Some((current, start, last)) if current == zone && point.time == last + 1 => {
                Some((current, start, point.time))
            }
            Some(finished) => {
                close(finished, &mut observations);
                Some((zone, point.time, point.time))
            }
            None => Some((zone, point.time, point.time)),
        };
    }

    if let Some(finished) = segment {
        close(finished, &mut observations);
    }

    observations
}

/// Build the glucose response model from a cache snapshot.
///
/// Input order does not matter: workouts are processed in workout-id order.
/// When two entries share an id, the one with the smaller serialized form is
/// kept.
pub fn build_model(
    workouts: &[ReducedWorkout],
    zones: &HeartRateZones,
    config: &ModelConfig,
) -> BgResponseModel {
    let mut keyed: Vec<(String, &ReducedWorkout)> = workouts
        .iter()
        .map(|w| (serde_json::to_string(w).unwrap_or_default(), w))
        .collect();
    keyed.sort_by(|a, b| {
        a.1.workout_id
            .cmp(&b.1.workout_id)
            .then_with(|| a.0.cmp(&b.0))
    });
    keyed.dedup_by(|a, b| a.1.workout_id == b.1.workout_id);
    let ordered: Vec<&ReducedWorkout> = keyed.into_iter().map(|(_, w)| w).collect();

    let mut observations = Vec::new();
    let mut starting_levels: BTreeMap<GlucoseBand, Vec<f64>> = BTreeMap::new();

    for workout in &ordered {
        let workout_obs = extract_observations(workout, zones);

        if let Some(start_bg) = workout.starting_glucose.filter(|g| g.is_finite()) {
            let band = GlucoseBand::classify(start_bg, &config.band_edges);
            starting_levels
                .entry(band)
                .or_default()
                .extend(workout_obs.iter().map(|o| o.bg_rate));
        }
        observations.extend(workout_obs);
    }

    let mut model = BgResponseModel {
        zones: aggregate_zones(&observations, config),
        categories: aggregate_categories(&observations, config),
        starting_levels: starting_levels
            .into_iter()
            .filter_map(|(band, rates)| rate_stats(&rates).map(|s| (band, s)))
            .collect(),
        time_buckets: aggregate_time_buckets(&observations, config.time_bucket_minutes),
        observed_workouts: observations
            .iter()
            .map(|o| o.workout_id.as_str())
            .collect::<BTreeSet<_>>()
            .len(),
        ..BgResponseModel::default()
    };

    model.target_fuel_rates = target_fuel_rates(&observations, &model.categories);
    model.fuel_suggestions = fuel_suggestions(&model.categories, config);
    model.observations = observations;

    debug!(
        workouts = ordered.len(),
        observations = model.total_observations(),
        "Built BG response model"
    );

    model
}

fn rate_stats(rates: &[f64]) -> Option<RateStats> {
    mean(rates).map(|avg_rate| RateStats {
        avg_rate,
        sample_count: rates.len(),
    })
}

fn fuel_mean(observations: &[&Observation]) -> Option<f64> {
    let fuels: Vec<f64> = observations.iter().filter_map(|o| o.fuel_rate).collect();
    mean(&fuels)
}

fn aggregate_zones(observations: &[Observation], config: &ModelConfig) -> ZoneTable {
    let mut table = ZoneTable::default();
    for zone in Zone::ALL {
        let in_zone: Vec<&Observation> = observations.iter().filter(|o| o.zone == zone).collect();
        let rates: Vec<f64> = in_zone.iter().map(|o| o.bg_rate).collect();

        *table.slot(zone) = mean(&rates).map(|avg_rate| ZoneStats {
            avg_rate,
            sample_count: in_zone.len(),
            confidence: Confidence::from_samples(in_zone.len(), &config.confidence),
            avg_fuel_rate: fuel_mean(&in_zone),
        });
    }
    table
}

fn aggregate_categories(observations: &[Observation], config: &ModelConfig) -> CategoryTable {
    let mut table = CategoryTable::default();
    for category in WorkoutCategory::ALL {
        let in_category: Vec<&Observation> = observations
            .iter()
            .filter(|o| o.category == category)
            .collect();
        let rates: Vec<f64> = in_category.iter().map(|o| o.bg_rate).collect();
        let activity_count = in_category
            .iter()
            .map(|o| o.workout_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        *table.slot(category) = mean(&rates).map(|avg_rate| CategoryStats {
            avg_rate,
            sample_count: in_category.len(),
            confidence: Confidence::from_samples(in_category.len(), &config.confidence),
            avg_fuel_rate: fuel_mean(&in_category),
            activity_count,
        });
    }
    table
}

fn aggregate_time_buckets(observations: &[Observation], width: u32) -> BTreeMap<u32, RateStats> {
    let width = width.max(1);
    let mut buckets: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for obs in observations {
        let start = obs.start_minute / width * width;
        buckets.entry(start).or_default().push(obs.bg_rate);
    }

    buckets
        .into_iter()
        .filter_map(|(start, rates)| rate_stats(&rates).map(|s| (start, s)))
        .collect()
}

/// Per category, the fuel rate where the fitted fuel→rate line crosses zero.
///
/// Falls back to the current average when fewer than two distinct fuel rates
/// were observed, or when the fit does not show glucose rising with fuel
/// (flat or inverted slope): no adjustment is recommended then.
fn target_fuel_rates(observations: &[Observation], categories: &CategoryTable) -> Vec<TargetFuelRate> {
    let mut targets = Vec::new();

    for (category, stats) in categories.iter() {
        let Some(current_avg_fuel) = stats.avg_fuel_rate else {
            continue;
        };

        let pairs: Vec<(f64, f64)> = observations
            .iter()
            .filter(|o| o.category == category)
            .filter_map(|o| o.fuel_rate.map(|fuel| (fuel, o.bg_rate)))
            .collect();

        let fitted = if distinct_count(pairs.iter().map(|(fuel, _)| *fuel)) >= 2 {
            linear_fit(&pairs)
                .filter(|fit| fit.slope > 0.0)
                .and_then(|fit| fit.solve_for(0.0))
                .filter(|target| target.is_finite())
        } else {
            None
        };

        targets.push(TargetFuelRate {
            category,
            target_fuel_rate: fitted
                .map(|t| t.clamp(0.0, MAX_TARGET_FUEL_RATE))
                .unwrap_or(current_avg_fuel),
            current_avg_fuel,
            adjusted: fitted.is_some(),
            sample_count: pairs.len(),
        });
    }

    targets
}

fn fuel_suggestions(categories: &CategoryTable, config: &ModelConfig) -> Vec<FuelSuggestion> {
    categories
        .iter()
        .filter(|(_, stats)| stats.avg_rate < config.crash_threshold)
        .map(|(category, stats)| {
            let increase = stats.avg_fuel_rate.map(|_| {
                let proportional =
                    (stats.avg_rate - config.crash_threshold).abs() * config.fuel_step_per_unit;
                proportional.min(config.max_fuel_step).round()
            });

            FuelSuggestion {
                category,
                avg_rate: stats.avg_rate,
                current_fuel_rate: stats.avg_fuel_rate,
                increase,
                suggested_fuel_rate: stats
                    .avg_fuel_rate
                    .zip(increase)
                    .map(|(current, step)| current + step),
            }
        })
        .collect()
}
