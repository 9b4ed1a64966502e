use crate::models::WorkoutRecord;
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Training load model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmcConfig {
    /// CTL time constant in days (default: 42)
    pub ctl_time_constant: u16,

    /// ATL time constant in days (default: 7)
    pub atl_time_constant: u16,

    /// Window for the CTL trend in days (default: 28)
    pub trend_window_days: u16,

    /// TSB below this is high-risk
    pub high_risk_below: Decimal,

    /// TSB below this (and not high-risk) is optimal training stress
    pub optimal_below: Decimal,

    /// TSB below this is the grey zone
    pub grey_below: Decimal,

    /// TSB below this is fresh; at or above is transition
    pub fresh_below: Decimal,

    /// Weekly CTL ramp above which the athlete is flagged as overreaching
    pub overreaching_ramp_rate: Decimal,
}

impl Default for PmcConfig {
    fn default() -> Self {
        PmcConfig {
            ctl_time_constant: 42,
            atl_time_constant: 7,
            trend_window_days: 28,
            high_risk_below: dec!(-20),
            optimal_below: dec!(-10),
            grey_below: dec!(5),
            fresh_below: dec!(15),
            overreaching_ramp_rate: dec!(8),
        }
    }
}

/// Training load state for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessDataPoint {
    pub date: NaiveDate,

    /// Chronic Training Load (42-day exponentially weighted average)
    pub ctl: Decimal,

    /// Acute Training Load (7-day exponentially weighted average)
    pub atl: Decimal,

    /// Training Stress Balance (CTL - ATL)
    pub tsb: Decimal,

    /// Summed training load of the day, zero on rest days
    pub daily_load: Decimal,
}

/// Form interpretation of TSB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormZone {
    HighRisk,
    Optimal,
    Grey,
    Fresh,
    Transition,
}

impl FormZone {
    pub fn from_tsb(tsb: Decimal, config: &PmcConfig) -> Self {
        if tsb < config.high_risk_below {
            FormZone::HighRisk
        } else if tsb < config.optimal_below {
            FormZone::Optimal
        } else if tsb < config.grey_below {
            FormZone::Grey
        } else if tsb < config.fresh_below {
            FormZone::Fresh
        } else {
            FormZone::Transition
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormZone::HighRisk => "high-risk",
            FormZone::Optimal => "optimal",
            FormZone::Grey => "grey",
            FormZone::Fresh => "fresh",
            FormZone::Transition => "transition",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FormZone::HighRisk => "Fatigue well above fitness, injury and illness risk is high",
            FormZone::Optimal => "Productive training stress",
            FormZone::Grey => "Maintaining, neither building nor recovering",
            FormZone::Fresh => "Fresh and ready for a race or key session",
            FormZone::Transition => "Detraining, fitness is being lost",
        }
    }
}

impl std::fmt::Display for FormZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar summary of a fitness series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessInsights {
    pub as_of: NaiveDate,
    pub current_ctl: Decimal,
    pub peak_ctl: Decimal,
    pub current_atl: Decimal,

    /// CTL change over the trend window
    pub ctl_trend: Decimal,

    /// CTL change per week
    pub ramp_rate: Decimal,
    pub current_tsb: Decimal,
    pub form_zone: FormZone,
    pub load_7d: Decimal,
    pub load_28d: Decimal,
    pub workouts_7d: usize,
    pub workouts_28d: usize,

    /// Ramp rate above the configured safe limit
    pub overreaching: bool,
}

/// Sum training load per calendar day. Workouts without a load value count
/// as zero load.
pub fn aggregate_daily_load(history: &[WorkoutRecord]) -> BTreeMap<NaiveDate, Decimal> {
    let mut daily: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    for workout in history {
        *daily.entry(workout.date()).or_insert(Decimal::ZERO) +=
            workout.training_load.unwrap_or(Decimal::ZERO);
    }
    daily
}

/// Compute the daily CTL/ATL/TSB series.
///
/// The series starts on the first workout day and runs through `through`
/// (or the last workout day when `None`). Days without workouts have zero
/// load. Empty history yields an empty series.
pub fn compute_fitness(
    history: &[WorkoutRecord],
    through: Option<NaiveDate>,
    config: &PmcConfig,
) -> Vec<FitnessDataPoint> {
    let daily = aggregate_daily_load(history);
    let (Some(first), Some(last)) = (daily.keys().next(), daily.keys().next_back()) else {
        return Vec::new();
    };
    let end = through.unwrap_or(*last);

    let ctl_factor = Decimal::ONE / Decimal::from(config.ctl_time_constant.max(1));
    let atl_factor = Decimal::ONE / Decimal::from(config.atl_time_constant.max(1));

    let mut series = Vec::new();
    let mut ctl = Decimal::ZERO;
    let mut atl = Decimal::ZERO;
    let mut current = *first;

    while current <= end {
        let load = daily.get(&current).copied().unwrap_or(Decimal::ZERO);

        // CTL_today = CTL_yesterday + (load_today - CTL_yesterday) / time_constant
        ctl += (load - ctl) * ctl_factor;
        atl += (load - atl) * atl_factor;

        series.push(FitnessDataPoint {
            date: current,
            ctl,
            atl,
            tsb: ctl - atl,
            daily_load: load,
        });

        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }

    debug!(days = series.len(), workouts = history.len(), "Computed fitness series");
    series
}

/// Derive the insight summary from a fitness series. `None` for an empty
/// series.
pub fn compute_insights(
    fitness: &[FitnessDataPoint],
    history: &[WorkoutRecord],
    config: &PmcConfig,
) -> Option<FitnessInsights> {
    let latest = fitness.last()?;
    let window = usize::from(config.trend_window_days.max(1));

    let baseline = if fitness.len() > window {
        &fitness[fitness.len() - 1 - window]
    } else {
        &fitness[0]
    };
    let ctl_trend = latest.ctl - baseline.ctl;
    let ramp_rate = ctl_trend / (Decimal::from(window as u64) / Decimal::from(7));

    let peak_ctl = fitness
        .iter()
        .map(|p| p.ctl)
        .max()
        .unwrap_or(Decimal::ZERO);

    let (load_7d, workouts_7d) = recent_totals(history, latest.date, 7);
    let (load_28d, workouts_28d) = recent_totals(history, latest.date, 28);

    Some(FitnessInsights {
        as_of: latest.date,
        current_ctl: latest.ctl,
        peak_ctl,
        current_atl: latest.atl,
        ctl_trend,
        ramp_rate,
        current_tsb: latest.tsb,
        form_zone: FormZone::from_tsb(latest.tsb, config),
        load_7d,
        load_28d,
        workouts_7d,
        workouts_28d,
        overreaching: ramp_rate > config.overreaching_ramp_rate,
    })
}

/// Load and workout count over the `days` days ending at `as_of`
fn recent_totals(history: &[WorkoutRecord], as_of: NaiveDate, days: u64) -> (Decimal, usize) {
    let start = as_of
        .checked_sub_days(Days::new(days.saturating_sub(1)))
        .unwrap_or(as_of);

    history
        .iter()
        .filter(|w| (start..=as_of).contains(&w.date()))
        .fold((Decimal::ZERO, 0), |(load, count), w| {
            (load + w.training_load.unwrap_or(Decimal::ZERO), count + 1)
        })
}
