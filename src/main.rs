use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

use glycorun::cache::{LocalStore, SignalCache, SignalStore, SqliteStore};
use glycorun::config::AppConfig;
use glycorun::logging::{init_logging, LogFormat, LogLevel};
use glycorun::models::{GlucoseReading, ReducedWorkout, WorkoutCategory, WorkoutRecord, Zone};
use glycorun::providers::{GlucoseProvider, JsonDirStreamProvider, JsonFileGlucoseProvider};
use glycorun::readiness::{trend_slope, ReadinessLevel};
use glycorun::{
    assess_readiness, build_model, build_run_contexts, calibrate_pace, compute_fitness,
    compute_insights, GlycoError,
};

/// glycorun - glucose-aware running analytics
///
/// Learns how an athlete's blood glucose responds to running from reduced
/// workout streams, tracks training load, calibrates pace zones and judges
/// pre-run readiness.
#[derive(Parser)]
#[command(name = "glycorun")]
#[command(version)]
#[command(about = "Glucose-aware running analytics", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Log format (pretty, json, compact)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and cache reduced streams for workouts not cached yet
    Sync {
        /// Workout history (JSON array)
        #[arg(short, long)]
        workouts: PathBuf,

        /// Directory of raw stream files named <workout_id>.json
        #[arg(short, long)]
        streams: PathBuf,

        /// Drop this workout from the cache before syncing
        #[arg(long, value_name = "WORKOUT_ID")]
        refresh: Vec<String>,
    },

    /// Show the glucose response model built from the cache
    Model {
        #[arg(short, long)]
        workouts: PathBuf,

        /// Print the model as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the training load curve and insights
    Fitness {
        #[arg(short, long)]
        workouts: PathBuf,

        /// Extend the curve through this date (YYYY-MM-DD)
        #[arg(long)]
        through: Option<NaiveDate>,

        /// Number of recent days to list
        #[arg(short, long, default_value = "14")]
        days: usize,
    },

    /// Calibrate per-zone paces from cached workouts
    Calibrate {
        #[arg(short, long)]
        workouts: PathBuf,
    },

    /// Assess readiness for a run from the latest glucose reading
    Readiness {
        #[arg(short, long)]
        workouts: PathBuf,

        /// Glucose readings (JSON array)
        #[arg(short, long)]
        glucose: PathBuf,

        /// Category of the intended run (easy, long, interval)
        #[arg(short = 't', long, default_value = "easy")]
        category: WorkoutCategory,

        /// Override the current glucose value (mmol/L)
        #[arg(long)]
        bg: Option<f64>,

        /// Override the trend slope (mmol/L per 10 min)
        #[arg(long, allow_hyphen_values = true)]
        slope: Option<f64>,
    },

    /// Show glucose before, during and after each run
    Contexts {
        #[arg(short, long)]
        workouts: PathBuf,

        #[arg(short, long)]
        glucose: PathBuf,
    },

    /// Show or initialise the configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,

        /// Print the config file location
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let message = match e.downcast_ref::<GlycoError>() {
            Some(glyco) => glyco.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{} {}", "Error:".red().bold(), message);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_config_path);
    let mut config = if config_path.exists() {
        AppConfig::load_from_file(&config_path)?
    } else {
        AppConfig::default()
    };

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_logging(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Sync {
            workouts,
            streams,
            refresh,
        } => sync(&config, &workouts, streams, &refresh).await,
        Commands::Model { workouts, json } => show_model(&config, &workouts, json),
        Commands::Fitness {
            workouts,
            through,
            days,
        } => show_fitness(&config, &workouts, through, days),
        Commands::Calibrate { workouts } => show_calibration(&config, &workouts),
        Commands::Readiness {
            workouts,
            glucose,
            category,
            bg,
            slope,
        } => show_readiness(&config, &workouts, &glucose, category, bg, slope).await,
        Commands::Contexts { workouts, glucose } => show_contexts(&config, &workouts, &glucose).await,
        Commands::Config { init, path } => manage_config(config, &config_path, init, path),
    }
}

async fn open_glucose(path: &Path) -> Result<JsonFileGlucoseProvider> {
    JsonFileGlucoseProvider::open(path)
        .await
        .with_context(|| format!("Failed to load glucose readings from {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Cached reduced workouts for the given history, read from the durable tier
fn cached_snapshot(config: &AppConfig, history: &[WorkoutRecord]) -> Result<Vec<ReducedWorkout>> {
    let store = SqliteStore::open(&config.cache_db_path())?;
    let ids: Vec<String> = history.iter().map(|w| w.id.clone()).collect();
    let found = store.get(&ids)?;

    if found.len() < ids.len() {
        println!(
            "{}",
            format!(
                "{} of {} workouts are not cached yet, run `glycorun sync` first",
                ids.len() - found.len(),
                ids.len()
            )
            .yellow()
        );
    }

    Ok(found.into_values().collect())
}

async fn sync(config: &AppConfig, workouts: &Path, streams: PathBuf, refresh: &[String]) -> Result<()> {
    let history: Vec<WorkoutRecord> = read_json(workouts)?;
    println!("{}", "Syncing signal cache...".green().bold());

    let durable = Arc::new(SqliteStore::open(&config.cache_db_path())?);
    let local = Arc::new(LocalStore::new(config.cache.local_capacity));
    let cache = SignalCache::new(local, durable, Arc::new(JsonDirStreamProvider::new(streams)))
        .with_concurrency(config.cache.fetch_concurrency);

    for id in refresh {
        cache.invalidate(id).await?;
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} Fetching streams...")?
            .progress_chars("#>-"),
    );

    let bar = pb.clone();
    let outcome = cache
        .load(&history, move |p| {
            bar.set_length(p.total as u64);
            bar.set_position(p.completed as u64);
        })
        .await?;
    pb.finish_and_clear();

    // The process exits right after, so wait for the write here
    outcome.persistence.await??;

    println!("  Workouts: {}", outcome.workouts.len());
    println!("  Fetched:  {}", outcome.fetched.len());
    if !outcome.failed.is_empty() {
        println!(
            "  {} {}",
            "No streams for:".yellow(),
            outcome.failed.join(", ")
        );
    }

    let snapshot: Vec<ReducedWorkout> = outcome.workouts.into_values().collect();
    let model = build_model(&snapshot, &config.heart_rate_zones(), &config.model);
    println!(
        "{}",
        format!(
            "✓ Cache synced ({} observations from {} workouts)",
            model.total_observations(),
            model.observed_workouts
        )
        .green()
    );

    Ok(())
}

#[derive(Tabled)]
struct RateRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Avg rate /10m")]
    avg_rate: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Avg fuel g/h")]
    fuel: String,
}

fn format_optional(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

fn show_model(config: &AppConfig, workouts: &Path, json: bool) -> Result<()> {
    let history: Vec<WorkoutRecord> = read_json(workouts)?;
    let snapshot = cached_snapshot(config, &history)?;
    let model = build_model(&snapshot, &config.heart_rate_zones(), &config.model);

    if json {
        println!("{}", serde_json::to_string_pretty(&model)?);
        return Ok(());
    }

    if model.total_observations() == 0 {
        println!("{}", "No glucose observations yet.".yellow());
        return Ok(());
    }

    println!("{}", "Glucose response by zone".cyan().bold());
    let zone_rows: Vec<RateRow> = model
        .zones
        .iter()
        .map(|(zone, stats)| RateRow {
            group: zone.to_string(),
            avg_rate: format!("{:+.2}", stats.avg_rate),
            samples: stats.sample_count,
            confidence: format!("{:?}", stats.confidence).to_lowercase(),
            fuel: format_optional(stats.avg_fuel_rate, 0),
        })
        .collect();
    println!("{}", Table::new(zone_rows).with(Style::rounded()));

    println!("{}", "Glucose response by category".cyan().bold());
    let category_rows: Vec<RateRow> = model
        .categories
        .iter()
        .map(|(category, stats)| RateRow {
            group: format!("{} ({} runs)", category, stats.activity_count),
            avg_rate: format!("{:+.2}", stats.avg_rate),
            samples: stats.sample_count,
            confidence: format!("{:?}", stats.confidence).to_lowercase(),
            fuel: format_optional(stats.avg_fuel_rate, 0),
        })
        .collect();
    println!("{}", Table::new(category_rows).with(Style::rounded()));

    println!("{}", "By starting glucose".cyan().bold());
    for (band, stats) in &model.starting_levels {
        println!(
            "  {:>6} mmol/L  {:+.2} ({} samples)",
            band.label(&config.model.band_edges),
            stats.avg_rate,
            stats.sample_count
        );
    }

    for target in &model.target_fuel_rates {
        let note = if target.adjusted { "" } else { " (current average)" };
        println!(
            "  Target fuel for {}: {:.0} g/h{}",
            target.category, target.target_fuel_rate, note
        );
    }

    for suggestion in &model.fuel_suggestions {
        match (suggestion.increase, suggestion.suggested_fuel_rate) {
            (Some(step), Some(rate)) => println!(
                "  {} {} runs drop {:.2}/10m: add {:.0} g/h (to {:.0} g/h)",
                "!".red().bold(),
                suggestion.category,
                suggestion.avg_rate,
                step,
                rate
            ),
            _ => println!(
                "  {} {} runs drop {:.2}/10m: consider fuelling",
                "!".red().bold(),
                suggestion.category,
                suggestion.avg_rate
            ),
        }
    }

    Ok(())
}

#[derive(Tabled)]
struct FitnessRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Load")]
    load: String,
    #[tabled(rename = "CTL")]
    ctl: String,
    #[tabled(rename = "ATL")]
    atl: String,
    #[tabled(rename = "TSB")]
    tsb: String,
}

fn show_fitness(config: &AppConfig, workouts: &Path, through: Option<NaiveDate>, days: usize) -> Result<()> {
    let history: Vec<WorkoutRecord> = read_json(workouts)?;
    let fitness = compute_fitness(&history, through, &config.pmc);

    let Some(insights) = compute_insights(&fitness, &history, &config.pmc) else {
        println!("{}", "No training history.".yellow());
        return Ok(());
    };

    let rows: Vec<FitnessRow> = fitness
        .iter()
        .rev()
        .take(days)
        .rev()
        .map(|p| FitnessRow {
            date: p.date.to_string(),
            load: p.daily_load.round_dp(0).to_string(),
            ctl: p.ctl.round_dp(1).to_string(),
            atl: p.atl.round_dp(1).to_string(),
            tsb: p.tsb.round_dp(1).to_string(),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));

    println!("{}", format!("Form on {}", insights.as_of).cyan().bold());
    println!(
        "  CTL {} (peak {}), ATL {}, TSB {}",
        insights.current_ctl.round_dp(1),
        insights.peak_ctl.round_dp(1),
        insights.current_atl.round_dp(1),
        insights.current_tsb.round_dp(1)
    );
    println!(
        "  Zone: {} - {}",
        insights.form_zone.to_string().bold(),
        insights.form_zone.description()
    );
    println!(
        "  Ramp {}/week, 7d load {} ({} runs), 28d load {} ({} runs)",
        insights.ramp_rate.round_dp(1),
        insights.load_7d.round_dp(0),
        insights.workouts_7d,
        insights.load_28d.round_dp(0),
        insights.workouts_28d
    );
    if insights.overreaching {
        println!("  {}", "Load is ramping faster than is sustainable".red().bold());
    }

    Ok(())
}

#[derive(Tabled)]
struct PaceRow {
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "Pace min/km")]
    pace: String,
    #[tabled(rename = "Avg HR")]
    hr: String,
    #[tabled(rename = "Segments")]
    segments: usize,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Trend /day")]
    trend: String,
}

fn format_pace(minutes: f64) -> String {
    let total_seconds = (minutes * 60.0).round() as u32;
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

fn show_calibration(config: &AppConfig, workouts: &Path) -> Result<()> {
    let history: Vec<WorkoutRecord> = read_json(workouts)?;
    let snapshot = cached_snapshot(config, &history)?;
    let table = calibrate_pace(&snapshot, &config.heart_rate_zones(), &config.pace);

    let rows: Vec<PaceRow> = Zone::ALL
        .into_iter()
        .map(|zone| {
            let calibration = table.get(zone);
            let source = if calibration.calibrated {
                "observed"
            } else if table.is_extrapolated(zone) {
                "extrapolated"
            } else {
                "reference"
            };
            PaceRow {
                zone: zone.to_string(),
                pace: format_pace(calibration.pace),
                hr: format_optional(calibration.avg_hr, 0),
                segments: calibration.sample_segments,
                source: source.to_string(),
                trend: format_optional(calibration.trend_slope, 3),
            }
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}

async fn show_readiness(
    config: &AppConfig,
    workouts: &Path,
    glucose: &Path,
    category: WorkoutCategory,
    bg: Option<f64>,
    slope: Option<f64>,
) -> Result<()> {
    let history: Vec<WorkoutRecord> = read_json(workouts)?;
    let provider = open_glucose(glucose).await?;
    let readings = provider.readings(DateTime::<Utc>::MIN_UTC, Utc::now()).await?;
    let snapshot = cached_snapshot(config, &history)?;
    let model = build_model(&snapshot, &config.heart_rate_zones(), &config.model);

    let latest = readings.iter().max_by_key(|r| r.timestamp);
    let now = latest.map(|r| r.timestamp).unwrap_or_else(Utc::now);

    let current_bg = bg
        .or_else(|| latest.map(|r| r.mmol))
        .context("No glucose reading available, pass --bg")?;
    let slope = slope
        .or_else(|| trend_slope(&readings, now, config.readiness.trend_window_minutes))
        .unwrap_or(0.0);

    let guidance = assess_readiness(current_bg, slope, &model, category, &config.readiness);

    let level = match guidance.level {
        ReadinessLevel::Ready => "READY".green().bold(),
        ReadinessLevel::Caution => "CAUTION".yellow().bold(),
        ReadinessLevel::Wait => "WAIT".red().bold(),
    };
    println!("{} for a {} run at {:.1} mmol/L ({:+.1}/10m)", level, category, current_bg, slope);

    for reason in &guidance.reasons {
        println!("  - {}", reason);
    }
    for suggestion in &guidance.suggestions {
        println!("  {} {}", "→".cyan(), suggestion);
    }
    if let (Some(estimate), Some(drop)) = (guidance.estimated_bg_at_30m, guidance.predicted_drop) {
        println!(
            "  Expected at {} min: {:.1} mmol/L ({:+.1})",
            guidance.horizon_minutes, estimate, drop
        );
    }

    Ok(())
}

#[derive(Tabled)]
struct ContextRow {
    #[tabled(rename = "Workout")]
    workout: String,
    #[tabled(rename = "Before")]
    before: usize,
    #[tabled(rename = "During")]
    during: usize,
    #[tabled(rename = "After")]
    after: usize,
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "Min")]
    min: String,
    #[tabled(rename = "Change")]
    change: String,
}

async fn show_contexts(config: &AppConfig, workouts: &Path, glucose: &Path) -> Result<()> {
    let history: Vec<WorkoutRecord> = read_json(workouts)?;
    let provider = open_glucose(glucose).await?;

    let window = &config.run_context;
    let from = history.iter().map(|w| w.start_time).min();
    let to = history.iter().map(|w| w.end_time()).max();
    let readings: Vec<GlucoseReading> = match (from, to) {
        (Some(from), Some(to)) => {
            provider
                .readings(
                    from - Duration::minutes(i64::from(window.lookback_minutes)),
                    to + Duration::minutes(i64::from(window.lookahead_minutes)),
                )
                .await?
        }
        _ => Vec::new(),
    };
    let contexts = build_run_contexts(&history, &readings, &config.run_context);

    let names: HashMap<&str, &str> = history.iter().map(|w| (w.id.as_str(), w.name.as_str())).collect();
    let rows: Vec<ContextRow> = contexts
        .values()
        .map(|ctx| {
            let summary = ctx.summary();
            ContextRow {
                workout: format!(
                    "{} {}",
                    ctx.workout_id,
                    names.get(ctx.workout_id.as_str()).copied().unwrap_or_default()
                ),
                before: ctx.before.len(),
                during: ctx.during.len(),
                after: ctx.after.len(),
                start: format_optional(summary.start_bg, 1),
                min: format_optional(summary.min_bg, 1),
                change: summary
                    .in_run_change
                    .map(|c| format!("{:+.1}", c))
                    .unwrap_or_else(|| "-".to_string()),
            }
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}

fn manage_config(mut config: AppConfig, config_path: &Path, init: bool, path: bool) -> Result<()> {
    if path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        config.save_to_file(config_path)?;
        println!("{}", format!("✓ Wrote {}", config_path.display()).green());
        return Ok(());
    }

    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
