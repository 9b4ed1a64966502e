use chrono::{Duration, NaiveDate, TimeZone, Utc};
use glycorun::models::{GlucoseReading, RawStreams, TrendArrow, WorkoutCategory, WorkoutRecord, Zone};
use glycorun::readiness::trend_slope;
use glycorun::{
    assess_readiness, build_model, build_run_contexts, calibrate_pace, compute_fitness,
    compute_insights, reduce_streams, FormZone, HeartRateZones, ModelConfig, PaceConfig,
    PmcConfig, ReadinessConfig, ReadinessLevel, RunWindowConfig, ZoneThresholds,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

fn zones() -> HeartRateZones {
    HeartRateZones::new(168.0, ZoneThresholds::default())
}

fn long_run(id: &str, day: u32, fuel: f64, drop_per_10min: f64) -> (WorkoutRecord, RawStreams) {
    let record = WorkoutRecord {
        id: id.to_string(),
        start_time: Utc.with_ymd_and_hms(2024, 9, day, 7, 0, 0).unwrap(),
        name: "Sunday long run".to_string(),
        category: None,
        duration_seconds: 100 * 60,
        distance_meters: Some(18_000.0),
        training_load: Some(dec!(140)),
        prescribed_fuel_rate: Some(fuel),
    };

    // One sample per minute; steady effort at ~73% of threshold
    let time: Vec<f64> = (0..=100).map(|i| f64::from(i) * 60.0).collect();
    let raw = RawStreams {
        heart_rate: Some(time.iter().map(|_| 123.0).collect()),
        velocity: Some(time.iter().map(|_| 2.9).collect()),
        glucose: Some(
            time.iter()
                .map(|t| 9.0 + drop_per_10min * (t / 600.0))
                .collect(),
        ),
        time,
        ..RawStreams::default()
    };
    (record, raw)
}

#[test]
fn test_streams_to_readiness() {
    let runs = [
        long_run("lr-1", 1, 30.0, -0.9),
        long_run("lr-2", 8, 45.0, -0.6),
        long_run("lr-3", 15, 60.0, -0.3),
    ];
    let reduced: Vec<_> = runs.iter().map(|(r, raw)| reduce_streams(r, raw)).collect();
    assert!(reduced.iter().all(|w| w.category == WorkoutCategory::Long));

    let model = build_model(&reduced, &zones(), &ModelConfig::default());
    let long = model.categories.get(WorkoutCategory::Long).unwrap();
    assert_eq!(long.activity_count, 3);
    assert!((long.avg_rate - (-0.6)).abs() < 1e-6);
    assert!(model.zones.get(Zone::Steady).is_some());
    assert!(model.zones.get(Zone::Hard).is_none());

    // Rate rises 0.02 per g/h and reaches zero at 75 g/h
    let target = model.target_fuel_rate(WorkoutCategory::Long).unwrap();
    assert!(target.adjusted);
    assert!((target.target_fuel_rate - 75.0).abs() < 1e-6);

    let guidance = assess_readiness(3.5, -0.8, &model, WorkoutCategory::Long, &ReadinessConfig::default());
    assert_eq!(guidance.level, ReadinessLevel::Wait);
    assert!(guidance.reasons.iter().any(|r| r.contains("3.9")));
    assert!(guidance.estimated_bg_at_30m.unwrap().is_finite());

    let no_history = assess_readiness(7.0, 0.0, &model, WorkoutCategory::Interval, &ReadinessConfig::default());
    assert_eq!(no_history.estimated_bg_at_30m, None);
    assert_eq!(no_history.level, ReadinessLevel::Ready);
}

#[test]
fn test_model_rebuild_is_identical() {
    let runs = [long_run("a", 1, 30.0, -0.9), long_run("b", 2, 60.0, -0.2)];
    let mut reduced: Vec<_> = runs.iter().map(|(r, raw)| reduce_streams(r, raw)).collect();

    let first = build_model(&reduced, &zones(), &ModelConfig::default());
    reduced.reverse();
    let second = build_model(&reduced, &zones(), &ModelConfig::default());
    assert_eq!(first, second);
}

#[test]
fn test_pace_calibration_from_reduced_runs() {
    let runs = [long_run("a", 1, 30.0, -0.9), long_run("b", 20, 30.0, -0.9)];
    let reduced: Vec<_> = runs.iter().map(|(r, raw)| reduce_streams(r, raw)).collect();

    let table = calibrate_pace(&reduced, &zones(), &PaceConfig::default());
    assert!(table.steady.calibrated);
    assert_eq!(table.steady.sample_segments, 2);
    assert!((table.steady.pace - 1000.0 / (2.9 * 60.0)).abs() < 1e-6);
    assert_eq!(table.steady.trend_slope, Some(0.0));
    assert!(!table.easy.calibrated);
    assert!(!table.hard_extrapolated);
}

#[test]
fn test_single_load_decay() {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let history = vec![WorkoutRecord {
        id: "race".to_string(),
        start_time: Utc.from_utc_datetime(&start.and_hms_opt(9, 0, 0).unwrap()),
        name: "10k race".to_string(),
        category: None,
        duration_seconds: 2700,
        distance_meters: Some(10_000.0),
        training_load: Some(dec!(100)),
        prescribed_fuel_rate: None,
    }];

    let config = PmcConfig::default();
    let fitness = compute_fitness(&history, Some(start + Duration::days(60)), &config);
    assert_eq!(fitness.len(), 61);

    let ctl_42 = fitness[41].ctl.to_f64().unwrap();
    let expected = 100.0 / 42.0 * (41.0f64 / 42.0).powi(41);
    assert!((ctl_42 - expected).abs() < 1e-9);
    assert!(fitness[60].ctl < fitness[41].ctl);

    let insights = compute_insights(&fitness, &history, &config).unwrap();
    assert_eq!(insights.workouts_28d, 0);
    assert!(insights.ctl_trend < rust_decimal::Decimal::ZERO);
    assert_eq!(insights.form_zone, FormZone::Grey);
}

#[test]
fn test_run_contexts_and_trend() {
    let (run, _) = long_run("lr-1", 1, 30.0, -0.9);
    let start = run.start_time;
    let readings: Vec<GlucoseReading> = (-12..=40)
        .map(|i| GlucoseReading {
            timestamp: start + Duration::minutes(i * 5),
            mmol: 9.0 - 0.05 * i as f64,
            trend: TrendArrow::FortyFiveDown,
        })
        .collect();

    let contexts = build_run_contexts(std::slice::from_ref(&run), &readings, &RunWindowConfig::default());
    let ctx = &contexts["lr-1"];
    assert_eq!(ctx.before.len(), 12);
    assert_eq!(ctx.during.len(), 20);
    assert_eq!(ctx.after.len(), 20);

    let slope = trend_slope(&readings, start, 20).unwrap();
    assert!((slope - (-0.1)).abs() < 1e-9);
}
