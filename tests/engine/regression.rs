//! Baseline comparisons

use crate::common::*;
use cadbatch::{OperationMetrics, RegressionBaselines, RegressionConfig};
use std::time::Duration;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn averaged(tag: &str, value: u64) -> OperationMetrics {
    let metrics = OperationMetrics::default();
    metrics.record_success(tag, ms(value));
    metrics
}

#[test]
fn boundary_is_not_a_regression() {
    let baselines = RegressionBaselines::default();
    baselines.set_baseline("move", ms(10), 0);

    let check = baselines.check("move", &averaged("move", 12)).unwrap();
    assert!(!check.is_regression());
}

#[test]
fn just_past_tolerance_is_a_regression() {
    let baselines = RegressionBaselines::default();
    baselines.set_baseline("move", ms(10), 0);

    let check = baselines.check("move", &averaged("move", 13)).unwrap();
    assert!(check.duration_regressed);
    assert!((check.duration_ratio - 1.3).abs() < 1e-9);
}

#[test]
fn fifteen_ms_against_ten_is_ratio_one_point_five() {
    let baselines = RegressionBaselines::default();
    baselines.set_baseline("move", ms(10), 0);

    let check = baselines.check("move", &averaged("move", 15)).unwrap();
    assert!(check.duration_regressed);
    assert!((check.duration_ratio - 1.5).abs() < 1e-9);
}

#[test]
fn looser_tolerance_from_config() {
    let baselines = RegressionBaselines::new(RegressionConfig {
        duration_tolerance: 1.4,
        ..RegressionConfig::default()
    });
    baselines.set_baseline("move", ms(10), 0);

    let check = baselines.check("move", &averaged("move", 13)).unwrap();
    assert!(!check.duration_regressed);
}

#[test]
fn missing_baseline_is_no_opinion() {
    let (_, engine) = engine();
    engine
        .execute_direct::<_, EngineError, _>("scale", |_| Ok(()))
        .unwrap();

    assert!(engine.check_regression("scale").is_none());
    assert!(!engine.regression_report().has_regressions());
}

#[test]
fn regression_never_blocks_execution() {
    let (doc, engine) = engine();
    engine.set_baseline("slow", Duration::from_nanos(1), 0);

    for _ in 0..3 {
        engine
            .execute_direct::<_, EngineError, _>("slow", |s| {
                std::thread::sleep(ms(1));
                s.insert(circle(1.0)).map(|_| ())
            })
            .unwrap();
    }

    assert!(engine.check_regression("slow").unwrap().duration_regressed);
    assert_eq!(doc.object_count(), 3);
}
