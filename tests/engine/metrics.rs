//! Per-tag statistics

use crate::common::*;
use cadbatch::{MetricsConfig, OperationMetrics, Trend};
use std::sync::Arc;
use std::time::Duration;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[test]
fn average_min_max_of_three_samples() {
    let metrics = OperationMetrics::default();
    for value in [10, 20, 30] {
        metrics.record_success("offset", ms(value));
    }

    let snapshot = metrics.snapshot("offset").unwrap();
    assert_eq!(snapshot.average_duration, ms(20));
    assert_eq!(snapshot.min_duration, ms(10));
    assert_eq!(snapshot.max_duration, ms(30));
    assert_eq!(snapshot.error_rate, 0.0);
}

#[test]
fn trend_needs_ten_samples() {
    let metrics = OperationMetrics::default();
    for value in [10, 10, 10, 10, 50, 50, 50, 50, 50] {
        metrics.record_success("pedit", ms(value));
    }
    assert_eq!(metrics.snapshot("pedit").unwrap().trend, Trend::InsufficientData);

    metrics.record_success("pedit", ms(50));
    assert_eq!(metrics.snapshot("pedit").unwrap().trend, Trend::Degrading);
}

#[test]
fn trend_uses_only_the_rolling_window() {
    let metrics = OperationMetrics::new(MetricsConfig {
        window_capacity: 10,
        ..MetricsConfig::default()
    });
    // Slow history falls out of the window entirely
    for _ in 0..50 {
        metrics.record_success("regen", ms(100));
    }
    for _ in 0..10 {
        metrics.record_success("regen", ms(5));
    }

    let snapshot = metrics.snapshot("regen").unwrap();
    assert_eq!(snapshot.trend, Trend::Stable);
    assert_eq!(snapshot.window_len, 10);
    assert_eq!(snapshot.execution_count, 60);
}

#[test]
fn concurrent_recording_on_many_tags() {
    let metrics = Arc::new(OperationMetrics::default());
    let threads: Vec<_> = (0..8)
        .map(|t| {
            let metrics = Arc::clone(&metrics);
            std::thread::spawn(move || {
                for i in 0..500u64 {
                    let tag = format!("tag-{}", i % 4);
                    if (i + t) % 10 == 0 {
                        metrics.record_failure(&tag, Duration::from_micros(i), "boom");
                    } else {
                        metrics.record_success(&tag, Duration::from_micros(i));
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let total: u64 = metrics.snapshots().iter().map(|s| s.execution_count).sum();
    let errors: u64 = metrics.snapshots().iter().map(|s| s.error_count).sum();
    assert_eq!(total, 8 * 500);
    assert_eq!(errors, 8 * 50);
}

#[test]
fn facade_measures_wall_time() {
    let (_, engine) = engine();
    for value in [10, 20, 30] {
        engine
            .execute_direct::<_, EngineError, _>("sleep", |_| {
                std::thread::sleep(ms(value));
                Ok(())
            })
            .unwrap();
    }

    let snapshot = engine.operation_stats("sleep").unwrap();
    assert_eq!(snapshot.execution_count, 3);
    assert!(snapshot.min_duration >= ms(10));
    assert!(snapshot.max_duration >= ms(30));
    assert!(snapshot.average_duration >= ms(20));
}

#[test]
fn reset_is_explicit_only() {
    let (_, engine) = engine();
    engine
        .execute_direct::<_, EngineError, _>("zoom", |_| Ok(()))
        .unwrap();
    engine
        .execute_direct::<_, EngineError, _>("pan", |_| Ok(()))
        .unwrap();

    assert!(engine.reset_operation("zoom"));
    assert!(engine.operation_stats("zoom").is_none());
    assert!(engine.operation_stats("pan").is_some());

    engine.reset_metrics();
    assert!(engine.all_operation_stats().is_empty());
}
