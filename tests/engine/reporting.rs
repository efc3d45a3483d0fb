//! Read-only reporting surface

use crate::common::*;
use std::time::Duration;

#[test]
fn report_collects_everything() {
    let (_, engine) = engine();
    engine.set_baseline("insert", Duration::from_secs(10), 0);
    engine.set_baseline("never-run", Duration::from_millis(1), 0);

    for i in 0..3 {
        engine
            .execute_direct::<_, EngineError, _>("insert", |s| s.insert(circle(i as f64)))
            .unwrap();
    }
    let _ = engine.execute_direct::<(), EngineError, _>("erase", |s| s.erase(ObjectId::new(77)));

    let report = engine.performance_report();
    assert_eq!(report.total_executions, 4);
    assert_eq!(report.total_errors, 1);
    assert_eq!(report.operations.len(), 2);
    assert_eq!(report.sessions.total_committed, 3);
    assert_eq!(report.sessions.total_aborted, 1);
    assert!(report.scheduler.is_some());
    assert_eq!(report.regressions.checks.len(), 1);
    assert_eq!(report.regressions.unmeasured, vec!["never-run".to_string()]);

    // 'erase' failed every time
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.starts_with("'erase' fails 100.0%")));
}

#[test]
fn summary_lists_worst_offenders() {
    let (_, engine) = engine();
    engine
        .execute_direct::<_, EngineError, _>("slow-regen", |_| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(())
        })
        .unwrap();
    engine
        .execute_direct::<_, EngineError, _>("quick-pan", |_| Ok(()))
        .unwrap();

    let summary = engine.summary();
    assert!(summary.contains("Operations: 2 tags, 2 executions, 0 errors"));
    let slowest = summary.find("slow-regen").unwrap();
    let quickest = summary.find("quick-pan").unwrap();
    assert!(slowest < quickest);
}

#[test]
fn report_serializes_to_json() {
    let (_, engine) = engine();
    engine
        .execute_direct::<_, EngineError, _>("text", |_| Ok(()))
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&engine.performance_report().to_json().unwrap()).unwrap();
    assert_eq!(json["operations"][0]["tag"], "text");
    assert_eq!(json["operations"][0]["execution_count"], 1);
    assert_eq!(json["scheduler"]["running"], true);
}

#[test]
fn reporting_has_no_side_effects() {
    let (doc, engine) = engine();
    engine
        .execute_direct::<_, EngineError, _>("dim", |_| Ok(()))
        .unwrap();

    let before = doc.stats();
    let _ = engine.performance_report();
    let _ = engine.summary();
    let _ = engine.regression_report();

    let after = doc.stats();
    assert_eq!(before.begins, after.begins);
    assert_eq!(
        engine.operation_stats("dim").unwrap().execution_count,
        1
    );
}
