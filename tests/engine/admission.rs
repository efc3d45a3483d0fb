//! Burst detection on a synthetic clock

use cadbatch::{Admission, AdmissionController, AdmissionPolicy, ManualClock};
use std::sync::Arc;
use std::time::Duration;

fn controller() -> (Arc<ManualClock>, AdmissionController) {
    let clock = Arc::new(ManualClock::new());
    (
        clock.clone(),
        AdmissionController::new(AdmissionPolicy::default(), clock),
    )
}

#[test]
fn fifth_call_of_a_burst_is_queued() {
    let (clock, admission) = controller();

    let decisions: Vec<_> = [0u64, 200, 800, 850, 890]
        .iter()
        .map(|ms| {
            clock.set_elapsed(Duration::from_millis(*ms));
            admission.admit("fillet")
        })
        .collect();

    assert_eq!(
        decisions,
        vec![
            Admission::Direct,
            Admission::Direct,
            Admission::Direct,
            Admission::Direct,
            Admission::Queued
        ]
    );
}

#[test]
fn calls_spread_over_five_seconds_stay_direct() {
    let (clock, admission) = controller();
    for second in 0..5u64 {
        clock.set_elapsed(Duration::from_secs(second));
        assert_eq!(admission.admit("fillet"), Admission::Direct);
    }
}

#[test]
fn burst_expires_with_the_window() {
    let (clock, admission) = controller();
    for _ in 0..6 {
        admission.admit("chamfer");
    }
    assert!(admission.should_batch("chamfer"));

    clock.advance(Duration::from_millis(1_100));
    assert!(!admission.should_batch("chamfer"));
    assert_eq!(admission.window_count("chamfer"), 1);
}

#[test]
fn custom_thresholds() {
    let clock = Arc::new(ManualClock::new());
    let admission = AdmissionController::new(
        AdmissionPolicy {
            burst_threshold: 2,
            window_threshold: 2,
            ..AdmissionPolicy::default()
        },
        clock,
    );
    assert_eq!(admission.admit("pan"), Admission::Direct);
    assert_eq!(admission.admit("pan"), Admission::Queued);
}
