//! All-or-nothing execution of a logical call

use crate::common::*;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, PartialEq)]
enum DraftError {
    Engine(EngineError),
    Rejected(String),
}

impl From<EngineError> for DraftError {
    fn from(e: EngineError) -> Self {
        DraftError::Engine(e)
    }
}

impl fmt::Display for DraftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DraftError::Engine(e) => write!(f, "engine: {}", e),
            DraftError::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}

#[test]
fn mutations_then_error_leave_nothing_visible() {
    let (doc, engine) = engine();

    let result: Result<(), DraftError> = engine.execute_batch(|session| {
        for i in 0..5 {
            session.insert(circle(i as f64))?;
        }
        Err(DraftError::Rejected("layer is locked".into()))
    });

    assert_eq!(result, Err(DraftError::Rejected("layer is locked".into())));
    assert_eq!(doc.object_count(), 0);
    assert_eq!(doc.stats().aborts, 1);
}

#[test]
fn caller_error_passes_through_tagged_path_unchanged() {
    let (doc, engine) = engine();

    let result = engine.execute("draw", |session: &Session| {
        session.insert(circle(1.0))?;
        Err::<(), _>(DraftError::Rejected("outside limits".into()))
    });

    assert_eq!(result, Err(DraftError::Rejected("outside limits".into())));
    assert_eq!(doc.object_count(), 0);
    let stats = engine.operation_stats("draw").unwrap();
    assert_eq!(stats.last_error.as_deref(), Some("rejected: outside limits"));
}

#[test]
fn successful_call_commits_every_mutation() {
    let (doc, engine) = engine();
    let existing = doc.insert_committed(circle(1.0));

    let created = engine
        .execute_safely::<_, EngineError, _>(|session| {
            session.replace(existing, circle(2.0))?;
            let a = session.insert(circle(3.0))?;
            let b = session.insert(circle(4.0))?;
            session.erase(a)?;
            Ok(b)
        })
        .unwrap();

    assert_eq!(doc.committed_as::<Circle>(existing).unwrap().radius, 2.0);
    assert_eq!(doc.committed_as::<Circle>(created).unwrap().radius, 4.0);
    assert_eq!(doc.object_count(), 2);
    assert_eq!(doc.stats().commits, 1);
}

#[test]
fn commit_failure_is_converted_into_caller_error() {
    let (doc, engine) = engine();
    doc.fail_next_commit();

    let result: Result<(), DraftError> = engine.execute_batch(|session| {
        session.insert(circle(1.0))?;
        Ok(())
    });

    match result {
        Err(DraftError::Engine(e)) => assert!(e.is_session_fault()),
        other => panic!("expected session fault, got {:?}", other),
    }
    assert_eq!(doc.object_count(), 0);
}

#[test]
fn panic_inside_direct_call_rolls_back() {
    let (doc, engine) = engine();
    let engine = Arc::new(engine);

    let worker = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            let _ = engine.execute_direct::<(), EngineError, _>("explode", |session| {
                session.insert(circle(1.0))?;
                panic!("geometry kernel crashed");
            });
        })
    };
    assert!(worker.join().is_err());

    assert_eq!(doc.object_count(), 0);
    assert_eq!(doc.stats().aborts, 1);
    assert_eq!(engine.session_metrics().active_count, 0);
}

mod props {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Only calls that return Ok leave objects behind
        #[test]
        fn committed_objects_match_successful_calls(
            calls in prop::collection::vec((1usize..4, any::<bool>()), 1..12)
        ) {
            let (doc, engine) = engine();
            let mut expected = 0;

            for (inserts, succeed) in &calls {
                let result: Result<(), DraftError> = engine.execute_batch(|session| {
                    for i in 0..*inserts {
                        session.insert(circle(i as f64))?;
                    }
                    if *succeed {
                        Ok(())
                    } else {
                        Err(DraftError::Rejected("dropped".into()))
                    }
                });
                prop_assert_eq!(result.is_ok(), *succeed);
                if *succeed {
                    expected += inserts;
                }
            }

            prop_assert_eq!(doc.object_count(), expected);
        }
    }
}
