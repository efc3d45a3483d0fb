//! Nested calls share the outermost session

use crate::common::*;

#[test]
fn nested_execute_batch_commits_once() {
    let (doc, engine) = engine();

    engine
        .execute_batch::<EngineError, _>(|outer| {
            outer.insert(circle(1.0))?;
            engine.execute_batch::<EngineError, _>(|middle| {
                assert_eq!(middle.handle(), outer.handle());
                middle.insert(circle(2.0))?;
                engine.execute_batch::<EngineError, _>(|inner| {
                    assert_eq!(inner.handle(), outer.handle());
                    inner.insert(circle(3.0)).map(|_| ())
                })
            })
        })
        .unwrap();

    let stats = doc.stats();
    assert_eq!(stats.begins, 1);
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.objects, 3);
}

#[test]
fn inner_failure_rolls_back_outer_work() {
    let (doc, engine) = engine();

    let result = engine.execute_batch::<EngineError, _>(|outer| {
        outer.insert(circle(1.0))?;
        engine.execute_batch(|inner| inner.erase(ObjectId::new(0xdead)))
    });

    assert!(matches!(result, Err(EngineError::ObjectNotFound(_))));
    assert_eq!(doc.object_count(), 0);
    assert_eq!(doc.stats().commits, 0);
}

#[test]
fn inner_error_handled_by_outer_still_commits() {
    let (doc, engine) = engine();

    engine
        .execute_batch::<EngineError, _>(|outer| {
            outer.insert(circle(1.0))?;
            let missing = engine.execute_batch(|inner| inner.erase(ObjectId::new(42)));
            assert!(missing.is_err());
            // The inner frame did not close the shared session
            assert!(outer.is_open());
            Ok(())
        })
        .unwrap();

    assert_eq!(doc.object_count(), 1);
}

#[test]
fn nested_tagged_calls_are_never_queued() {
    let (doc, _clock, engine) = frozen_engine();

    let count = engine
        .execute_safely::<_, EngineError, _>(|_| {
            let mut count = 0;
            for i in 0..20 {
                engine.execute("nested", move |s: &Session| s.insert(circle(i as f64)))?;
                count += 1;
            }
            Ok(count)
        })
        .unwrap();

    assert_eq!(count, 20);
    assert_eq!(doc.stats().begins, 1);
    assert_eq!(engine.scheduler_stats().unwrap().operations_executed, 0);
    assert_eq!(engine.operation_stats("nested").unwrap().execution_count, 20);
}
