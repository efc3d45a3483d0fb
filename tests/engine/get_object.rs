//! Typed lookups never fail, they return None

use crate::common::*;

#[test]
fn absent_outcomes_are_none() {
    let (doc, engine) = engine();
    let circle_id = doc.insert_committed(circle(3.0));
    let erased = doc.insert_committed(circle(4.0));
    engine
        .execute_batch::<EngineError, _>(|s| s.erase(erased))
        .unwrap();

    assert!(engine
        .get_object::<Circle>(ObjectId::NULL, OpenMode::ForRead)
        .is_none());
    assert!(engine.get_object::<Circle>(erased, OpenMode::ForRead).is_none());
    assert!(engine
        .get_object::<Circle>(ObjectId::new(123_456), OpenMode::ForRead)
        .is_none());
    assert!(engine.get_object::<Layer>(circle_id, OpenMode::ForRead).is_none());
    assert_eq!(
        engine
            .get_object::<Circle>(circle_id, OpenMode::ForWrite)
            .unwrap()
            .radius,
        3.0
    );
}

#[test]
fn lookup_inside_session_sees_staged_writes() {
    let (_, engine) = engine();

    engine
        .execute_batch::<EngineError, _>(|s| {
            let id = s.insert(circle(7.5))?;
            let seen = engine.get_object::<Circle>(id, OpenMode::ForRead).unwrap();
            assert_eq!(seen.radius, 7.5);

            s.erase(id)?;
            assert!(engine.get_object::<Circle>(id, OpenMode::ForRead).is_none());
            Ok(())
        })
        .unwrap();
}

#[test]
fn lookup_with_failing_provider_is_none() {
    let (doc, engine) = engine();
    let id = doc.insert_committed(circle(1.0));
    doc.fail_next_begin();

    assert!(engine.get_object::<Circle>(id, OpenMode::ForRead).is_none());
    assert!(engine.get_object::<Circle>(id, OpenMode::ForRead).is_some());
}
