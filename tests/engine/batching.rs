//! Queued execution: grouping and two-level fault isolation

use crate::common::*;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// With a frozen clock the first four calls of a tag run directly; every call
/// after that is queued.
fn warm_up(engine: &ExecutionFacade, tag: &str) {
    for _ in 0..4 {
        engine
            .execute(tag, |_: &Session| Ok::<_, EngineError>(()))
            .unwrap();
    }
}

fn spawn_calls<T, F>(
    engine: &Arc<ExecutionFacade>,
    tag: &'static str,
    count: usize,
    make: impl Fn(usize) -> F,
) -> Vec<JoinHandle<Result<T, EngineError>>>
where
    F: FnOnce(&Session) -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    (0..count)
        .map(|i| {
            let engine = Arc::clone(engine);
            let func = make(i);
            std::thread::spawn(move || engine.execute(tag, func))
        })
        .collect()
}

fn release(engine: &ExecutionFacade, depth: usize) {
    assert!(
        wait_until(Duration::from_secs(5), || engine.queued_operations() == depth),
        "expected {} queued operations",
        depth
    );
    engine.resume_batching();
}

#[test]
fn queued_group_shares_one_session() {
    let (doc, _clock, engine) = frozen_engine();
    let engine = Arc::new(engine);
    warm_up(&engine, "insert");
    engine.pause_batching();

    let handles = spawn_calls(&engine, "insert", 3, |i| {
        move |s: &Session| s.insert(circle(i as f64))
    });
    release(&engine, 3);

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    let stats = engine.scheduler_stats().unwrap();
    assert_eq!(stats.groups_dispatched, 1);
    assert_eq!(stats.operations_executed, 3);
    assert_eq!(doc.stats().begins, 4 + 1);
    assert_eq!(doc.object_count(), 3);
    assert_eq!(engine.operation_stats("insert").unwrap().execution_count, 7);
}

#[test]
fn failing_operation_does_not_fail_its_siblings() {
    let (doc, _clock, engine) = frozen_engine();
    let engine = Arc::new(engine);
    warm_up(&engine, "modify");
    engine.pause_batching();

    let handles = spawn_calls(&engine, "modify", 3, |i| {
        move |s: &Session| {
            if i == 1 {
                s.erase(ObjectId::new(999_999)).map(|_| ObjectId::NULL)
            } else {
                s.insert(circle(i as f64))
            }
        }
    });
    release(&engine, 3);

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(EngineError::ObjectNotFound(_))));
    assert!(results[2].is_ok());

    assert_eq!(doc.object_count(), 2);
    let stats = engine.operation_stats("modify").unwrap();
    assert_eq!(stats.error_count, 1);
}

#[test]
fn failed_operation_leaves_no_partial_writes() {
    let (doc, _clock, engine) = frozen_engine();
    let engine = Arc::new(engine);
    warm_up(&engine, "offset");
    engine.pause_batching();

    let handles = spawn_calls(&engine, "offset", 3, |i| {
        move |s: &Session| {
            let id = s.insert(circle(i as f64))?;
            if i == 1 {
                return Err(EngineError::MutationRejected("offset distance too large".into()));
            }
            Ok(id)
        }
    });
    release(&engine, 3);

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(matches!(results[1], Err(EngineError::MutationRejected(_))));
    for ok in [&results[0], &results[2]] {
        let id = *ok.as_ref().unwrap();
        assert!(doc.contains(id));
    }

    assert_eq!(doc.object_count(), 2);
    assert_eq!(doc.stats().nested_aborts, 1);
    assert_eq!(engine.session_metrics().nested_aborted, 1);
}

#[test]
fn blocked_group_does_not_hold_up_other_tags() {
    let (_doc, _clock, engine) = frozen_engine();
    let engine = Arc::new(engine);
    warm_up(&engine, "hang");
    warm_up(&engine, "other");

    let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let blocked = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            engine.execute("hang", move |_: &Session| {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
                Ok::<_, EngineError>(())
            })
        })
    };
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("blocked group never started");

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            let _ = done_tx.send(engine.execute("other", |s: &Session| s.insert(circle(3.0))));
        });
    }
    let other = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("unrelated tag waited on a blocked group");
    assert!(other.is_ok());
    assert!(engine.scheduler_stats().unwrap().groups_in_flight >= 1);

    release_tx.send(()).unwrap();
    assert!(blocked.join().unwrap().is_ok());
}

#[test]
fn group_commit_failure_fails_every_member() {
    let (doc, _clock, engine) = frozen_engine();
    let engine = Arc::new(engine);
    warm_up(&engine, "array");
    engine.pause_batching();
    doc.set_fail_all_commits(true);

    let handles = spawn_calls(&engine, "array", 3, |i| {
        move |s: &Session| s.insert(circle(i as f64))
    });
    release(&engine, 3);

    for handle in handles {
        let err = handle.join().unwrap().unwrap_err();
        assert!(err.is_session_fault(), "unexpected error: {}", err);
    }
    assert_eq!(doc.object_count(), 0);
    assert_eq!(engine.operation_stats("array").unwrap().error_count, 3);
    assert_eq!(engine.session_metrics().commit_failures, 1);
}

#[test]
fn panicking_operation_is_reported_to_its_caller_only() {
    let (doc, _clock, engine) = frozen_engine();
    let engine = Arc::new(engine);
    warm_up(&engine, "explode");
    engine.pause_batching();

    let handles = spawn_calls(&engine, "explode", 2, |i| {
        move |s: &Session| {
            let id = s.insert(circle(1.0))?;
            if i == 0 {
                panic!("degenerate polyline");
            }
            Ok(id)
        }
    });
    release(&engine, 2);

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    match &results[0] {
        Err(EngineError::OperationPanicked { tag, message }) => {
            assert_eq!(tag, "explode");
            assert_eq!(message, "degenerate polyline");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(results[1].is_ok());
    assert_eq!(doc.object_count(), 1);
}

#[test]
fn tags_form_separate_groups() {
    let (doc, _clock, engine) = frozen_engine();
    let engine = Arc::new(engine);
    warm_up(&engine, "line");
    warm_up(&engine, "arc");
    engine.pause_batching();

    let mut handles = spawn_calls(&engine, "line", 2, |i| {
        move |s: &Session| s.insert(circle(i as f64))
    });
    handles.extend(spawn_calls(&engine, "arc", 2, |i| {
        move |s: &Session| s.insert(circle(10.0 + i as f64))
    }));
    release(&engine, 4);

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    assert_eq!(engine.scheduler_stats().unwrap().groups_dispatched, 2);
    assert_eq!(doc.stats().begins, 8 + 2);
    assert_eq!(doc.object_count(), 4);
}

#[test]
fn shutdown_cancels_queued_work_and_falls_back_to_direct() {
    let (doc, _clock, engine) = frozen_engine();
    let engine = Arc::new(engine);
    warm_up(&engine, "hatch");
    engine.pause_batching();

    let handles = spawn_calls(&engine, "hatch", 1, |_| {
        |s: &Session| s.insert(circle(1.0))
    });
    assert!(wait_until(Duration::from_secs(5), || {
        engine.queued_operations() == 1
    }));
    engine.shutdown();

    for handle in handles {
        assert!(handle.join().unwrap().unwrap_err().is_cancelled());
    }
    assert_eq!(doc.object_count(), 0);

    let id = engine
        .execute("hatch", |s: &Session| s.insert(circle(2.0)))
        .unwrap();
    assert!(doc.contains(id));

    let stats = engine.scheduler_stats().unwrap();
    assert!(!stats.running);
    assert_eq!(stats.operations_cancelled, 1);
}
