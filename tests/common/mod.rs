//! Shared test utilities for the integration suites.
//!
//! Import via `mod common;` from any test's main.rs.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

pub use cadbatch::{
    EngineConfig, EngineError, ExecutionFacade, HostObject, ManualClock, MemoryDocument, ObjectId,
    OpenMode, Session,
};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Host objects
// ============================================================================

/// Stand-in for a drawing entity
#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    pub radius: f64,
}

/// A second entity type, for wrong-type lookups
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
}

pub fn circle(radius: f64) -> HostObject {
    Arc::new(Circle { radius })
}

// ============================================================================
// Engine fixtures
// ============================================================================

/// Facade over a fresh document with the default configuration.
pub fn engine() -> (Arc<MemoryDocument>, ExecutionFacade) {
    init_tracing();
    let doc = MemoryDocument::shared();
    let facade = ExecutionFacade::new(doc.clone()).expect("failed to start engine");
    (doc, facade)
}

/// Facade whose admission clock never moves: every tag bursts after 4 calls.
pub fn frozen_engine() -> (Arc<MemoryDocument>, Arc<ManualClock>, ExecutionFacade) {
    init_tracing();
    let doc = MemoryDocument::shared();
    let clock = Arc::new(ManualClock::new());
    let mut config = EngineConfig::default();
    // Collect everything that is queued when the drain wakes
    config.drain.collect_deadline_us = 50_000;
    let facade = ExecutionFacade::builder()
        .provider(doc.clone())
        .config(config)
        .clock(clock.clone())
        .build()
        .expect("failed to start engine");
    (doc, clock, facade)
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}
