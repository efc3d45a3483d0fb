//! cadbatch - transactional execution and adaptive batching for CAD host documents
//!
//! Domain code hands the engine closures that mutate a host document. The
//! engine scopes each one in a host transaction, lets nested calls share the
//! outermost transaction, coalesces bursts of same-kind calls into shared
//! transactions, and keeps per-operation performance telemetry.
//!
//! # Quick Start
//!
//! ```ignore
//! use cadbatch::prelude::*;
//!
//! let doc = MemoryDocument::shared();
//! let engine = ExecutionFacade::new(doc.clone())?;
//!
//! let id = engine.execute("insert-line", |session: &Session| {
//!     session.insert(Arc::new(Line { length: 4.0 }) as HostObject)
//! })?;
//!
//! println!("{}", engine.summary());
//! ```
//!
//! # Architecture
//!
//! - `cadbatch-core`: ids, errors and the Session Provider traits
//! - `cadbatch-storage`: `MemoryDocument`, an in-memory provider
//! - `cadbatch-concurrency`: sessions, the thread-local context, admission
//!   and the batch scheduler
//! - `cadbatch-engine`: the facade, metrics, baselines and reports

pub use cadbatch_concurrency::{
    Admission, AdmissionController, AdmissionPolicy, BatchScheduler, Clock, DrainPolicy,
    ManualClock, NoopObserver, OperationObserver, OperationOutcome, SchedulerStats, Session,
    SessionContext, SessionCoordinator, SessionMetrics, SessionState, SystemClock,
};
pub use cadbatch_core::{
    DocumentWriter, EngineError, EngineResult, HostObject, MemorySampler, ObjectId, OpenMode,
    SessionHandle, SessionProvider,
};
pub use cadbatch_engine::{
    Baseline, EngineConfig, ExecutionFacade, FacadeBuilder, MetricsConfig, OperationMetrics,
    OperationSnapshot, PerformanceReport, RegressionBaselines, RegressionCheck, RegressionConfig,
    RegressionReport, Trend, CONFIG_FILE_NAME,
};
pub use cadbatch_storage::{DocumentStats, MemoryDocument};

/// Everything domain code usually needs
pub mod prelude {
    pub use crate::{
        EngineConfig, EngineError, EngineResult, ExecutionFacade, HostObject, MemoryDocument,
        ObjectId, OpenMode, Session, SessionProvider,
    };
    pub use std::sync::Arc;
}
