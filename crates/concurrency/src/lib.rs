//! Concurrency layer for cadbatch
//!
//! This crate implements the session and batching machinery:
//! - SessionCoordinator: begin/commit/abort against the provider, with counters
//! - Session: one open host transaction, confined to the thread that began it
//! - SessionContext: thread-local stack making nested calls share one session
//! - AdmissionController: burst detection deciding direct vs. queued execution
//! - BatchScheduler: timer-driven drain, grouping by tag, parallel group dispatch
//!
//! # Ordering
//!
//! Nested calls on one thread are strictly ordered and commit as a unit.
//! Queued operations carry no ordering guarantee across callers or tags
//! beyond "eventually grouped and executed".

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod context;
pub mod coordinator;
mod pending;
pub mod scheduler;
pub mod session;

pub use admission::{
    Admission, AdmissionController, AdmissionPolicy, Clock, ManualClock, SystemClock,
};
pub use context::SessionContext;
pub use coordinator::{SessionCoordinator, SessionMetrics};
pub use scheduler::{
    BatchScheduler, DrainPolicy, NoopObserver, OperationObserver, OperationOutcome, SchedulerStats,
};
pub use session::{Session, SessionState};
