//! Timer-driven batch scheduler
//!
//! Queued operations wait in a process-wide queue until the drain thread
//! wakes (every `interval_ms`). Each drain takes at most `max_batch`
//! operations, or whatever it can collect before `collect_deadline_us`
//! elapses, and groups them by tag.
//!
//! # Dispatch
//!
//! ```text
//!   queue ──drain──▶ [op a1, op b1, op a2, op c1, op b2]
//!                         │ group by tag (first-seen order)
//!                         ▼
//!        group "a": [a1, a2]   group "b": [b1, b2]   group "c": [c1]
//!              │                     │                     │
//!        group thread          group thread          group thread
//!        one session           one session           one session
//!        [a1] then [a2]        [b1] then [b2]        [c1]
//!        commit                commit                commit
//! ```
//!
//! Every group gets its own thread, so groups never wait for one another.
//! Operations inside a group run sequentially, each in a nested session
//! (`[a1]`) opened under the group's session. The nested session is pushed
//! onto the thread's SessionContext, so nested calls made by the operation
//! join it.
//!
//! # Fault Isolation
//!
//! - Operation-level: a closure that fails (or panics) fails only its own
//!   caller. Its nested session is rolled back, so none of its writes reach
//!   the group; siblings keep running.
//! - Session-level: if the group's session cannot be opened or committed,
//!   every caller in the group receives that fault. If an operation's nested
//!   session cannot be opened or folded, only that caller fails.
//!
//! # Known Limitations
//!
//! - No ordering guarantee for same-tag operations from different callers,
//!   and no fairness across tags or callers.
//! - No per-operation timeout: a hung closure holds its group's session and
//!   thread until it returns. Other groups and later drains proceed.

use crate::admission::AdmissionController;
use crate::context::SessionContext;
use crate::coordinator::SessionCoordinator;
use crate::pending::PendingOperation;
use crate::session::Session;
use cadbatch_core::{panic_message, EngineError, EngineResult, MemorySampler};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Drain loop tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainPolicy {
    /// Period of the drain timer (ms)
    pub interval_ms: u64,
    /// Maximum operations taken per drain
    pub max_batch: usize,
    /// Time budget for collecting one batch (µs)
    pub collect_deadline_us: u64,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 10,
            max_batch: 100,
            collect_deadline_us: 1000,
        }
    }
}

impl DrainPolicy {
    /// Drain timer period
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Batch collection budget
    pub fn collect_deadline(&self) -> Duration {
        Duration::from_micros(self.collect_deadline_us)
    }

    /// Check the tunables are usable
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the interval, batch cap, or deadline is zero.
    pub fn validate(&self) -> EngineResult<()> {
        if self.interval_ms == 0 {
            return Err(EngineError::invalid_config("drain interval must be non-zero"));
        }
        if self.max_batch == 0 {
            return Err(EngineError::invalid_config("max_batch must be non-zero"));
        }
        if self.collect_deadline_us == 0 {
            return Err(EngineError::invalid_config(
                "collect deadline must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Outcome of one finished operation, reported to the observer
#[derive(Debug, Clone, Copy)]
pub struct OperationOutcome<'a> {
    /// Operation tag
    pub tag: &'a str,
    /// Time spent running the closure
    pub elapsed: Duration,
    /// Bytes allocated across the closure, when a sampler is installed
    pub memory_delta: Option<u64>,
    /// Failure text (operation- or session-level), `None` on success
    pub error: Option<&'a str>,
    /// True if the operation went through the batch queue
    pub batched: bool,
}

/// Receives an outcome for every operation that ran
pub trait OperationObserver: Send + Sync {
    /// Called once per finished operation
    fn on_complete(&self, outcome: &OperationOutcome<'_>);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl OperationObserver for NoopObserver {
    fn on_complete(&self, _outcome: &OperationOutcome<'_>) {}
}

/// Scheduler metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    /// Operations waiting in the queue
    pub queue_depth: usize,
    /// Groups currently executing
    pub groups_in_flight: usize,
    /// Drains that collected at least one operation
    pub batches_drained: u64,
    /// Groups dispatched to group threads
    pub groups_dispatched: u64,
    /// Queued operations that ran
    pub operations_executed: u64,
    /// Queued operations that resolved with an error
    pub operations_failed: u64,
    /// Queued operations discarded at shutdown
    pub operations_cancelled: u64,
    /// True until shutdown
    pub running: bool,
    /// True while draining is paused
    pub paused: bool,
}

struct SchedulerInner {
    queue: Mutex<VecDeque<PendingOperation>>,
    wake: Condvar,
    shutdown: AtomicBool,
    paused: AtomicBool,
    policy: DrainPolicy,
    coordinator: Arc<SessionCoordinator>,
    observer: Arc<dyn OperationObserver>,
    sampler: Option<Arc<dyn MemorySampler>>,
    next_group: AtomicU64,
    groups_in_flight: AtomicUsize,
    batches_drained: AtomicU64,
    groups_dispatched: AtomicU64,
    operations_executed: AtomicU64,
    operations_failed: AtomicU64,
    operations_cancelled: AtomicU64,
}

/// Admission + queue + drain thread
///
/// The drain thread starts in `new` and stops in `shutdown` (also run on
/// drop). Operations still queued at shutdown resolve with `Cancelled`.
pub struct BatchScheduler {
    inner: Arc<SchedulerInner>,
    admission: AdmissionController,
    drainer: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    /// Create a scheduler and start its drain thread
    ///
    /// Drain thread is named `cadbatch-drain`; group threads are named
    /// `cadbatch-group-0`, `cadbatch-group-1`, etc.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an unusable policy, `Internal` if the drain thread
    /// cannot be spawned.
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        admission: AdmissionController,
        policy: DrainPolicy,
        observer: Arc<dyn OperationObserver>,
        sampler: Option<Arc<dyn MemorySampler>>,
    ) -> EngineResult<Self> {
        policy.validate()?;
        admission.policy().validate()?;

        let inner = Arc::new(SchedulerInner {
            queue: Mutex::new(VecDeque::new()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            policy,
            coordinator,
            observer,
            sampler,
            next_group: AtomicU64::new(0),
            groups_in_flight: AtomicUsize::new(0),
            batches_drained: AtomicU64::new(0),
            groups_dispatched: AtomicU64::new(0),
            operations_executed: AtomicU64::new(0),
            operations_failed: AtomicU64::new(0),
            operations_cancelled: AtomicU64::new(0),
        });

        let loop_inner = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("cadbatch-drain".to_string())
            .spawn(move || drain_loop(&loop_inner))
            .map_err(|e| EngineError::internal(format!("failed to spawn drain thread: {}", e)))?;

        debug!(target: "cadbatch::batch", "Batch scheduler started");
        Ok(Self {
            inner,
            admission,
            drainer: Mutex::new(Some(handle)),
        })
    }

    /// Admission controller deciding direct vs. queued
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// True until `shutdown`
    pub fn is_running(&self) -> bool {
        !self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Record a call for `tag`; true if it should take the queued path
    ///
    /// Always false once the scheduler has shut down, and for calls made on
    /// a thread that already holds a session for this coordinator (those
    /// join the open session).
    pub fn should_batch(&self, tag: &str) -> bool {
        if !self.is_running() || SessionContext::current_for(&self.inner.coordinator).is_some() {
            return false;
        }
        self.admission.should_batch(tag)
    }

    /// Queue `func` and block until its group has run and committed
    ///
    /// A call made on a thread that already holds a session for this
    /// coordinator runs immediately inside that session instead: queueing it
    /// would wait on a drain that may be waiting on this very thread.
    ///
    /// Must not be called from inside an async runtime (it blocks).
    ///
    /// # Errors
    ///
    /// The closure's own error, a session-level fault of the group or of the
    /// operation's nested session converted with `From<EngineError>`, or
    /// `Cancelled` if the scheduler shut down before the operation ran.
    pub fn submit<T, E, F>(&self, tag: &str, func: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<EngineError> + fmt::Display + Send + 'static,
    {
        if SessionContext::current_for(&self.inner.coordinator).is_some() {
            return SessionContext::execute_safely(&self.inner.coordinator, func);
        }

        let (tx, rx) = oneshot::channel();
        let op = PendingOperation::new(tag, func, tx);
        if let Err(op) = self.enqueue(op) {
            self.inner.operations_cancelled.fetch_add(1, Ordering::Relaxed);
            op.resolve(Some(&EngineError::cancelled("batch scheduler is shut down")));
        }

        match rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(E::from(EngineError::cancelled(format!(
                "operation '{}' was dropped before completion",
                tag
            )))),
        }
    }

    fn enqueue(&self, op: PendingOperation) -> Result<(), PendingOperation> {
        let mut queue = self.inner.queue.lock();
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(op);
        }
        queue.push_back(op);
        Ok(())
    }

    /// Stop collecting batches; queued operations wait until `resume`
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    /// Resume collecting batches
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
    }

    /// Operations waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Stop the drain thread and cancel everything still queued
    ///
    /// Groups already dispatched run to completion. Idempotent.
    pub fn shutdown(&self) {
        // Lock the queue before notifying to prevent lost-wakeup:
        // the drain thread checks the flag and waits while holding this lock.
        {
            let _queue = self.inner.queue.lock();
            self.inner.shutdown.store(true, Ordering::Release);
            self.inner.wake.notify_all();
        }

        if let Some(handle) = self.drainer.lock().take() {
            if handle.join().is_err() {
                error!(target: "cadbatch::batch", "drain thread panicked");
            }
        }

        let leftovers: Vec<PendingOperation> = self.inner.queue.lock().drain(..).collect();
        if !leftovers.is_empty() {
            warn!(
                target: "cadbatch::batch",
                count = leftovers.len(),
                "Cancelling queued operations at shutdown"
            );
        }
        let fault = EngineError::cancelled("batch scheduler shut down");
        for op in leftovers {
            self.inner
                .operations_cancelled
                .fetch_add(1, Ordering::Relaxed);
            op.resolve(Some(&fault));
        }
    }

    /// Return a snapshot of scheduler metrics
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue_depth: self.queue_depth(),
            groups_in_flight: self.inner.groups_in_flight.load(Ordering::Relaxed),
            batches_drained: self.inner.batches_drained.load(Ordering::Relaxed),
            groups_dispatched: self.inner.groups_dispatched.load(Ordering::Relaxed),
            operations_executed: self.inner.operations_executed.load(Ordering::Relaxed),
            operations_failed: self.inner.operations_failed.load(Ordering::Relaxed),
            operations_cancelled: self.inner.operations_cancelled.load(Ordering::Relaxed),
            running: self.is_running(),
            paused: self.inner.paused.load(Ordering::Relaxed),
        }
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drain_loop(inner: &Arc<SchedulerInner>) {
    let interval = inner.policy.interval();
    loop {
        let batch = {
            let mut queue = inner.queue.lock();
            if !inner.shutdown.load(Ordering::Acquire) {
                inner.wake.wait_for(&mut queue, interval);
            }
            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }
            if inner.paused.load(Ordering::Acquire) {
                continue;
            }
            collect_batch(&mut queue, &inner.policy)
        };

        if !batch.is_empty() {
            dispatch(inner, batch);
        }
    }
    debug!(target: "cadbatch::batch", "Drain loop stopped");
}

/// Take up to `max_batch` operations, stopping early at the collection deadline
fn collect_batch(
    queue: &mut VecDeque<PendingOperation>,
    policy: &DrainPolicy,
) -> Vec<PendingOperation> {
    let deadline = Instant::now() + policy.collect_deadline();
    let mut batch = Vec::with_capacity(queue.len().min(policy.max_batch));
    while batch.len() < policy.max_batch {
        if !batch.is_empty() && Instant::now() >= deadline {
            break;
        }
        match queue.pop_front() {
            Some(op) => batch.push(op),
            None => break,
        }
    }
    batch
}

/// Split a batch by tag, keeping first-seen tag order and dequeue order
fn group_by_tag(batch: Vec<PendingOperation>) -> Vec<(String, Vec<PendingOperation>)> {
    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    let mut groups: Vec<(String, Vec<PendingOperation>)> = Vec::new();
    for op in batch {
        match index.get(op.tag()) {
            Some(&slot) => groups[slot].1.push(op),
            None => {
                index.insert(op.tag().to_string(), groups.len());
                groups.push((op.tag().to_string(), vec![op]));
            }
        }
    }
    groups
}

fn dispatch(inner: &Arc<SchedulerInner>, batch: Vec<PendingOperation>) {
    inner.batches_drained.fetch_add(1, Ordering::Relaxed);
    let total = batch.len();
    let groups = group_by_tag(batch);
    debug!(
        target: "cadbatch::batch",
        operations = total,
        groups = groups.len(),
        "Dispatching batch"
    );

    for (tag, ops) in groups {
        inner.groups_dispatched.fetch_add(1, Ordering::Relaxed);
        inner.groups_in_flight.fetch_add(1, Ordering::Relaxed);
        let guard = InFlightGuard {
            inner: Arc::clone(inner),
        };
        let name = format!(
            "cadbatch-group-{}",
            inner.next_group.fetch_add(1, Ordering::Relaxed)
        );
        let spawned = std::thread::Builder::new().name(name).spawn(move || {
            run_group(&guard.inner, &tag, ops);
            drop(guard);
        });
        // On spawn failure the closure is dropped: its callers see a closed
        // channel (Cancelled) and the guard releases the in-flight slot.
        if let Err(e) = spawned {
            error!(target: "cadbatch::batch", error = %e, "Failed to spawn group thread");
        }
    }
}

/// Decrements `groups_in_flight` even if the group panics or never starts
struct InFlightGuard {
    inner: Arc<SchedulerInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.groups_in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

struct Executed {
    op: PendingOperation,
    elapsed: Duration,
    memory_delta: Option<u64>,
    scope_fault: Option<EngineError>,
}

fn run_group(inner: &SchedulerInner, tag: &str, ops: Vec<PendingOperation>) {
    let session = match inner.coordinator.begin() {
        Ok(session) => Rc::new(session),
        Err(fault) => {
            warn!(
                target: "cadbatch::batch",
                tag,
                operations = ops.len(),
                error = %fault,
                "Group session failed to open"
            );
            for op in ops {
                finish(inner, op, Duration::ZERO, None, Some(&fault));
            }
            return;
        }
    };

    let oldest_wait = ops
        .iter()
        .map(|op| op.enqueued_at().elapsed())
        .max()
        .unwrap_or_default();

    let frame = SessionContext::enter(Rc::clone(&session));
    let mut executed = Vec::with_capacity(ops.len());
    for mut op in ops {
        let before = sample_memory(inner);
        let started = Instant::now();
        let scope_fault = run_scoped(inner, &session, &mut op);
        let elapsed = started.elapsed();
        let memory_delta = memory_delta(inner, before);
        executed.push(Executed {
            op,
            elapsed,
            memory_delta,
            scope_fault,
        });
    }

    let committed = session.commit();
    drop(frame);

    let fault = committed.err();
    match &fault {
        Some(fault) => warn!(
            target: "cadbatch::batch",
            tag,
            operations = executed.len(),
            error = %fault,
            "Group commit failed; failing every operation in the group"
        ),
        None => info!(
            target: "cadbatch::batch",
            tag,
            operations = executed.len(),
            handle = %session.handle(),
            oldest_wait_us = oldest_wait.as_micros() as u64,
            "Group committed"
        ),
    }

    for Executed {
        op,
        elapsed,
        memory_delta,
        scope_fault,
    } in executed
    {
        let fault = fault.as_ref().or(scope_fault.as_ref());
        finish(inner, op, elapsed, memory_delta, fault);
    }
}

/// Run one operation in a nested session under `group`
///
/// The nested session is folded into the group only if the closure returns
/// `Ok`; otherwise it is rolled back and the group never sees its writes.
/// Returns the fault that replaces the operation's own outcome, if opening or
/// folding the nested session failed.
fn run_scoped(
    inner: &SchedulerInner,
    group: &Session,
    op: &mut PendingOperation,
) -> Option<EngineError> {
    let scope = match inner.coordinator.begin_nested(group) {
        Ok(scope) => Rc::new(scope),
        Err(fault) => return Some(fault),
    };

    let frame = SessionContext::enter(Rc::clone(&scope));
    op.run(&scope);
    let fault = if op.failure().is_none() {
        scope.commit().err()
    } else {
        debug!(
            target: "cadbatch::batch",
            tag = op.tag(),
            handle = %scope.handle(),
            "Rolling back failed operation"
        );
        if let Err(e) = scope.abort() {
            warn!(
                target: "cadbatch::batch",
                tag = op.tag(),
                error = %e,
                "Rollback of failed operation did not complete"
            );
        }
        None
    };
    drop(frame);
    fault
}

/// Report and resolve one operation
fn finish(
    inner: &SchedulerInner,
    op: PendingOperation,
    elapsed: Duration,
    memory_delta: Option<u64>,
    fault: Option<&EngineError>,
) {
    let error = match fault {
        Some(fault) => Some(fault.to_string()),
        None => op.failure(),
    };

    inner.operations_executed.fetch_add(1, Ordering::Relaxed);
    if error.is_some() {
        inner.operations_failed.fetch_add(1, Ordering::Relaxed);
    }

    let outcome = OperationOutcome {
        tag: op.tag(),
        elapsed,
        memory_delta,
        error: error.as_deref(),
        batched: true,
    };
    notify_observer(inner.observer.as_ref(), &outcome);

    op.resolve(fault);
}

/// Telemetry must never disturb the mutation path: observer panics are
/// logged and swallowed here.
pub(crate) fn notify_observer(observer: &dyn OperationObserver, outcome: &OperationOutcome<'_>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| observer.on_complete(outcome))) {
        warn!(
            target: "cadbatch::metrics",
            tag = outcome.tag,
            "Operation observer panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

fn sample_memory(inner: &SchedulerInner) -> Option<u64> {
    inner.sampler.as_ref().and_then(|sampler| sampler.allocated_bytes())
}

fn memory_delta(inner: &SchedulerInner, before: Option<u64>) -> Option<u64> {
    let after = sample_memory(inner)?;
    Some(after.saturating_sub(before?))
}
