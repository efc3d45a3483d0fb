//! Public entry point tying sessions, batching and telemetry together
//!
//! Domain code calls one of:
//! - `execute_batch` / `execute_safely`: run a closure in the current session
//!   (or a new one), untagged and uninstrumented
//! - `execute(tag, f)`: instrumented; bursts of the same tag are routed
//!   through the batch queue and share one session per drain
//! - `execute_direct(tag, f)`: instrumented, never queued, and accepts
//!   closures that borrow from the caller
//!
//! Caller errors are returned unchanged. Engine faults reach the caller
//! through `E: From<EngineError>`.

use crate::config::EngineConfig;
use crate::metrics::{OperationMetrics, OperationSnapshot};
use crate::regression::{RegressionBaselines, RegressionCheck, RegressionReport};
use crate::report::PerformanceReport;
use cadbatch_concurrency::{
    AdmissionController, BatchScheduler, Clock, OperationObserver, OperationOutcome,
    SchedulerStats, Session, SessionContext, SessionCoordinator, SessionMetrics, SystemClock,
};
use cadbatch_core::{
    panic_message, EngineError, EngineResult, MemorySampler, ObjectId, OpenMode, SessionProvider,
};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Builder for [`ExecutionFacade`]
pub struct FacadeBuilder {
    provider: Option<Arc<dyn SessionProvider>>,
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    sampler: Option<Arc<dyn MemorySampler>>,
}

impl FacadeBuilder {
    /// Host transaction surface (required)
    pub fn provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Engine configuration (defaults otherwise)
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock for the admission heuristic (system clock otherwise)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Allocation sampler for per-operation memory deltas
    pub fn memory_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Validate the configuration and start the engine
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if no provider was given or the configuration does not
    /// validate; `Internal` if the drain thread cannot start.
    pub fn build(self) -> EngineResult<ExecutionFacade> {
        let provider = self
            .provider
            .ok_or_else(|| EngineError::invalid_config("a session provider is required"))?;
        self.config.validate()?;

        let coordinator = Arc::new(SessionCoordinator::new(provider));
        let metrics = Arc::new(OperationMetrics::new(self.config.metrics.clone()));
        let baselines = RegressionBaselines::new(self.config.regression.clone());

        let scheduler = if self.config.batching_enabled {
            let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
            let admission = AdmissionController::new(self.config.admission.clone(), clock);
            let observer: Arc<dyn OperationObserver> = metrics.clone();
            Some(BatchScheduler::new(
                Arc::clone(&coordinator),
                admission,
                self.config.drain.clone(),
                observer,
                self.sampler.clone(),
            )?)
        } else {
            None
        };

        debug!(
            target: "cadbatch::batch",
            batching = scheduler.is_some(),
            "Execution facade started"
        );

        Ok(ExecutionFacade {
            config: self.config,
            coordinator,
            scheduler,
            metrics,
            baselines,
            sampler: self.sampler,
        })
    }
}

/// Transactional execution engine over one host document
pub struct ExecutionFacade {
    config: EngineConfig,
    coordinator: Arc<SessionCoordinator>,
    scheduler: Option<BatchScheduler>,
    metrics: Arc<OperationMetrics>,
    baselines: RegressionBaselines,
    sampler: Option<Arc<dyn MemorySampler>>,
}

impl ExecutionFacade {
    /// Start building a facade
    pub fn builder() -> FacadeBuilder {
        FacadeBuilder {
            provider: None,
            config: EngineConfig::default(),
            clock: None,
            sampler: None,
        }
    }

    /// Facade over `provider` with the default configuration
    pub fn new(provider: Arc<dyn SessionProvider>) -> EngineResult<Self> {
        Self::builder().provider(provider).build()
    }

    /// Configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Coordinator every session of this facade is opened through
    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run `action` in the current session, or in a new one committed on `Ok`
    pub fn execute_batch<E, F>(&self, action: F) -> Result<(), E>
    where
        F: FnOnce(&Session) -> Result<(), E>,
        E: From<EngineError>,
    {
        SessionContext::execute_batch(&self.coordinator, action)
    }

    /// Run `func` in the current session, or in a new one committed on `Ok`
    pub fn execute_safely<T, E, F>(&self, func: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
        E: From<EngineError>,
    {
        SessionContext::execute_safely(&self.coordinator, func)
    }

    /// Run a tagged operation, batching it when its tag is bursting
    ///
    /// Isolated calls, calls made inside an open session, and every call after
    /// `shutdown` run directly. A queued call blocks until its group has
    /// committed; its result is then the closure's own result, unless the
    /// group's session failed, in which case every member receives that fault.
    /// A queued call that fails leaves none of its writes behind, exactly like
    /// a direct one.
    ///
    /// Must not be called from inside an async runtime: the queued path blocks
    /// the calling thread.
    pub fn execute<T, E, F>(&self, tag: &str, func: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<EngineError> + fmt::Display + Send + 'static,
    {
        match &self.scheduler {
            Some(scheduler) if scheduler.should_batch(tag) => scheduler.submit(tag, func),
            _ => self.execute_direct(tag, func),
        }
    }

    /// Run a tagged operation on the calling thread, never queued
    pub fn execute_direct<T, E, F>(&self, tag: &str, func: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
        E: From<EngineError> + fmt::Display,
    {
        let memory_before = self.sample_memory();
        let started = Instant::now();
        let result = SessionContext::execute_safely(&self.coordinator, func);
        let elapsed = started.elapsed();
        let memory_delta = match (memory_before, self.sample_memory()) {
            (Some(before), Some(after)) => Some(after.saturating_sub(before)),
            _ => None,
        };

        let error = result.as_ref().err().map(|e| e.to_string());
        self.record(&OperationOutcome {
            tag,
            elapsed,
            memory_delta,
            error: error.as_deref(),
            batched: false,
        });
        result
    }

    /// Resolve an object and downcast it to `T`
    ///
    /// Reads through the current session when there is one, otherwise through
    /// a short-lived session. A null, erased or unknown id, an object of
    /// another type, and a session that cannot be opened all yield `None`.
    pub fn get_object<T: Any + Send + Sync>(&self, id: ObjectId, mode: OpenMode) -> Option<Arc<T>> {
        if id.is_null() {
            return None;
        }
        SessionContext::execute_safely::<_, EngineError, _>(&self.coordinator, |session| {
            Ok(session.get_object::<T>(id, mode))
        })
        .ok()
        .flatten()
    }

    fn sample_memory(&self) -> Option<u64> {
        self.sampler.as_ref().and_then(|sampler| sampler.allocated_bytes())
    }

    fn record(&self, outcome: &OperationOutcome<'_>) {
        let metrics = &self.metrics;
        guarded("metrics recording", || metrics.on_complete(outcome));
    }

    // ========================================================================
    // Baselines and reporting
    // ========================================================================

    /// Store or overwrite the expected performance of `tag`
    pub fn set_baseline(&self, tag: &str, expected_duration: Duration, expected_memory: u64) {
        self.baselines
            .set_baseline(tag, expected_duration, expected_memory);
    }

    /// Drop the baseline for `tag`; true if one existed
    pub fn remove_baseline(&self, tag: &str) -> bool {
        self.baselines.remove_baseline(tag)
    }

    /// Compare `tag` against its baseline
    ///
    /// `None` without a baseline or samples.
    pub fn check_regression(&self, tag: &str) -> Option<RegressionCheck> {
        guarded("baseline lookup", || self.baselines.check(tag, &self.metrics)).flatten()
    }

    /// Compare every baselined tag
    ///
    /// Empty if building the report panicked.
    pub fn regression_report(&self) -> RegressionReport {
        guarded("regression report", || self.baselines.report(&self.metrics))
            .unwrap_or_else(RegressionReport::empty)
    }

    /// Statistics for one tag
    pub fn operation_stats(&self, tag: &str) -> Option<OperationSnapshot> {
        self.metrics.snapshot(tag)
    }

    /// Statistics for every tag, sorted by tag
    pub fn all_operation_stats(&self) -> Vec<OperationSnapshot> {
        self.metrics.snapshots()
    }

    /// Forget all operation statistics
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Forget one tag's statistics; true if it had any
    pub fn reset_operation(&self, tag: &str) -> bool {
        self.metrics.reset_tag(tag)
    }

    /// Session lifecycle counters
    pub fn session_metrics(&self) -> SessionMetrics {
        self.coordinator.metrics()
    }

    /// Batch scheduler counters, when batching is enabled
    pub fn scheduler_stats(&self) -> Option<SchedulerStats> {
        self.scheduler.as_ref().map(BatchScheduler::stats)
    }

    /// Full point-in-time report
    ///
    /// Falls back to session and scheduler counters only if gathering
    /// operation statistics panicked.
    pub fn performance_report(&self) -> PerformanceReport {
        let sessions = self.coordinator.metrics();
        let scheduler = self.scheduler_stats();
        guarded("performance report", || {
            PerformanceReport::build(
                &self.metrics,
                &self.baselines,
                sessions.clone(),
                scheduler.clone(),
            )
        })
        .unwrap_or_else(|| {
            PerformanceReport::build(
                &OperationMetrics::default(),
                &RegressionBaselines::default(),
                sessions,
                scheduler,
            )
        })
    }

    /// Human-readable summary of [`ExecutionFacade::performance_report`]
    pub fn summary(&self) -> String {
        self.performance_report().summary()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Hold queued operations until `resume_batching`
    ///
    /// Admission is unaffected: bursting calls still queue and block.
    pub fn pause_batching(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.pause();
        }
    }

    /// Let the drain thread collect batches again
    pub fn resume_batching(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.resume();
        }
    }

    /// Operations waiting for a drain
    pub fn queued_operations(&self) -> usize {
        self.scheduler.as_ref().map_or(0, BatchScheduler::queue_depth)
    }

    /// Stop the drain thread and cancel queued operations
    ///
    /// Later calls to `execute` run directly. Idempotent; also run on drop.
    pub fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown();
        }
    }
}

impl fmt::Debug for ExecutionFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionFacade")
            .field("batching", &self.scheduler.is_some())
            .field("sessions", &self.coordinator.metrics())
            .finish()
    }
}

/// Telemetry never disturbs execution: a panic in `f` is logged and dropped.
fn guarded<R>(what: &str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            warn!(
                target: "cadbatch::metrics",
                "Panic during {} swallowed: {}",
                what,
                panic_message(payload.as_ref())
            );
            None
        }
    }
}
