//! Session coordinator for managing session lifecycle
//!
//! The SessionCoordinator wraps the host's SessionProvider and adds:
//! - Session state transitions (Open → Committed / Open → Aborted)
//! - Active session tracking
//! - Session metrics (started, committed, aborted, failed commits)
//! - Nested sessions scoping single queued operations, counted separately
//! - Commit rate calculation

use crate::session::{Session, SessionState};
use cadbatch_core::{EngineError, EngineResult, SessionProvider};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Session coordinator for one host document
///
/// Every Session is opened through a coordinator and closed through the same
/// coordinator. The SessionContext uses coordinator identity to decide whether
/// an enclosing session may be reused.
///
/// # Memory Ordering
///
/// The metric counters use Relaxed ordering: they are purely observational and
/// do not synchronize any other memory operations. `active_count` is read with
/// SeqCst by `wait_for_idle` only.
pub struct SessionCoordinator {
    /// Host transaction surface
    provider: Arc<dyn SessionProvider>,
    /// Currently open sessions
    active_count: AtomicU64,
    /// Total sessions opened
    total_started: AtomicU64,
    /// Total sessions committed
    total_committed: AtomicU64,
    /// Total sessions aborted (includes failed commits)
    total_aborted: AtomicU64,
    /// Commits rejected by the provider
    commit_failures: AtomicU64,
    /// Nested sessions opened
    nested_started: AtomicU64,
    /// Nested sessions folded into their parent
    nested_committed: AtomicU64,
    /// Nested sessions discarded (failed operations)
    nested_aborted: AtomicU64,
}

impl SessionCoordinator {
    /// Create a coordinator over a provider
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            active_count: AtomicU64::new(0),
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_aborted: AtomicU64::new(0),
            commit_failures: AtomicU64::new(0),
            nested_started: AtomicU64::new(0),
            nested_committed: AtomicU64::new(0),
            nested_aborted: AtomicU64::new(0),
        }
    }

    /// The provider this coordinator opens sessions against
    pub fn provider(&self) -> &Arc<dyn SessionProvider> {
        &self.provider
    }

    /// Open a new session
    ///
    /// # Errors
    ///
    /// Returns the provider's session-level fault if the transaction cannot
    /// be opened. Nothing is counted as started in that case.
    pub fn begin(self: &Arc<Self>) -> EngineResult<Session> {
        let handle = self.provider.begin_session().map_err(|e| {
            warn!(target: "cadbatch::session", error = %e, "Session begin failed");
            e
        })?;

        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "cadbatch::session", %handle, "Session started");

        Ok(Session::new(handle, None, Arc::clone(self)))
    }

    /// Open a session nested inside `parent`
    ///
    /// Nested sessions do not count towards `active_count` or the top-level
    /// totals; their parent is already counted.
    ///
    /// # Errors
    ///
    /// `SessionClosed` if `parent` is not open, otherwise the provider's fault.
    pub fn begin_nested(self: &Arc<Self>, parent: &Session) -> EngineResult<Session> {
        if !parent.is_open() {
            return Err(EngineError::SessionClosed(parent.handle()));
        }
        let handle = self.provider.begin_nested(parent.handle()).map_err(|e| {
            warn!(
                target: "cadbatch::session",
                parent = %parent.handle(),
                error = %e,
                "Nested session begin failed"
            );
            e
        })?;

        self.nested_started.fetch_add(1, Ordering::Relaxed);
        trace!(
            target: "cadbatch::session",
            %handle,
            parent = %parent.handle(),
            "Nested session started"
        );

        Ok(Session::new(handle, Some(parent.handle()), Arc::clone(self)))
    }

    /// Commit a session through the provider
    ///
    /// A failed commit leaves the session Aborted; the provider contract
    /// guarantees none of its mutations were applied.
    pub(crate) fn commit(&self, session: &Session) -> EngineResult<()> {
        let handle = session.handle();
        if !session.is_open() {
            return Err(EngineError::SessionClosed(handle));
        }

        if session.is_nested() {
            return self.commit_nested(session);
        }

        match self.provider.commit(handle) {
            Ok(()) => {
                session.set_state(SessionState::Committed);
                self.record_commit();
                debug!(target: "cadbatch::session", %handle, "Session committed");
                Ok(())
            }
            Err(e) => {
                session.set_state(SessionState::Aborted);
                self.commit_failures.fetch_add(1, Ordering::Relaxed);
                self.record_abort();
                warn!(target: "cadbatch::session", %handle, error = %e, "Session commit failed");
                Err(e)
            }
        }
    }

    /// Abort a session through the provider
    ///
    /// The session is considered closed even if the provider reports an error.
    pub(crate) fn abort(&self, session: &Session) -> EngineResult<()> {
        let handle = session.handle();
        if !session.is_open() {
            return Err(EngineError::SessionClosed(handle));
        }

        session.set_state(SessionState::Aborted);
        if session.is_nested() {
            self.nested_aborted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.record_abort();
        }
        match self.provider.abort(handle) {
            Ok(()) => {
                debug!(target: "cadbatch::session", %handle, "Session aborted");
                Ok(())
            }
            Err(e) => {
                warn!(target: "cadbatch::session", %handle, error = %e, "Session abort failed");
                Err(e)
            }
        }
    }

    fn commit_nested(&self, session: &Session) -> EngineResult<()> {
        let handle = session.handle();
        match self.provider.commit(handle) {
            Ok(()) => {
                session.set_state(SessionState::Committed);
                self.nested_committed.fetch_add(1, Ordering::Relaxed);
                trace!(
                    target: "cadbatch::session",
                    %handle,
                    "Nested session folded into parent"
                );
                Ok(())
            }
            Err(e) => {
                session.set_state(SessionState::Aborted);
                self.nested_aborted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "cadbatch::session",
                    %handle,
                    error = %e,
                    "Nested session commit failed"
                );
                Err(e)
            }
        }
    }

    fn record_commit(&self) {
        // Saturating decrement to prevent underflow
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
        self.total_committed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_abort(&self) {
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
        self.total_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get session metrics
    pub fn metrics(&self) -> SessionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);

        SessionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            nested_started: self.nested_started.load(Ordering::Relaxed),
            nested_committed: self.nested_committed.load(Ordering::Relaxed),
            nested_aborted: self.nested_aborted.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }

    /// Get current open session count
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait for all open sessions to close
    ///
    /// Spins with short sleeps until active_count reaches 0.
    ///
    /// # Returns
    /// * `true` if all sessions closed within timeout
    /// * `false` if timeout expired with sessions still open
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let sleep_duration = Duration::from_millis(1);

        while self.active_count.load(Ordering::SeqCst) > 0 {
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(sleep_duration);
        }
        true
    }
}

/// Session metrics
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetrics {
    /// Number of currently open sessions
    pub active_count: u64,
    /// Total number of sessions opened
    pub total_started: u64,
    /// Total number of sessions committed
    pub total_committed: u64,
    /// Total number of sessions aborted
    pub total_aborted: u64,
    /// Commits the provider rejected (counted in `total_aborted` too)
    pub commit_failures: u64,
    /// Nested sessions opened for queued operations
    pub nested_started: u64,
    /// Nested sessions folded into their group session
    pub nested_committed: u64,
    /// Nested sessions rolled back (operation failed or panicked)
    pub nested_aborted: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl SessionMetrics {
    /// Total sessions that closed (committed + aborted)
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_aborted
    }

    /// Abort rate (aborted / started)
    pub fn abort_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_aborted as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
