//! Thread-local session context
//!
//! Each thread keeps a stack of the sessions it has open. Entering
//! `execute_safely`/`execute_batch` either joins the nearest session on the
//! stack opened by the same coordinator, or opens, pushes, and later closes a
//! new one. Nested calls therefore share one transaction and commit as a unit.
//!
//! # Architecture
//!
//! The stack uses thread-local storage, so no synchronization is needed:
//! - Only the frame that pushed a session pops and closes it
//! - Inner frames observe the session but never commit or abort it
//! - A frame unwinding from a panic aborts its session on the way out
//!
//! Sessions from different coordinators (different host documents) may be
//! stacked on one thread; each coordinator only ever joins its own.

use crate::coordinator::SessionCoordinator;
use crate::session::Session;
use cadbatch_core::EngineError;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{trace, warn};

thread_local! {
    /// Sessions opened on this thread, innermost last
    static SESSION_STACK: RefCell<Vec<Rc<Session>>> = RefCell::new(Vec::new());
}

/// Access to the calling thread's session stack
pub struct SessionContext;

impl SessionContext {
    /// Top-of-stack session for the calling thread, if any
    pub fn current() -> Option<Rc<Session>> {
        SESSION_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Nearest open session on this thread opened by `coordinator`
    pub fn current_for(coordinator: &Arc<SessionCoordinator>) -> Option<Rc<Session>> {
        SESSION_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|session| {
                    session.is_open() && Arc::ptr_eq(session.coordinator(), coordinator)
                })
                .cloned()
        })
    }

    /// Number of sessions on this thread's stack
    pub fn depth() -> usize {
        SESSION_STACK.with(|stack| stack.borrow().len())
    }

    /// Push `session` for the lifetime of the returned frame
    pub(crate) fn enter(session: Rc<Session>) -> SessionFrame {
        SESSION_STACK.with(|stack| stack.borrow_mut().push(Rc::clone(&session)));
        SessionFrame { session }
    }

    /// Run `func` inside a session and return its value
    ///
    /// Joins the current session for `coordinator` if there is one; the
    /// enclosing frame then decides commit or abort. Otherwise opens a new
    /// session, commits it if `func` returns `Ok`, aborts it if `func`
    /// returns `Err`.
    ///
    /// Errors returned by `func` reach the caller unchanged. Engine faults
    /// (begin or commit failed) are converted with `From<EngineError>`. An
    /// abort failure is logged and never replaces the caller's error.
    pub fn execute_safely<T, E, F>(coordinator: &Arc<SessionCoordinator>, func: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
        E: From<EngineError>,
    {
        if let Some(session) = Self::current_for(coordinator) {
            trace!(
                target: "cadbatch::session",
                handle = %session.handle(),
                "Joining current session"
            );
            return func(&session);
        }

        let session = Rc::new(coordinator.begin()?);
        let frame = Self::enter(Rc::clone(&session));

        let outcome = match func(&session) {
            Ok(value) => session.commit().map(|()| value).map_err(E::from),
            Err(err) => {
                if let Err(abort_err) = session.abort() {
                    warn!(
                        target: "cadbatch::session",
                        handle = %session.handle(),
                        error = %abort_err,
                        "Abort after failed operation did not complete"
                    );
                }
                Err(err)
            }
        };

        drop(frame);
        outcome
    }

    /// Run `action` inside a session; see [`SessionContext::execute_safely`]
    pub fn execute_batch<E, F>(coordinator: &Arc<SessionCoordinator>, action: F) -> Result<(), E>
    where
        F: FnOnce(&Session) -> Result<(), E>,
        E: From<EngineError>,
    {
        Self::execute_safely(coordinator, action)
    }
}

/// Owns one entry on the session stack
///
/// Dropping the frame pops its session. If the session is still open at that
/// point the frame is unwinding from a panic, and the session is aborted.
pub(crate) struct SessionFrame {
    session: Rc<Session>,
}

impl Drop for SessionFrame {
    fn drop(&mut self) {
        let _ = SESSION_STACK.try_with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert!(
                popped
                    .as_ref()
                    .is_some_and(|top| Rc::ptr_eq(top, &self.session)),
                "session stack popped out of order"
            );
        });

        if self.session.is_open() {
            warn!(
                target: "cadbatch::session",
                handle = %self.session.handle(),
                "Session frame exited without closing its session; aborting"
            );
            let _ = self.session.abort();
        }
    }
}
