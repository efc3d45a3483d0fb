//! Queued operations awaiting a drain
//!
//! A `PendingOperation` pairs a type-erased closure with the one-shot sender
//! its caller is blocked on. Execution and resolution are separate steps:
//! the closure runs inside its own nested session under the group's session,
//! but the caller only learns the outcome after the group's commit, because a
//! failed commit overrides every operation's own result.
//!
//! Resolution consumes the operation, so each caller is resolved exactly once.
//! An operation dropped without being resolved closes its channel, which the
//! caller observes as cancellation.

use crate::session::Session;
use cadbatch_core::{panic_message, EngineError};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tokio::sync::oneshot;

trait QueuedWork: Send {
    fn run(&mut self, tag: &str, session: &Session);
    fn failure(&self) -> Option<String>;
    fn resolve(self: Box<Self>, fault: Option<&EngineError>);
}

struct TypedWork<T, E, F> {
    func: Option<F>,
    outcome: Option<Result<T, E>>,
    responder: oneshot::Sender<Result<T, E>>,
}

impl<T, E, F> QueuedWork for TypedWork<T, E, F>
where
    F: FnOnce(&Session) -> Result<T, E> + Send,
    T: Send,
    E: From<EngineError> + fmt::Display + Send,
{
    fn run(&mut self, tag: &str, session: &Session) {
        let Some(func) = self.func.take() else {
            return;
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| func(session))) {
            Ok(result) => result,
            Err(payload) => Err(E::from(EngineError::operation_panicked(
                tag,
                panic_message(payload.as_ref()),
            ))),
        };
        self.outcome = Some(outcome);
    }

    fn failure(&self) -> Option<String> {
        match &self.outcome {
            Some(Err(e)) => Some(e.to_string()),
            _ => None,
        }
    }

    fn resolve(self: Box<Self>, fault: Option<&EngineError>) {
        let this = *self;
        let result = match fault {
            Some(fault) => Err(E::from(fault.clone())),
            None => this.outcome.unwrap_or_else(|| {
                Err(E::from(EngineError::cancelled(
                    "operation was never executed",
                )))
            }),
        };
        // The caller may have stopped waiting; nothing to do then
        let _ = this.responder.send(result);
    }
}

/// A queued unit of work and the completion its caller waits on
pub(crate) struct PendingOperation {
    tag: String,
    enqueued_at: Instant,
    work: Box<dyn QueuedWork>,
}

impl PendingOperation {
    /// Wrap `func`; the result is delivered through `responder`
    pub(crate) fn new<T, E, F>(
        tag: &str,
        func: F,
        responder: oneshot::Sender<Result<T, E>>,
    ) -> Self
    where
        F: FnOnce(&Session) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<EngineError> + fmt::Display + Send + 'static,
    {
        Self {
            tag: tag.to_string(),
            enqueued_at: Instant::now(),
            work: Box::new(TypedWork {
                func: Some(func),
                outcome: None,
                responder,
            }),
        }
    }

    pub(crate) fn tag(&self) -> &str {
        &self.tag
    }

    pub(crate) fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Run the closure inside `session`, catching panics
    pub(crate) fn run(&mut self, session: &Session) {
        self.work.run(&self.tag, session);
    }

    /// Operation-level failure message, if the closure failed
    pub(crate) fn failure(&self) -> Option<String> {
        self.work.failure()
    }

    /// Deliver the outcome, or `fault` if the session failed
    pub(crate) fn resolve(self, fault: Option<&EngineError>) {
        self.work.resolve(fault);
    }
}
