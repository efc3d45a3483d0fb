//! A single scoped transaction against the host document
//!
//! States: `Open → Committed` or `Open → Aborted`. Only the frame that opened
//! a session may close it, so `commit`/`abort` are crate-private; callers get
//! `&Session` and can read and mutate through it, never close it.
//!
//! A Session is `!Send` and `!Sync`: it lives on the thread that began it.
//!
//! A nested session (see [`SessionCoordinator::begin_nested`]) scopes one
//! queued operation inside its group's session. Its commit only folds the
//! operation's writes into the parent.

use crate::coordinator::SessionCoordinator;
use cadbatch_core::{
    DocumentWriter, EngineError, EngineResult, HostObject, ObjectId, OpenMode, SessionHandle,
};
use std::any::Any;
use std::cell::Cell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transaction open, accepting mutations
    Open,
    /// Mutations made durable
    Committed,
    /// Mutations discarded
    Aborted,
}

/// One open transaction on the host document
pub struct Session {
    handle: SessionHandle,
    parent: Option<SessionHandle>,
    coordinator: Arc<SessionCoordinator>,
    state: Cell<SessionState>,
    _thread_bound: PhantomData<Rc<()>>,
}

impl Session {
    pub(crate) fn new(
        handle: SessionHandle,
        parent: Option<SessionHandle>,
        coordinator: Arc<SessionCoordinator>,
    ) -> Self {
        Self {
            handle,
            parent,
            coordinator,
            state: Cell::new(SessionState::Open),
            _thread_bound: PhantomData,
        }
    }

    /// Provider handle of this session
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// Handle of the enclosing session, if this one is nested
    pub fn parent(&self) -> Option<SessionHandle> {
        self.parent
    }

    /// True if committing this session only folds into a parent
    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// True while the transaction accepts mutations
    pub fn is_open(&self) -> bool {
        self.state.get() == SessionState::Open
    }

    /// Coordinator that opened this session
    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.set(state);
    }

    /// Resolve an object as seen from inside this session
    ///
    /// Returns `None` for null, erased, and unknown ids, and once the session
    /// is closed.
    pub fn resolve(&self, id: ObjectId, mode: OpenMode) -> Option<HostObject> {
        if id.is_null() || !self.is_open() {
            return None;
        }
        self.coordinator.provider().resolve(self.handle, id, mode)
    }

    /// Resolve an object and downcast it to `T`
    ///
    /// "Not found" is a valid outcome, not an error: a null id, an erased or
    /// unknown id, and an object of a different concrete type all yield `None`.
    pub fn get_object<T: Any + Send + Sync>(&self, id: ObjectId, mode: OpenMode) -> Option<Arc<T>> {
        self.resolve(id, mode)
            .and_then(|object| object.downcast::<T>().ok())
    }

    /// Run a mutation against this session's staged state
    ///
    /// # Errors
    ///
    /// `SessionClosed` if the session is no longer open; otherwise whatever the
    /// mutation or the provider returns.
    pub fn mutate<F>(&self, mut mutation: F) -> EngineResult<()>
    where
        F: FnMut(&mut dyn DocumentWriter) -> EngineResult<()>,
    {
        if !self.is_open() {
            return Err(EngineError::SessionClosed(self.handle));
        }
        self.coordinator
            .provider()
            .mutate(self.handle, &mut mutation)
    }

    /// Add a new object
    pub fn insert(&self, object: HostObject) -> EngineResult<ObjectId> {
        let mut object = Some(object);
        let mut inserted = ObjectId::NULL;
        self.mutate(|writer| {
            if let Some(object) = object.take() {
                inserted = writer.insert(object);
            }
            Ok(())
        })?;
        Ok(inserted)
    }

    /// Replace the state of an existing object
    pub fn replace(&self, id: ObjectId, object: HostObject) -> EngineResult<()> {
        let mut object = Some(object);
        self.mutate(|writer| match object.take() {
            Some(object) => writer.replace(id, object),
            None => Ok(()),
        })
    }

    /// Erase an existing object
    pub fn erase(&self, id: ObjectId) -> EngineResult<()> {
        self.mutate(|writer| writer.erase(id))
    }

    pub(crate) fn commit(&self) -> EngineResult<()> {
        self.coordinator.commit(self)
    }

    pub(crate) fn abort(&self) -> EngineResult<()> {
        self.coordinator.abort(self)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("parent", &self.parent)
            .field("state", &self.state.get())
            .finish()
    }
}
