//! Collaborator traits consumed by the engine
//!
//! The host document is reached only through [`SessionProvider`]. Everything
//! behind it (drawing database, undo stack, document locks) is opaque.

use crate::error::EngineResult;
use crate::types::{HostObject, ObjectId, OpenMode, SessionHandle};

/// Staged writes applied through [`SessionProvider::mutate`]
pub trait DocumentWriter {
    /// Add a new object; returns its id
    fn insert(&mut self, object: HostObject) -> ObjectId;

    /// Replace the state of an existing object
    ///
    /// # Errors
    ///
    /// `ObjectNotFound` if the id is null, erased, or unknown.
    fn replace(&mut self, id: ObjectId, object: HostObject) -> EngineResult<()>;

    /// Erase an existing object
    ///
    /// # Errors
    ///
    /// `ObjectNotFound` if the id is null, already erased, or unknown.
    fn erase(&mut self, id: ObjectId) -> EngineResult<()>;
}

/// The host's document/transaction surface
///
/// The resource tolerates one open write transaction per logical call chain.
/// Implementations must be callable from any thread; a handle is only ever
/// used by the thread that began it.
///
/// # Contract
///
/// - `commit` either applies every mutation of the session or none of them.
///   A failed commit closes the handle; the engine does not call `abort`
///   afterwards.
/// - `abort` discards every mutation of the session and closes the handle.
/// - `resolve` never fails: absent, erased, and null ids resolve to `None`.
/// - A nested session sees its parent's staged state. Committing it folds
///   its writes into the parent (nothing becomes durable until the parent
///   commits); aborting it discards only its own writes.
pub trait SessionProvider: Send + Sync {
    /// Open a transaction
    fn begin_session(&self) -> EngineResult<SessionHandle>;

    /// Open a transaction nested inside the open session `parent`
    ///
    /// # Errors
    ///
    /// `SessionClosed` if `parent` is not open, or a session-level fault.
    fn begin_nested(&self, parent: SessionHandle) -> EngineResult<SessionHandle>;

    /// Make the session's mutations durable and close it
    fn commit(&self, handle: SessionHandle) -> EngineResult<()>;

    /// Discard the session's mutations and close it
    fn abort(&self, handle: SessionHandle) -> EngineResult<()>;

    /// Resolve an object as seen from inside the session
    fn resolve(&self, handle: SessionHandle, id: ObjectId, mode: OpenMode) -> Option<HostObject>;

    /// Run a mutation against the session's staged state
    ///
    /// If `mutation` returns an error, none of the writes it issued are
    /// staged.
    fn mutate(
        &self,
        handle: SessionHandle,
        mutation: &mut dyn FnMut(&mut dyn DocumentWriter) -> EngineResult<()>,
    ) -> EngineResult<()>;
}

/// Source of memory measurements for operation telemetry
///
/// Returns bytes currently attributed to the process (or the host document),
/// or `None` when no measurement is available. The engine records the
/// positive delta across an operation.
pub trait MemorySampler: Send + Sync {
    /// Current allocated bytes
    fn allocated_bytes(&self) -> Option<u64>;
}
