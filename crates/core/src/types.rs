//! Identifier and handle types shared across the workspace

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An object resolved from the host document.
///
/// The engine treats host objects as opaque; callers downcast to the concrete
/// type they expect (see `Session::get_object`).
pub type HostObject = Arc<dyn Any + Send + Sync>;

/// Identifier of an object in the host document
///
/// Id `0` is the null id: it never resolves to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The null object id
    pub const NULL: ObjectId = ObjectId(0);

    /// Wrap a raw id
    pub const fn new(raw: u64) -> Self {
        ObjectId(raw)
    }

    /// Raw id value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// True for the null id
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        ObjectId::NULL
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// Access mode requested when resolving an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenMode {
    /// Read-only access
    ForRead,
    /// Access with intent to modify
    ForWrite,
    /// Notification-only access (no reads of object state expected)
    ForNotify,
}

/// Opaque handle of one open transaction on the host resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Wrap a provider-assigned id
    pub const fn new(raw: u64) -> Self {
        SessionHandle(raw)
    }

    /// Raw id value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}
