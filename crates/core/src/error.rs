//! Error types for the execution engine
//!
//! Only faults raised by the engine itself live here. Errors returned by
//! caller closures are never wrapped in `EngineError`; the facade is generic
//! over the caller's error type and converts engine faults into it through
//! `From<EngineError>`.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::{ObjectId, SessionHandle};
use std::any::Any;
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Error types for the execution engine
///
/// `Clone` because a single session-level fault is delivered to every
/// operation that shared the failed session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The provider could not open a transaction
    #[error("Failed to begin session: {0}")]
    SessionBegin(String),

    /// The provider could not make the session's mutations durable
    #[error("Failed to commit session {handle}: {reason}")]
    SessionCommit {
        /// Session that failed to commit
        handle: SessionHandle,
        /// Provider-supplied reason
        reason: String,
    },

    /// The provider could not discard the session's mutations
    #[error("Failed to abort session {handle}: {reason}")]
    SessionAbort {
        /// Session that failed to abort
        handle: SessionHandle,
        /// Provider-supplied reason
        reason: String,
    },

    /// The session was already committed or aborted
    #[error("Session {0} is no longer open")]
    SessionClosed(SessionHandle),

    /// Mutation addressed an object that does not exist
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Mutation rejected by the provider
    #[error("Mutation rejected: {0}")]
    MutationRejected(String),

    /// A queued operation panicked while running inside its group
    #[error("Operation '{tag}' panicked: {message}")]
    OperationPanicked {
        /// Operation tag
        tag: String,
        /// Panic payload, when it was a string
        message: String,
    },

    /// A queued operation was discarded before it could run
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Session could not be opened
    pub fn session_begin(reason: impl Into<String>) -> Self {
        EngineError::SessionBegin(reason.into())
    }

    /// Session could not be committed
    pub fn session_commit(handle: SessionHandle, reason: impl Into<String>) -> Self {
        EngineError::SessionCommit {
            handle,
            reason: reason.into(),
        }
    }

    /// Session could not be aborted
    pub fn session_abort(handle: SessionHandle, reason: impl Into<String>) -> Self {
        EngineError::SessionAbort {
            handle,
            reason: reason.into(),
        }
    }

    /// Queued operation panicked
    pub fn operation_panicked(tag: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::OperationPanicked {
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// Queued operation discarded
    pub fn cancelled(reason: impl Into<String>) -> Self {
        EngineError::Cancelled(reason.into())
    }

    /// Invalid configuration
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        EngineError::InvalidConfig(reason.into())
    }

    /// Internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        EngineError::Internal(reason.into())
    }

    /// True for faults of the session itself (begin/commit/abort/closed).
    ///
    /// Such faults apply to every operation sharing the session, unlike
    /// operation-level failures which are scoped to one closure.
    pub fn is_session_fault(&self) -> bool {
        matches!(
            self,
            EngineError::SessionBegin(_)
                | EngineError::SessionCommit { .. }
                | EngineError::SessionAbort { .. }
                | EngineError::SessionClosed(_)
        )
    }

    /// True if the operation never ran because the engine shut down
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}
