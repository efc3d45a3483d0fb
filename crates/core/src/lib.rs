//! Core types and traits for cadbatch
//!
//! This crate defines the foundational types shared by every layer:
//! - ObjectId / OpenMode: addressing objects in the host document
//! - SessionHandle: opaque id of one open host transaction
//! - EngineError: error hierarchy for session- and engine-level faults
//! - Traits: the narrow Session Provider surface the engine consumes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{panic_message, EngineError, EngineResult};
pub use traits::{DocumentWriter, MemorySampler, SessionProvider};
pub use types::{HostObject, ObjectId, OpenMode, SessionHandle};
