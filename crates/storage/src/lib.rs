//! Storage layer for cadbatch
//!
//! This crate provides an in-memory reference implementation of the
//! Session Provider surface:
//! - MemoryDocument: committed object table + per-session staged write-sets
//! - StagedWrites: the write-set a session accumulates until commit
//!
//! It stands in for a real host document in tests, benchmarks, and
//! embedders that have no host attached. Fault injection hooks make
//! session-level failures reproducible.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod staging;

pub use document::{DocumentStats, MemoryDocument};
pub use staging::{StagedEntry, StagedWrites};
