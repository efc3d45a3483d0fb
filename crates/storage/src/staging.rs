//! Per-session staged write-sets
//!
//! A session never touches the committed table directly. Writes land in a
//! `StagedWrites` set and are applied in one step at commit time, so a failed
//! or aborted session leaves the committed table untouched.

use cadbatch_core::{DocumentWriter, EngineError, EngineResult, HostObject, ObjectId};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Staged state of one object
#[derive(Clone)]
pub enum StagedEntry {
    /// Object inserted or replaced in this session
    Write(HostObject),
    /// Object erased in this session
    Erase,
}

/// Write-set accumulated by one session
#[derive(Default, Clone)]
pub struct StagedWrites {
    entries: FxHashMap<ObjectId, StagedEntry>,
}

impl StagedWrites {
    /// Create an empty write-set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Staged state of `id`, if this session touched it
    pub fn get(&self, id: ObjectId) -> Option<&StagedEntry> {
        self.entries.get(&id)
    }

    /// Fold a later write-set into this one (later entries win)
    pub fn merge(&mut self, later: StagedWrites) {
        self.entries.extend(later.entries);
    }

    /// Consume into (id, entry) pairs
    pub fn into_entries(self) -> impl Iterator<Item = (ObjectId, StagedEntry)> {
        self.entries.into_iter()
    }
}

/// `DocumentWriter` over a scratch write-set
///
/// `exists` answers whether an id is live as seen from the session *before*
/// this mutation; the scratch set covers writes made by the mutation itself.
pub(crate) struct StagingWriter<'a> {
    pub(crate) scratch: StagedWrites,
    pub(crate) next_id: &'a AtomicU64,
    pub(crate) exists: &'a dyn Fn(ObjectId) -> bool,
}

impl StagingWriter<'_> {
    fn is_live(&self, id: ObjectId) -> bool {
        if id.is_null() {
            return false;
        }
        match self.scratch.get(id) {
            Some(StagedEntry::Write(_)) => true,
            Some(StagedEntry::Erase) => false,
            None => (self.exists)(id),
        }
    }
}

impl DocumentWriter for StagingWriter<'_> {
    fn insert(&mut self, object: HostObject) -> ObjectId {
        let id = ObjectId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.scratch.entries.insert(id, StagedEntry::Write(object));
        id
    }

    fn replace(&mut self, id: ObjectId, object: HostObject) -> EngineResult<()> {
        if !self.is_live(id) {
            return Err(EngineError::ObjectNotFound(id));
        }
        self.scratch.entries.insert(id, StagedEntry::Write(object));
        Ok(())
    }

    fn erase(&mut self, id: ObjectId) -> EngineResult<()> {
        if !self.is_live(id) {
            return Err(EngineError::ObjectNotFound(id));
        }
        self.scratch.entries.insert(id, StagedEntry::Erase);
        Ok(())
    }
}
