//! In-memory host document
//!
//! `MemoryDocument` implements [`SessionProvider`] over a committed object
//! table guarded by one `RwLock`, plus a `DashMap` of per-session staged
//! write-sets keyed by handle.
//!
//! # Design
//!
//! - Sessions never contend with each other while mutating: each one only
//!   touches its own staged entry.
//! - Commit removes the session's write-set and applies it under a single
//!   write lock, so readers observe all of a session's writes or none.
//! - Erased ids are remembered, so "erased" and "never existed" stay
//!   distinguishable for diagnostics even though both resolve to `None`.
//! - A nested session keeps its own write-set and a link to its parent.
//!   Resolving walks the chain innermost first; committing merges the
//!   write-set into the parent instead of the table.
//!
//! # Fault Injection
//!
//! `fail_next_begin`, `fail_next_commit` and `set_fail_all_commits` turn the
//! next begin/commit (or every commit) into a session-level fault. A failed
//! commit discards the write-set, matching the provider contract. Nested
//! commits never consume an injected commit fault; `fail_next_nested_begin`
//! covers the nested side.

use crate::staging::{StagedEntry, StagedWrites, StagingWriter};
use cadbatch_core::{
    DocumentWriter, EngineError, EngineResult, HostObject, ObjectId, OpenMode, SessionHandle,
    SessionProvider,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
struct Table {
    objects: FxHashMap<ObjectId, HostObject>,
    erased: FxHashSet<ObjectId>,
}

/// Counters describing provider activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentStats {
    /// Sessions opened
    pub begins: u64,
    /// Sessions committed successfully
    pub commits: u64,
    /// Sessions aborted
    pub aborts: u64,
    /// Commits that failed (injected faults)
    pub failed_commits: u64,
    /// Nested sessions opened
    pub nested_begins: u64,
    /// Nested sessions folded into their parent
    pub nested_commits: u64,
    /// Nested sessions discarded
    pub nested_aborts: u64,
    /// Sessions currently open (nested included)
    pub open_sessions: usize,
    /// Live committed objects
    pub objects: usize,
}

/// In-memory reference implementation of the host document
pub struct MemoryDocument {
    table: RwLock<Table>,
    sessions: DashMap<SessionHandle, StagedWrites>,
    parents: DashMap<SessionHandle, SessionHandle>,
    next_handle: AtomicU64,
    next_object_id: AtomicU64,
    fail_next_begin: AtomicBool,
    fail_next_nested_begin: AtomicBool,
    fail_next_commit: AtomicBool,
    fail_all_commits: AtomicBool,
    begins: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    failed_commits: AtomicU64,
    nested_begins: AtomicU64,
    nested_commits: AtomicU64,
    nested_aborts: AtomicU64,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table::default()),
            sessions: DashMap::new(),
            parents: DashMap::new(),
            next_handle: AtomicU64::new(1),
            next_object_id: AtomicU64::new(1),
            fail_next_begin: AtomicBool::new(false),
            fail_next_nested_begin: AtomicBool::new(false),
            fail_next_commit: AtomicBool::new(false),
            fail_all_commits: AtomicBool::new(false),
            begins: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
            failed_commits: AtomicU64::new(0),
            nested_begins: AtomicU64::new(0),
            nested_commits: AtomicU64::new(0),
            nested_aborts: AtomicU64::new(0),
        }
    }

    /// Create an empty document behind an `Arc`, ready to hand to the engine
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert an object directly into the committed table (no session)
    ///
    /// Used to seed fixtures.
    pub fn insert_committed(&self, object: HostObject) -> ObjectId {
        let id = ObjectId::new(self.next_object_id.fetch_add(1, Ordering::Relaxed));
        self.table.write().objects.insert(id, object);
        id
    }

    /// Committed state of `id`
    pub fn committed(&self, id: ObjectId) -> Option<HostObject> {
        self.table.read().objects.get(&id).cloned()
    }

    /// Committed state of `id`, downcast to `T`
    pub fn committed_as<T: Any + Send + Sync>(&self, id: ObjectId) -> Option<Arc<T>> {
        self.committed(id).and_then(|obj| obj.downcast::<T>().ok())
    }

    /// True if `id` is live in the committed table
    pub fn contains(&self, id: ObjectId) -> bool {
        self.table.read().objects.contains_key(&id)
    }

    /// True if `id` was erased by a committed session
    pub fn is_erased(&self, id: ObjectId) -> bool {
        self.table.read().erased.contains(&id)
    }

    /// Number of live committed objects
    pub fn object_count(&self) -> usize {
        self.table.read().objects.len()
    }

    /// Make the next `begin_session` fail
    pub fn fail_next_begin(&self) {
        self.fail_next_begin.store(true, Ordering::SeqCst);
    }

    /// Make the next `begin_nested` fail
    pub fn fail_next_nested_begin(&self) {
        self.fail_next_nested_begin.store(true, Ordering::SeqCst);
    }

    /// Make the next `commit` of a top-level session fail
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make every `commit` fail until reset
    pub fn set_fail_all_commits(&self, fail: bool) {
        self.fail_all_commits.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of activity counters
    pub fn stats(&self) -> DocumentStats {
        DocumentStats {
            begins: self.begins.load(Ordering::SeqCst),
            commits: self.commits.load(Ordering::SeqCst),
            aborts: self.aborts.load(Ordering::SeqCst),
            failed_commits: self.failed_commits.load(Ordering::SeqCst),
            nested_begins: self.nested_begins.load(Ordering::SeqCst),
            nested_commits: self.nested_commits.load(Ordering::SeqCst),
            nested_aborts: self.nested_aborts.load(Ordering::SeqCst),
            open_sessions: self.sessions.len(),
            objects: self.object_count(),
        }
    }

    fn is_live(&self, handle: SessionHandle, id: ObjectId) -> bool {
        self.resolve(handle, id, OpenMode::ForRead).is_some()
    }

    fn commit_nested(&self, handle: SessionHandle, parent: SessionHandle) -> EngineResult<()> {
        let (_, staged) = self
            .sessions
            .remove(&handle)
            .ok_or(EngineError::SessionClosed(handle))?;
        self.parents.remove(&handle);

        let writes = staged.len();
        match self.sessions.get_mut(&parent) {
            Some(mut target) => target.merge(staged),
            None => return Err(EngineError::SessionClosed(parent)),
        }
        self.nested_commits.fetch_add(1, Ordering::SeqCst);
        debug!(target: "cadbatch::document", %handle, %parent, writes, "Nested session folded");
        Ok(())
    }
}

impl SessionProvider for MemoryDocument {
    fn begin_session(&self) -> EngineResult<SessionHandle> {
        if self.fail_next_begin.swap(false, Ordering::SeqCst) {
            warn!(target: "cadbatch::document", "Injected begin failure");
            return Err(EngineError::session_begin("injected begin failure"));
        }

        let handle = SessionHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.sessions.insert(handle, StagedWrites::new());
        self.begins.fetch_add(1, Ordering::SeqCst);
        debug!(target: "cadbatch::document", %handle, "Session opened");
        Ok(handle)
    }

    fn begin_nested(&self, parent: SessionHandle) -> EngineResult<SessionHandle> {
        if !self.sessions.contains_key(&parent) {
            return Err(EngineError::SessionClosed(parent));
        }
        if self.fail_next_nested_begin.swap(false, Ordering::SeqCst) {
            warn!(target: "cadbatch::document", %parent, "Injected nested begin failure");
            return Err(EngineError::session_begin("injected nested begin failure"));
        }

        let handle = SessionHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.sessions.insert(handle, StagedWrites::new());
        self.parents.insert(handle, parent);
        self.nested_begins.fetch_add(1, Ordering::SeqCst);
        debug!(target: "cadbatch::document", %handle, %parent, "Nested session opened");
        Ok(handle)
    }

    fn commit(&self, handle: SessionHandle) -> EngineResult<()> {
        let parent = self.parents.get(&handle).map(|p| *p.value());
        if let Some(parent) = parent {
            return self.commit_nested(handle, parent);
        }

        let (_, staged) = self
            .sessions
            .remove(&handle)
            .ok_or(EngineError::SessionClosed(handle))?;

        let injected = self.fail_next_commit.swap(false, Ordering::SeqCst)
            || self.fail_all_commits.load(Ordering::SeqCst);
        if injected {
            self.failed_commits.fetch_add(1, Ordering::SeqCst);
            warn!(
                target: "cadbatch::document",
                %handle,
                discarded = staged.len(),
                "Injected commit failure"
            );
            return Err(EngineError::session_commit(handle, "injected commit failure"));
        }

        let writes = staged.len();
        {
            let mut table = self.table.write();
            for (id, entry) in staged.into_entries() {
                match entry {
                    StagedEntry::Write(object) => {
                        table.erased.remove(&id);
                        table.objects.insert(id, object);
                    }
                    StagedEntry::Erase => {
                        table.objects.remove(&id);
                        table.erased.insert(id);
                    }
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(target: "cadbatch::document", %handle, writes, "Session committed");
        Ok(())
    }

    fn abort(&self, handle: SessionHandle) -> EngineResult<()> {
        let (_, staged) = self
            .sessions
            .remove(&handle)
            .ok_or(EngineError::SessionClosed(handle))?;
        if self.parents.remove(&handle).is_some() {
            self.nested_aborts.fetch_add(1, Ordering::SeqCst);
        } else {
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }
        debug!(
            target: "cadbatch::document",
            %handle,
            discarded = staged.len(),
            "Session aborted"
        );
        Ok(())
    }

    fn resolve(&self, handle: SessionHandle, id: ObjectId, _mode: OpenMode) -> Option<HostObject> {
        if id.is_null() {
            return None;
        }

        // Staged state shadows the committed table, innermost session first
        let mut current = Some(handle);
        while let Some(session) = current {
            if let Some(staged) = self.sessions.get(&session) {
                match staged.get(id) {
                    Some(StagedEntry::Write(object)) => return Some(Arc::clone(object)),
                    Some(StagedEntry::Erase) => return None,
                    None => {}
                }
            }
            current = self.parents.get(&session).map(|p| *p.value());
        }

        self.table.read().objects.get(&id).cloned()
    }

    fn mutate(
        &self,
        handle: SessionHandle,
        mutation: &mut dyn FnMut(&mut dyn DocumentWriter) -> EngineResult<()>,
    ) -> EngineResult<()> {
        if !self.sessions.contains_key(&handle) {
            return Err(EngineError::SessionClosed(handle));
        }

        // Writes go to a scratch set first so a failing mutation stages nothing,
        // and so the mutation can resolve objects without holding a shard lock.
        let exists = |id: ObjectId| self.is_live(handle, id);
        let mut writer = StagingWriter {
            scratch: StagedWrites::new(),
            next_id: &self.next_object_id,
            exists: &exists,
        };
        mutation(&mut writer)?;
        let scratch = writer.scratch;

        match self.sessions.get_mut(&handle) {
            Some(mut staged) => {
                staged.merge(scratch);
                Ok(())
            }
            None => Err(EngineError::SessionClosed(handle)),
        }
    }
}
