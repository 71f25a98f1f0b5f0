//! Lifecycle shared by every index kind.
//!
//! An [`IndexCore`] binds one [`Backend`] (the per-kind structure and its
//! files) to a field of a store. It owns the state machine
//!
//! ```text
//! open ──► meta matches? ──yes──► load ──┐
//!              │                         ├──► attached ──► closed
//!              └──no──► rebuild by scan ─┘
//! ```
//!
//! and turns store notifications into key-level backend calls.
//!
//! The index meta file is removed once the index is loaded and rewritten
//! when the index is closed or checkpointed. The first mutation after a
//! checkpoint removes it again, so the files on disk are only trusted
//! when nothing changed since they were last flushed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use super::IndexListener;
use super::files::{IndexFiles, IndexMeta};
use super::key::{IndexKey, KeyKind, key_for};
use crate::codec::{BeanType, FieldDef, Value};
use crate::dump::{BulkIter, BulkReader, Dump, DumpAccess, DumpInner, DumpShared};
use crate::error::DumpError;

// ------------------------------------------------------------------------------------------------
// Backend
// ------------------------------------------------------------------------------------------------

/// Where a backend is being opened.
pub(crate) struct BackendContext<'a> {
    pub(crate) files: &'a IndexFiles,
    pub(crate) field: &'static str,
    pub(crate) kind: KeyKind,
    /// Store tombstones, for skipping dead entries during replay.
    pub(crate) is_deleted: &'a dyn Fn(u64) -> bool,
}

/// The per-kind part of an index.
///
/// Every method runs with the store lock held and the index state locked.
pub(crate) trait Backend: Send + Sized + 'static {
    /// Written into the index meta file.
    const KIND: &'static str;

    type Options: Clone + Send + Sync + 'static;

    /// Loads the state persisted at the last close.
    fn load(ctx: &BackendContext<'_>, options: &Self::Options) -> Result<Self, DumpError>;

    /// Starts an empty index whose files were just removed.
    fn create(ctx: &BackendContext<'_>, options: &Self::Options) -> Result<Self, DumpError>;

    /// Adds one entry during a rebuild scan.
    fn rebuild_add(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError> {
        self.add(key, pos)
    }

    /// Ends a rebuild scan.
    fn rebuild_finish(&mut self) -> Result<(), DumpError> {
        Ok(())
    }

    fn check_add(&self, field: &str, key: &IndexKey) -> Result<(), DumpError>;

    fn check_update(
        &self,
        field: &str,
        pos: u64,
        old: Option<&IndexKey>,
        new: Option<&IndexKey>,
        in_place: bool,
    ) -> Result<(), DumpError>;

    fn add(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError>;

    fn delete(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError>;

    /// In-place update of the record at `pos`.
    fn update(
        &mut self,
        pos: u64,
        old: Option<&IndexKey>,
        new: Option<&IndexKey>,
    ) -> Result<(), DumpError>;

    fn is_update_in_place_compatible(&self, old: Option<&IndexKey>, new: Option<&IndexKey>)
    -> bool;

    fn contains(&mut self, key: &IndexKey) -> Result<bool, DumpError>;

    /// Forces buffered index files to disk.
    fn flush(&mut self) -> Result<(), DumpError>;

    fn close(self) -> Result<(), DumpError>;
}

// ------------------------------------------------------------------------------------------------
// IndexCore
// ------------------------------------------------------------------------------------------------

pub(crate) struct IndexCore<B: BeanType, S: Backend> {
    dump: Weak<DumpShared<B>>,
    field: &'static FieldDef,
    kind: KeyKind,
    files: IndexFiles,
    /// `None` once closed.
    state: Mutex<Option<S>>,
    closed: AtomicBool,
    /// The meta file on disk describes the current state.
    checkpointed: AtomicBool,
}

impl<B: BeanType, S: Backend> IndexCore<B, S> {
    /// Attaches a new index on `field_name` to `dump`, loading it from
    /// disk when its meta matches the store, rebuilding it otherwise.
    pub(crate) fn open(
        dump: &Dump<B>,
        field_name: &str,
        options: S::Options,
    ) -> Result<Arc<Self>, DumpError> {
        let shared = dump.shared();
        shared.check_open()?;
        shared.require(DumpAccess::INDICES, "attaching an index requires INDICES")?;

        let schema = B::bean_schema();
        let field = schema.field_by_name(field_name).ok_or_else(|| {
            DumpError::InvalidArgument(format!(
                "{} has no field `{field_name}`",
                schema.type_name()
            ))
        })?;
        let kind = KeyKind::of(field.ty);
        let files = IndexFiles::new(shared.path(), field.name);

        shared.with_inner(|inner| {
            if inner.has_index(field.name) {
                return Err(DumpError::InvalidArgument(format!(
                    "an index on `{}` is already attached",
                    field.name
                )));
            }
            let state = Self::load_or_rebuild(inner, field, kind, &files, &options)?;
            let core = Arc::new(Self {
                dump: Arc::downgrade(shared),
                field,
                kind,
                files,
                state: Mutex::new(Some(state)),
                closed: AtomicBool::new(false),
                checkpointed: AtomicBool::new(false),
            });
            inner.attach(Arc::clone(&core) as Arc<dyn IndexListener<B>>);
            Ok(core)
        })
    }

    fn load_or_rebuild(
        inner: &mut DumpInner<B>,
        field: &'static FieldDef,
        kind: KeyKind,
        files: &IndexFiles,
        options: &S::Options,
    ) -> Result<S, DumpError> {
        let sequence = inner.sequence();
        let type_name = B::bean_schema().type_name();

        let fresh = files
            .read_meta()?
            .is_some_and(|m| m.matches(sequence, type_name, S::KIND));
        if fresh {
            let is_deleted = |pos: u64| inner.is_deleted(pos);
            let ctx = BackendContext {
                files,
                field: field.name,
                kind,
                is_deleted: &is_deleted,
            };
            match S::load(&ctx, options) {
                Ok(state) => {
                    files.remove_meta()?;
                    debug!(field = field.name, kind = S::KIND, sequence, "index loaded");
                    return Ok(state);
                }
                Err(e) => warn!(field = field.name, error = %e, "index load failed, rebuilding"),
            }
        }

        info!(field = field.name, kind = S::KIND, sequence, "rebuilding index");
        files.remove_all()?;
        let mut state = {
            let no_tombstones = |_: u64| false;
            let ctx = BackendContext {
                files,
                field: field.name,
                kind,
                is_deleted: &no_tombstones,
            };
            S::create(&ctx, options)?
        };

        let mut indexed: u64 = 0;
        inner.for_each_live(|pos, bean| {
            if let Some(key) = key_for(field, &bean.field(field.index))? {
                state.rebuild_add(&key, pos)?;
                indexed += 1;
            }
            Ok(())
        })?;
        state.rebuild_finish()?;
        info!(field = field.name, kind = S::KIND, entries = indexed, "index rebuilt");
        Ok(state)
    }

    // --------------------------------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------------------------------

    pub(crate) fn field(&self) -> &'static FieldDef {
        self.field
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A handle on the store, or `Closed` if it is gone.
    pub(crate) fn dump(&self) -> Result<Dump<B>, DumpError> {
        self.dump
            .upgrade()
            .map(Dump::from_shared)
            .ok_or(DumpError::Closed)
    }

    /// Records `pos` as this thread's last accessed position in the store.
    pub(crate) fn note_access(&self, pos: u64) {
        if let Some(shared) = self.dump.upgrade() {
            Dump::from_shared(shared).set_last_position(pos);
        }
    }

    /// The key `value` would have in this index, `None` for null.
    pub(crate) fn key_for(&self, value: &Value) -> Result<Option<IndexKey>, DumpError> {
        key_for(self.field, value)
    }

    /// Rejects a caller-supplied key of the wrong shape.
    pub(crate) fn check_key(&self, key: &IndexKey) -> Result<(), DumpError> {
        self.kind.check(self.field.name, key)
    }

    fn key_of(&self, bean: &B) -> Result<Option<IndexKey>, DumpError> {
        key_for(self.field, &bean.field(self.field.index))
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, Option<S>>, DumpError> {
        self.state
            .lock()
            .map_err(|_| DumpError::poisoned("index state"))
    }

    /// Runs `f` on the backend. The caller already holds the store lock.
    pub(crate) fn with_state<T>(
        &self,
        f: impl FnOnce(&mut S) -> Result<T, DumpError>,
    ) -> Result<T, DumpError> {
        let mut guard = self.lock_state()?;
        let state = guard.as_mut().ok_or(DumpError::Closed)?;
        f(state)
    }

    /// Runs `f` on the backend without the store lock.
    pub(crate) fn with_index<T>(
        &self,
        f: impl FnOnce(&mut S) -> Result<T, DumpError>,
    ) -> Result<T, DumpError> {
        if self.is_closed() {
            return Err(DumpError::Closed);
        }
        self.with_state(f)
    }

    pub(crate) fn contains(&self, key: &IndexKey) -> Result<bool, DumpError> {
        self.check_key(key)?;
        self.with_index(|s| s.contains(key))
    }

    /// Reads `positions` through a [`BulkReader`](crate::BulkReader).
    pub(crate) fn bulk_read(
        &self,
        positions: Vec<u64>,
        threads: usize,
    ) -> Result<BulkIter<B>, DumpError> {
        BulkReader::new(self.dump()?, threads).read(positions)
    }

    /// Takes the store lock, then the index lock, and runs `f`.
    pub(crate) fn with_store<T>(
        &self,
        f: impl FnOnce(&mut DumpInner<B>, &mut S) -> Result<T, DumpError>,
    ) -> Result<T, DumpError> {
        if self.is_closed() {
            return Err(DumpError::Closed);
        }
        let shared = self.dump.upgrade().ok_or(DumpError::Closed)?;
        shared.check_open()?;
        shared.with_inner(|inner| self.with_state(|state| f(inner, state)))
    }

    /// Drops the on-disk checkpoint before the first change after it.
    pub(crate) fn touch(&self) -> Result<(), DumpError> {
        if self.checkpointed.swap(false, Ordering::AcqRel) {
            self.files.remove_meta()?;
        }
        Ok(())
    }

    fn write_meta(&self, sequence: u64) -> Result<(), DumpError> {
        self.files.write_meta(&IndexMeta {
            sequence,
            type_name: B::bean_schema().type_name().to_string(),
            kind: S::KIND.to_string(),
        })
    }

    /// Flushes the backend, writes the meta file and closes the backend.
    fn finish(&self, sequence: u64) -> Result<(), DumpError> {
        let state = self.lock_state()?.take();
        let Some(mut state) = state else {
            return Ok(());
        };
        state.flush()?;
        self.write_meta(sequence)?;
        state.close()?;
        debug!(field = self.field.name, kind = S::KIND, sequence, "index closed");
        Ok(())
    }

    /// Detaches from the store and persists the index.
    pub(crate) fn close(&self) -> Result<(), DumpError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let sequence = match self.dump.upgrade() {
            Some(shared) => shared.with_inner(|inner| {
                inner.detach(self.field.name);
                Ok(inner.sequence())
            }),
            None => Err(DumpError::Closed),
        };
        match sequence {
            Ok(sequence) => self.finish(sequence),
            Err(DumpError::Closed) => {
                // The store closed without us: nothing is trusted on disk.
                let state = self.lock_state()?.take();
                if let Some(state) = state {
                    state.close()?;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl<B: BeanType, S: Backend> IndexListener<B> for IndexCore<B, S> {
    fn field_name(&self) -> &'static str {
        self.field.name
    }

    fn check_add(&self, bean: &B) -> Result<(), DumpError> {
        match self.key_of(bean)? {
            Some(key) => self.with_state(|s| s.check_add(self.field.name, &key)),
            None => Ok(()),
        }
    }

    fn check_update(&self, pos: u64, old: &B, new: &B, in_place: bool) -> Result<(), DumpError> {
        let old = self.key_of(old)?;
        let new = self.key_of(new)?;
        self.with_state(|s| s.check_update(self.field.name, pos, old.as_ref(), new.as_ref(), in_place))
    }

    fn add(&self, bean: &B, pos: u64) -> Result<(), DumpError> {
        let Some(key) = self.key_of(bean)? else {
            return Ok(());
        };
        self.touch()?;
        self.with_state(|s| s.add(&key, pos))
    }

    fn delete(&self, bean: &B, pos: u64) -> Result<(), DumpError> {
        let Some(key) = self.key_of(bean)? else {
            return Ok(());
        };
        self.touch()?;
        self.with_state(|s| s.delete(&key, pos))
    }

    fn update(&self, pos: u64, old: &B, new: &B) -> Result<(), DumpError> {
        let old = self.key_of(old)?;
        let new = self.key_of(new)?;
        if old == new {
            return Ok(());
        }
        self.touch()?;
        self.with_state(|s| s.update(pos, old.as_ref(), new.as_ref()))
    }

    fn is_update_in_place_compatible(&self, old: &B, new: &B) -> bool {
        let (Ok(old), Ok(new)) = (self.key_of(old), self.key_of(new)) else {
            return false;
        };
        self.with_state(|s| Ok(s.is_update_in_place_compatible(old.as_ref(), new.as_ref())))
            .unwrap_or(false)
    }

    fn flush(&self, sequence: u64) -> Result<(), DumpError> {
        self.with_state(|s| s.flush())?;
        self.write_meta(sequence)?;
        self.checkpointed.store(true, Ordering::Release);
        Ok(())
    }

    fn close_with_dump(&self, sequence: u64) -> Result<(), DumpError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.finish(sequence)
    }
}
