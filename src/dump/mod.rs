//! The record store.
//!
//! A [`Dump`] is a single data file of concatenated codec-encoded records
//! addressed by byte position, plus three sidecar files:
//!
//! - `P.deletions`: append-only tombstone log (8-byte big-endian positions),
//! - `P.meta`: the 8-byte sequence counter and advisory lock target,
//! - per attached index, the index's own lookup/meta/updates files.
//!
//! Records are never moved except by a prune at open time. Deletion only
//! records a tombstone; the bytes stay in place until the next prune.
//!
//! ## Concurrency
//!
//! A `Dump` is a cheap handle around shared state. Every operation,
//! reads included, runs under one mutex per store, and attached indexes
//! are notified inside that critical section. The position of the last
//! record a thread read or wrote is kept per thread and per store, for
//! [`Dump::delete_last`] and [`Dump::update_last`].

mod bulk;
mod cache;
mod config;
mod deletions;
mod inner;
mod iter;
mod lock;
mod meta;
mod multithreaded;
mod prune;

#[cfg(test)]
pub(crate) mod tests;

pub use bulk::{BulkIter, BulkReader};
pub use config::{DumpAccess, DumpConfig};
pub use iter::DumpIter;
pub use multithreaded::MultithreadedDump;

pub(crate) use inner::DumpInner;

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{error, info, warn};

use crate::codec::BeanType;
use crate::error::{DumpError, IoContext};
use crate::shutdown::{self, Closeable};
use deletions::Deletions;
use inner::InnerParts;
use lock::OpenRegistration;
use meta::StoreMeta;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Last position read or written by this thread, per store id.
    static LAST_POSITIONS: RefCell<HashMap<u64, u64>> = RefCell::new(HashMap::new());
}

/// `<path>.<suffix>`, the naming scheme of every sidecar file.
pub(crate) fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

// ------------------------------------------------------------------------------------------------
// Shared state
// ------------------------------------------------------------------------------------------------

pub(crate) struct DumpShared<B: BeanType> {
    id: u64,
    path: PathBuf,
    config: DumpConfig,
    /// `None` once closed.
    state: Mutex<Option<DumpInner<B>>>,
    closed: AtomicBool,
}

impl<B: BeanType> DumpShared<B> {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn access(&self) -> DumpAccess {
        self.config.access
    }

    pub(crate) fn check_open(&self) -> Result<(), DumpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DumpError::Closed);
        }
        Ok(())
    }

    pub(crate) fn require(&self, flag: DumpAccess, what: &'static str) -> Result<(), DumpError> {
        if self.config.access.contains(flag) {
            Ok(())
        } else {
            Err(DumpError::AccessDenied(what))
        }
    }

    /// Runs `f` with the store lock held.
    pub(crate) fn with_inner<T>(
        &self,
        f: impl FnOnce(&mut DumpInner<B>) -> Result<T, DumpError>,
    ) -> Result<T, DumpError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| DumpError::poisoned("dump state"))?;
        let inner = guard.as_mut().ok_or(DumpError::Closed)?;
        f(inner)
    }

    fn close(&self) -> Result<(), DumpError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        shutdown::unregister(self.id);

        let inner = self
            .state
            .lock()
            .map_err(|_| DumpError::poisoned("dump state"))?
            .take();
        if let Some(inner) = inner {
            inner.close()?;
        }
        // Gone already when closing from the exit hook.
        let _ = LAST_POSITIONS.try_with(|m| m.borrow_mut().remove(&self.id));

        info!(path = %self.path.display(), "dump closed");
        Ok(())
    }
}

impl<B: BeanType> Closeable for DumpShared<B> {
    fn close_for_shutdown(&self) -> Result<(), DumpError> {
        warn!(path = %self.path.display(), "dump still open at exit, closing");
        self.close()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

impl<B: BeanType> Drop for DumpShared<B> {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            error!(path = %self.path.display(), "dump dropped without close");
            if let Err(e) = self.close() {
                error!(path = %self.path.display(), error = %e, "best-effort close failed");
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Dump
// ------------------------------------------------------------------------------------------------

/// An append-mostly store of records of type `B`.
///
/// # Example
///
/// ```rust,no_run
/// # use beandump::{Dump, DumpConfig, BeanType};
/// # fn demo<B: BeanType>(record: B) -> Result<(), beandump::DumpError> {
/// let dump: Dump<B> = Dump::open("/tmp/records", DumpConfig::default())?;
/// let pos = dump.add(&record)?;
/// assert!(dump.get(pos)?.is_some());
/// dump.delete(pos)?;
/// assert!(dump.get(pos)?.is_none());
/// dump.close()?;
/// # Ok(())
/// # }
/// ```
///
/// # Shutdown
///
/// Call [`Dump::close`] when done. A store dropped without closing logs
/// an error and closes itself on a best-effort basis. Unless
/// `will_be_closed_during_shutdown` is set, open stores are also closed by
/// a process-exit hook.
pub struct Dump<B: BeanType> {
    shared: Arc<DumpShared<B>>,
}

impl<B: BeanType> Clone for Dump<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: BeanType> std::fmt::Debug for Dump<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dump")
            .field("path", &self.shared.path)
            .field("access", &self.shared.config.access)
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<B: BeanType> Dump<B> {
    /// Opens the store at `path`, creating the data file if absent.
    ///
    /// Replays the deletions log and prunes the data file first when the
    /// tombstone count exceeds `prune_threshold`. A prune cut short by a
    /// crash is finished here. Unless opened
    /// [`DumpAccess::SHARED`] or read-only, takes an exclusive advisory lock
    /// on `P.meta`, blocking while another process holds it.
    ///
    /// # Errors
    ///
    /// - [`DumpError::InvalidConfig`] for out-of-range configuration.
    /// - [`DumpError::AlreadyOpen`] if this process already has `path` open.
    /// - [`DumpError::Corruption`] if the deletions log or meta file is
    ///   invalid, or a read-only open finds an interrupted prune.
    pub fn open(path: impl AsRef<Path>, config: DumpConfig) -> Result<Self, DumpError> {
        config.validate()?;

        let path = path.as_ref().to_path_buf();
        let writable = config.access.is_writable();
        let shared_mode = config.access.contains(DumpAccess::SHARED);

        if writable {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .io_context(&path, "create")?;
        }

        let registration = if shared_mode {
            None
        } else {
            Some(OpenRegistration::register(&path)?)
        };

        let mut meta = StoreMeta::open(
            sidecar_path(&path, "meta"),
            writable,
            writable && !shared_mode,
        )?;
        let mut data_len = fs::metadata(&path).io_context(&path, "stat")?.len();
        let mut deletions = Deletions::open(
            sidecar_path(&path, "deletions"),
            data_len,
            writable,
            config.sync_deletions,
        )?;

        let index_fields: Vec<&str> = B::bean_schema().fields().iter().map(|f| f.name).collect();
        if writable {
            let pruned = match prune::resume(&path, &mut deletions, &index_fields)? {
                Some(len) => Some(len),
                None if deletions.len() > config.prune_threshold => Some(prune::prune(
                    &path,
                    data_len,
                    &mut deletions,
                    config.read_buffer_size,
                    &index_fields,
                )?),
                None => None,
            };
            if let Some(len) = pruned {
                data_len = len;
                meta.reset();
                meta.flush()?;
            }
        } else if prune::pending(&path) {
            return Err(DumpError::corruption(
                &path,
                "interrupted prune; open the store writable to finish it",
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)
            .io_context(&path, "open")?;
        let writer = if writable {
            let mut append = file.try_clone().io_context(&path, "clone handle")?;
            append.seek(SeekFrom::End(0)).io_context(&path, "seek")?;
            Some(BufWriter::with_capacity(config.write_buffer_size, append))
        } else {
            None
        };

        let sequence = meta.sequence();
        let tombstones = deletions.len();
        let inner = DumpInner::new(InnerParts {
            path: path.clone(),
            file,
            writer,
            data_len,
            read_buffer_size: config.read_buffer_size,
            cache_size: config.cache_size,
            deletions,
            meta,
            registration,
        });

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let register_exit = !config.will_be_closed_during_shutdown;
        let shared = Arc::new(DumpShared {
            id,
            path,
            config,
            state: Mutex::new(Some(inner)),
            closed: AtomicBool::new(false),
        });
        if register_exit {
            let weak: Weak<dyn Closeable> = Arc::downgrade(&shared) as Weak<dyn Closeable>;
            shutdown::register(id, weak);
        }

        info!(
            path = %shared.path.display(),
            len = data_len,
            tombstones,
            sequence,
            access = ?shared.config.access,
            "dump opened"
        );
        Ok(Self { shared })
    }

    pub(crate) fn shared(&self) -> &Arc<DumpShared<B>> {
        &self.shared
    }

    pub(crate) fn from_shared(shared: Arc<DumpShared<B>>) -> Self {
        Self { shared }
    }

    // --------------------------------------------------------------------------------------------
    // Write operations
    // --------------------------------------------------------------------------------------------

    /// Appends `bean` and returns its position.
    ///
    /// Every attached index checks the record first: a duplicate key in a
    /// [`UniqueIndex`](crate::UniqueIndex) rejects the add before any byte
    /// is written.
    pub fn add(&self, bean: &B) -> Result<u64, DumpError> {
        self.shared.check_open()?;
        self.shared.require(DumpAccess::ADD, "add requires ADD")?;
        let pos = self.shared.with_inner(|inner| inner.add(bean))?;
        self.set_last_position(pos);
        Ok(pos)
    }

    /// Appends a record encoded by the caller.
    pub(crate) fn add_encoded(&self, bean: &B, bytes: &[u8]) -> Result<u64, DumpError> {
        self.shared.check_open()?;
        self.shared.require(DumpAccess::ADD, "add requires ADD")?;
        let pos = self.shared.with_inner(|inner| inner.add_encoded(bean, bytes))?;
        self.set_last_position(pos);
        Ok(pos)
    }

    /// Tombstones the record at `pos` and returns it.
    ///
    /// # Errors
    ///
    /// [`DumpError::NoSuchRecord`] if `pos` is already deleted.
    pub fn delete(&self, pos: u64) -> Result<B, DumpError> {
        self.shared.check_open()?;
        self.shared.require(DumpAccess::DELETE, "delete requires DELETE")?;
        self.shared.with_inner(|inner| inner.delete(pos))
    }

    /// Replaces the record at `pos` with `new` and returns the old record.
    ///
    /// The record is overwritten in place when [`DumpAccess::UPDATE_IN_PLACE`]
    /// is granted, the encoded length is unchanged and every attached index
    /// accepts the key transition. Otherwise it is tombstoned and
    /// re-appended, which needs [`DumpAccess::UPDATE_OUT_OF_PLACE`]; use
    /// [`Dump::get_last_position`] afterwards to learn the new position.
    pub fn update(&self, pos: u64, new: &B) -> Result<B, DumpError> {
        self.shared.check_open()?;
        let access = self.shared.access();
        let in_place = access.contains(DumpAccess::UPDATE_IN_PLACE);
        let out_of_place = access.contains(DumpAccess::UPDATE_OUT_OF_PLACE);
        if !in_place && !out_of_place {
            return Err(DumpError::AccessDenied(
                "update requires UPDATE_IN_PLACE or UPDATE_OUT_OF_PLACE",
            ));
        }
        let (old, new_pos) = self
            .shared
            .with_inner(|inner| inner.update(pos, new, in_place, out_of_place))?;
        self.set_last_position(new_pos);
        Ok(old)
    }

    /// Deletes the record this thread last read or wrote.
    pub fn delete_last(&self) -> Result<B, DumpError> {
        let pos = self.last_position_or_err()?;
        self.delete(pos)
    }

    /// Updates the record this thread last read or wrote.
    pub fn update_last(&self, new: &B) -> Result<B, DumpError> {
        let pos = self.last_position_or_err()?;
        self.update(pos, new)
    }

    // --------------------------------------------------------------------------------------------
    // Read operations
    // --------------------------------------------------------------------------------------------

    /// Returns a fresh copy of the record at `pos`, or `None` if deleted.
    ///
    /// # Errors
    ///
    /// [`DumpError::NoSuchRecord`] if `pos` is past the end of the data file.
    pub fn get(&self, pos: u64) -> Result<Option<B>, DumpError> {
        self.shared.check_open()?;
        self.shared.require(DumpAccess::READ, "get requires READ")?;
        let bean = self.shared.with_inner(|inner| inner.get(pos))?;
        self.set_last_position(pos);
        Ok(bean)
    }

    /// Lazy forward iteration over every live record with its position.
    pub fn iter(&self) -> Result<DumpIter<B>, DumpError> {
        self.shared.check_open()?;
        self.shared.require(DumpAccess::READ, "iteration requires READ")?;
        Ok(DumpIter::new(self.clone()))
    }

    /// `true` if `pos` lies inside the data file and is not tombstoned.
    ///
    /// Does not check that `pos` is a record boundary.
    pub fn contains(&self, pos: u64) -> Result<bool, DumpError> {
        self.shared.check_open()?;
        self.shared
            .with_inner(|inner| Ok(pos < inner.data_len() && !inner.is_deleted(pos)))
    }

    /// Every live position, ascending.
    pub fn positions(&self) -> Result<Vec<u64>, DumpError> {
        self.shared.check_open()?;
        self.shared.require(DumpAccess::READ, "positions requires READ")?;
        self.shared.with_inner(|inner| inner.live_positions())
    }

    pub fn deleted_count(&self) -> Result<usize, DumpError> {
        self.shared.with_inner(|inner| Ok(inner.deleted_count()))
    }

    /// Current value of the mutation counter.
    pub fn sequence(&self) -> Result<u64, DumpError> {
        self.shared.with_inner(|inner| Ok(inner.sequence()))
    }

    /// Length of the data file, buffered appends included.
    pub fn data_len(&self) -> Result<u64, DumpError> {
        self.shared.with_inner(|inner| Ok(inner.data_len()))
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn access(&self) -> DumpAccess {
        self.shared.access()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Position of the record this thread last read or wrote in this store.
    pub fn get_last_position(&self) -> Option<u64> {
        LAST_POSITIONS.with(|m| m.borrow().get(&self.shared.id).copied())
    }

    pub(crate) fn set_last_position(&self, pos: u64) {
        LAST_POSITIONS.with(|m| {
            m.borrow_mut().insert(self.shared.id, pos);
        });
    }

    fn last_position_or_err(&self) -> Result<u64, DumpError> {
        self.get_last_position().ok_or_else(|| {
            DumpError::InvalidArgument("no record accessed by this thread yet".into())
        })
    }

    // --------------------------------------------------------------------------------------------
    // Durability and shutdown
    // --------------------------------------------------------------------------------------------

    /// Forces buffered appends and the deletions log to disk.
    pub fn flush(&self) -> Result<(), DumpError> {
        self.shared.check_open()?;
        self.shared.with_inner(|inner| inner.flush())
    }

    /// Like [`Dump::flush`], and also persists the sequence and every
    /// attached index's checkpoint.
    pub fn flush_meta(&self) -> Result<(), DumpError> {
        self.shared.check_open()?;
        self.shared.with_inner(|inner| inner.flush_meta())
    }

    /// Flushes everything, closes every attached index and releases the
    /// lock. Calling `close` more than once is harmless.
    pub fn close(&self) -> Result<(), DumpError> {
        self.shared.close()
    }

    /// Drops the store's files the way a killed process would: no final
    /// sequence write, no index checkpoint.
    #[cfg(test)]
    pub(crate) fn simulate_crash(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        shutdown::unregister(self.shared.id);
        let inner = match self.shared.state.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(inner) = inner {
            inner.abandon();
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_count(&self) -> usize {
        self.shared
            .with_inner(|inner| Ok(inner.cached_count()))
            .unwrap_or(0)
    }
}
