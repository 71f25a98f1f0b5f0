//! Contiguous runs of equal keys.
//!
//! A grouped index only remembers where each key's run starts and ends;
//! lookups walk the data file across the run. Callers must add records
//! with equal keys consecutively: a key seen again after another key was
//! added is rejected with [`DumpError::NonConsecutiveKey`].

use std::sync::Arc;

use tracing::trace;

use super::DumpIndex;
use super::base::{Backend, BackendContext, IndexCore};
use super::files::{LookupWriter, UpdatedLog, read_updated, replay_lookup};
use super::key::{IndexKey, KeyMap, key_for};
use super::unique::skip_once;
use crate::codec::{BeanType, FieldDef, Value};
use crate::dump::{BulkIter, Dump, DumpInner};
use crate::error::DumpError;

// ------------------------------------------------------------------------------------------------
// Runs
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    first: u64,
    last: u64,
    /// Live records inside `first..=last`.
    live: u64,
}

/// Live records of `key` inside `run`, in file order.
fn walk_run<B: BeanType>(
    inner: &mut DumpInner<B>,
    field: &FieldDef,
    key: &IndexKey,
    run: Run,
) -> Result<Vec<(u64, B)>, DumpError> {
    let mut out = Vec::with_capacity(run.live as usize);
    let mut pos = run.first;
    while pos <= run.last {
        let entry = inner.read_raw(pos)?;
        if !inner.is_deleted(pos) {
            let bean = inner.decode(pos, &entry.bytes)?;
            // Records with a null key may sit inside a run.
            if key_for(field, &bean.field(field.index))?.as_ref() == Some(key) {
                out.push((pos, bean));
            }
        }
        pos = entry.next_position;
    }
    Ok(out)
}

// ------------------------------------------------------------------------------------------------
// Backend
// ------------------------------------------------------------------------------------------------

pub(crate) struct GroupedState {
    runs: KeyMap<Run>,
    /// Key of the most recently added record; only its run may grow.
    last_key: Option<IndexKey>,
    lookup: LookupWriter,
    updated: UpdatedLog,
}

impl GroupedState {
    fn open_files(
        ctx: &BackendContext<'_>,
        runs: KeyMap<Run>,
        last_key: Option<IndexKey>,
        truncate: bool,
    ) -> Result<Self, DumpError> {
        Ok(Self {
            runs,
            last_key,
            lookup: LookupWriter::open(ctx.files.lookup(), ctx.kind, truncate)?,
            updated: UpdatedLog::open(ctx.files.updated(), truncate)?,
        })
    }

    fn non_consecutive(field: &str, key: &IndexKey) -> DumpError {
        DumpError::NonConsecutiveKey {
            field: field.to_string(),
            key: key.to_string(),
        }
    }

    fn run(&self, key: &IndexKey) -> Option<Run> {
        self.runs.get(key).copied()
    }

    fn sorted_runs(&self) -> Vec<(IndexKey, Run)> {
        let mut runs: Vec<(IndexKey, Run)> =
            self.runs.entries().into_iter().map(|(k, r)| (k, *r)).collect();
        runs.sort_by_key(|(_, r)| r.first);
        runs
    }

    fn extend(runs: &mut KeyMap<Run>, key: &IndexKey, pos: u64) {
        let Some(run) = runs.get_or_insert_with(key, || Run {
            first: pos,
            last: pos,
            live: 0,
        }) else {
            return;
        };
        run.first = run.first.min(pos);
        run.last = run.last.max(pos);
        run.live += 1;
    }
}

impl Backend for GroupedState {
    const KIND: &'static str = "grouped";

    type Options = ();

    fn load(ctx: &BackendContext<'_>, _: &()) -> Result<Self, DumpError> {
        let mut skips = read_updated(&ctx.files.updated())?;
        let mut runs = KeyMap::new(ctx.kind);
        replay_lookup(&ctx.files.lookup(), ctx.kind, |key, pos| {
            if !skip_once(&mut skips, pos) && !(ctx.is_deleted)(pos) {
                Self::extend(&mut runs, &key, pos);
            }
            Ok(())
        })?;
        let last_key = runs
            .entries()
            .into_iter()
            .max_by_key(|(_, r)| r.last)
            .map(|(k, _)| k);
        Self::open_files(ctx, runs, last_key, false)
    }

    fn create(ctx: &BackendContext<'_>, _: &()) -> Result<Self, DumpError> {
        Self::open_files(ctx, KeyMap::new(ctx.kind), None, true)
    }

    fn check_add(&self, field: &str, key: &IndexKey) -> Result<(), DumpError> {
        if self.runs.get(key).is_some() && self.last_key.as_ref() != Some(key) {
            return Err(Self::non_consecutive(field, key));
        }
        Ok(())
    }

    fn check_update(
        &self,
        field: &str,
        _pos: u64,
        old: Option<&IndexKey>,
        new: Option<&IndexKey>,
        in_place: bool,
    ) -> Result<(), DumpError> {
        let Some(new) = new else { return Ok(()) };
        if in_place {
            return Ok(());
        }
        // A relocated record that is the last live one of its run starts a
        // fresh run. `first` may still point at a deleted record.
        let sole = old == Some(new) && self.run(new).is_some_and(|r| r.live == 1);
        if sole {
            return Ok(());
        }
        self.check_add(field, new)
    }

    fn add(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError> {
        Self::extend(&mut self.runs, key, pos);
        self.last_key = Some(key.clone());
        self.lookup.append(key, pos)
    }

    fn delete(&mut self, key: &IndexKey, _pos: u64) -> Result<(), DumpError> {
        let Some(run) = self.runs.get_mut(key) else {
            return Ok(());
        };
        run.live = run.live.saturating_sub(1);
        if run.live == 0 {
            self.runs.remove(key);
            trace!(key = %key, "grouped run emptied");
        }
        Ok(())
    }

    fn update(
        &mut self,
        pos: u64,
        old: Option<&IndexKey>,
        new: Option<&IndexKey>,
    ) -> Result<(), DumpError> {
        if let Some(old) = old {
            self.delete(old, pos)?;
            self.updated.append(pos)?;
        }
        if let Some(new) = new {
            self.add(new, pos)?;
        }
        Ok(())
    }

    /// Only key-preserving updates may stay in place.
    fn is_update_in_place_compatible(&self, old: Option<&IndexKey>, new: Option<&IndexKey>) -> bool {
        old == new
    }

    fn contains(&mut self, key: &IndexKey) -> Result<bool, DumpError> {
        Ok(self.runs.get(key).is_some())
    }

    fn flush(&mut self) -> Result<(), DumpError> {
        self.lookup.flush()?;
        self.updated.flush()
    }

    fn close(mut self) -> Result<(), DumpError> {
        self.flush()
    }
}

// ------------------------------------------------------------------------------------------------
// GroupedIndex
// ------------------------------------------------------------------------------------------------

/// A non-unique index for data written in key order.
///
/// Memory holds one run per key instead of every position, which suits
/// stores filled by a sorted import.
pub struct GroupedIndex<B: BeanType> {
    core: Arc<IndexCore<B, GroupedState>>,
}

impl<B: BeanType> std::fmt::Debug for GroupedIndex<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedIndex")
            .field("field", &self.core.field().name)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}

impl<B: BeanType> GroupedIndex<B> {
    /// Attaches a grouped index on `field` to `dump`.
    pub fn open(dump: &Dump<B>, field: &str) -> Result<Self, DumpError> {
        Ok(Self {
            core: IndexCore::open(dump, field, ())?,
        })
    }

    fn find(&self, key: &IndexKey) -> Result<Vec<(u64, B)>, DumpError> {
        self.core.check_key(key)?;
        let field = self.core.field();
        self.core.with_store(|inner, s| match s.run(key) {
            Some(run) => walk_run(inner, field, key, run),
            None => Ok(Vec::new()),
        })
    }

    /// Live records with `key`, in position order.
    pub fn lookup(&self, key: &IndexKey) -> Result<Vec<B>, DumpError> {
        let found = self.find(key)?;
        if let Some((pos, _)) = found.last() {
            self.core.note_access(*pos);
        }
        Ok(found.into_iter().map(|(_, bean)| bean).collect())
    }

    pub fn lookup_int(&self, key: i32) -> Result<Vec<B>, DumpError> {
        self.lookup(&IndexKey::Int(key))
    }

    pub fn lookup_long(&self, key: i64) -> Result<Vec<B>, DumpError> {
        self.lookup(&IndexKey::Long(key))
    }

    pub fn lookup_str(&self, key: &str) -> Result<Vec<B>, DumpError> {
        self.lookup(&IndexKey::Str(key.to_string()))
    }

    /// Ascending positions of the live records with `key`.
    pub fn positions(&self, key: &IndexKey) -> Result<Vec<u64>, DumpError> {
        Ok(self.find(key)?.into_iter().map(|(pos, _)| pos).collect())
    }

    /// Every key with a live run, in run order.
    pub fn keys(&self) -> Result<Vec<IndexKey>, DumpError> {
        self.core
            .with_index(|s| Ok(s.sorted_runs().into_iter().map(|(k, _)| k).collect()))
    }

    /// The key a field value maps to, `None` for null.
    pub fn key_for(&self, value: &Value) -> Result<Option<IndexKey>, DumpError> {
        self.core.key_for(value)
    }
}

impl<B: BeanType> DumpIndex<B> for GroupedIndex<B> {
    fn field_name(&self) -> &'static str {
        self.core.field().name
    }

    fn contains(&self, key: &IndexKey) -> Result<bool, DumpError> {
        self.core.contains(key)
    }

    fn all_positions(&self) -> Result<Vec<u64>, DumpError> {
        let field = self.core.field();
        let mut all = self.core.with_store(|inner, s| {
            let mut all = Vec::new();
            for (key, run) in s.sorted_runs() {
                all.extend(walk_run(inner, field, &key, run)?.into_iter().map(|(p, _)| p));
            }
            Ok(all)
        })?;
        all.sort_unstable();
        Ok(all)
    }

    fn bulk_iter(&self, threads: usize) -> Result<BulkIter<B>, DumpError> {
        let positions = self.all_positions()?;
        self.core.bulk_read(positions, threads)
    }

    fn close(&self) -> Result<(), DumpError> {
        self.core.close()
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}
