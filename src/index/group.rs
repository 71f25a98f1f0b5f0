//! Many positions per key, held as sorted arrays.

use std::sync::Arc;

use super::DumpIndex;
use super::base::{Backend, BackendContext, IndexCore};
use super::files::{LookupWriter, UpdatedLog, read_updated, replay_lookup};
use super::key::{IndexKey, KeyMap};
use super::unique::skip_once;
use crate::codec::{BeanType, Value};
use crate::dump::{BulkIter, Dump};
use crate::error::DumpError;

// ------------------------------------------------------------------------------------------------
// Backend
// ------------------------------------------------------------------------------------------------

/// Key → strictly ascending positions.
pub(crate) struct GroupState {
    map: KeyMap<Vec<u64>>,
    entries: usize,
    lookup: LookupWriter,
    updated: UpdatedLog,
}

impl GroupState {
    fn open_files(
        ctx: &BackendContext<'_>,
        map: KeyMap<Vec<u64>>,
        entries: usize,
        truncate: bool,
    ) -> Result<Self, DumpError> {
        Ok(Self {
            map,
            entries,
            lookup: LookupWriter::open(ctx.files.lookup(), ctx.kind, truncate)?,
            updated: UpdatedLog::open(ctx.files.updated(), truncate)?,
        })
    }

    /// Inserts into memory only. Returns `false` if already present.
    fn insert(map: &mut KeyMap<Vec<u64>>, key: &IndexKey, pos: u64) -> bool {
        let Some(positions) = map.get_or_insert_with(key, Vec::new) else {
            return false;
        };
        match positions.binary_search(&pos) {
            Ok(_) => false,
            Err(at) => {
                positions.insert(at, pos);
                true
            }
        }
    }

    /// Removes from memory only. Returns `false` if absent.
    fn remove(&mut self, key: &IndexKey, pos: u64) -> bool {
        let Some(positions) = self.map.get_mut(key) else {
            return false;
        };
        let Ok(at) = positions.binary_search(&pos) else {
            return false;
        };
        positions.remove(at);
        if positions.is_empty() {
            self.map.remove(key);
        }
        self.entries -= 1;
        true
    }

    pub(crate) fn positions(&self, key: &IndexKey) -> Vec<u64> {
        self.map.get(key).cloned().unwrap_or_default()
    }

    pub(crate) fn has(&self, key: &IndexKey, pos: u64) -> bool {
        self.map
            .get(key)
            .is_some_and(|p| p.binary_search(&pos).is_ok())
    }

    pub(crate) fn keys(&self) -> Vec<IndexKey> {
        let mut keys: Vec<IndexKey> = self.map.entries().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        keys
    }

    /// Every `(key, position)` pair, sorted by key then position.
    pub(crate) fn sorted_entries(&self) -> Vec<(IndexKey, u64)> {
        let mut entries: Vec<(IndexKey, u64)> = self
            .map
            .entries()
            .into_iter()
            .flat_map(|(k, positions)| positions.iter().map(move |&p| (k.clone(), p)))
            .collect();
        entries.sort();
        entries
    }

    pub(crate) fn all_positions(&self) -> Vec<u64> {
        let mut all: Vec<u64> = self.map.values().flatten().copied().collect();
        all.sort_unstable();
        all
    }

    /// Number of `(key, position)` pairs.
    pub(crate) fn len(&self) -> usize {
        self.entries
    }

    pub(crate) fn key_count(&self) -> usize {
        self.map.len()
    }

    /// Drops every entry, in memory and on disk.
    pub(crate) fn clear(&mut self) -> Result<(), DumpError> {
        self.map.clear();
        self.entries = 0;
        self.lookup.truncate()?;
        self.updated.truncate()
    }
}

impl Backend for GroupState {
    const KIND: &'static str = "group";

    type Options = ();

    fn load(ctx: &BackendContext<'_>, _: &()) -> Result<Self, DumpError> {
        let mut skips = read_updated(&ctx.files.updated())?;
        let mut map = KeyMap::new(ctx.kind);
        let mut entries = 0;
        replay_lookup(&ctx.files.lookup(), ctx.kind, |key, pos| {
            if !skip_once(&mut skips, pos) && !(ctx.is_deleted)(pos) && Self::insert(&mut map, &key, pos)
            {
                entries += 1;
            }
            Ok(())
        })?;
        Self::open_files(ctx, map, entries, false)
    }

    fn create(ctx: &BackendContext<'_>, _: &()) -> Result<Self, DumpError> {
        Self::open_files(ctx, KeyMap::new(ctx.kind), 0, true)
    }

    fn check_add(&self, _: &str, _: &IndexKey) -> Result<(), DumpError> {
        Ok(())
    }

    fn check_update(
        &self,
        _: &str,
        _: u64,
        _: Option<&IndexKey>,
        _: Option<&IndexKey>,
        _: bool,
    ) -> Result<(), DumpError> {
        Ok(())
    }

    fn add(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError> {
        if Self::insert(&mut self.map, key, pos) {
            self.entries += 1;
        }
        self.lookup.append(key, pos)
    }

    fn delete(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError> {
        self.remove(key, pos);
        Ok(())
    }

    fn update(
        &mut self,
        pos: u64,
        old: Option<&IndexKey>,
        new: Option<&IndexKey>,
    ) -> Result<(), DumpError> {
        if let Some(old) = old {
            self.remove(old, pos);
            // The (old, pos) lookup entry is now stale.
            self.updated.append(pos)?;
        }
        if let Some(new) = new {
            self.add(new, pos)?;
        }
        Ok(())
    }

    fn is_update_in_place_compatible(&self, _: Option<&IndexKey>, _: Option<&IndexKey>) -> bool {
        true
    }

    fn contains(&mut self, key: &IndexKey) -> Result<bool, DumpError> {
        Ok(self.map.get(key).is_some())
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
// GroupIndex
// ------------------------------------------------------------------------------------------------

/// A non-unique index: every key maps to the ascending positions of the
/// live records carrying it.
pub struct GroupIndex<B: BeanType> {
    core: Arc<IndexCore<B, GroupState>>,
}

impl<B: BeanType> std::fmt::Debug for GroupIndex<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupIndex")
            .field("field", &self.core.field().name)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}

impl<B: BeanType> GroupIndex<B> {
    /// Attaches a group index on `field` to `dump`.
    pub fn open(dump: &Dump<B>, field: &str) -> Result<Self, DumpError> {
        Ok(Self {
            core: IndexCore::open(dump, field, ())?,
        })
    }

    /// Ascending positions of the live records with `key`.
    pub fn positions(&self, key: &IndexKey) -> Result<Vec<u64>, DumpError> {
        self.core.check_key(key)?;
        self.core.with_index(|s| Ok(s.positions(key)))
    }

    /// Live records with `key`, in position order.
    pub fn lookup(&self, key: &IndexKey) -> Result<Vec<B>, DumpError> {
        self.core.check_key(key)?;
        let found = self.core.with_store(|inner, s| {
            let mut out = Vec::new();
            for pos in s.positions(key) {
                if let Some(bean) = inner.get(pos)? {
                    out.push((pos, bean));
                }
            }
            Ok(out)
        })?;
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

    /// Every key with at least one live record, sorted.
    pub fn keys(&self) -> Result<Vec<IndexKey>, DumpError> {
        self.core.with_index(|s| Ok(s.keys()))
    }

    /// The key a field value maps to, `None` for null.
    pub fn key_for(&self, value: &Value) -> Result<Option<IndexKey>, DumpError> {
        self.core.key_for(value)
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> Result<usize, DumpError> {
        self.core.with_index(|s| Ok(s.key_count()))
    }
}

impl<B: BeanType> DumpIndex<B> for GroupIndex<B> {
    fn field_name(&self) -> &'static str {
        self.core.field().name
    }

    fn contains(&self, key: &IndexKey) -> Result<bool, DumpError> {
        self.core.contains(key)
    }

    fn all_positions(&self) -> Result<Vec<u64>, DumpError> {
        self.core.with_index(|s| Ok(s.all_positions()))
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
