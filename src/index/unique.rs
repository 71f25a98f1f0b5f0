//! One live position per key.

use std::collections::HashMap;
use std::sync::Arc;

use super::DumpIndex;
use super::base::{Backend, BackendContext, IndexCore};
use super::files::{LookupWriter, UpdatedLog, read_updated, replay_lookup};
use super::key::{IndexKey, KeyMap};
use crate::codec::{BeanType, Value};
use crate::dump::{BulkIter, Dump};
use crate::error::DumpError;

/// Consumes one pending skip for `pos`, if any.
pub(crate) fn skip_once(skips: &mut HashMap<u64, u32>, pos: u64) -> bool {
    match skips.get_mut(&pos) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

// ------------------------------------------------------------------------------------------------
// Backend
// ------------------------------------------------------------------------------------------------

pub(crate) struct UniqueState {
    map: KeyMap<u64>,
    lookup: LookupWriter,
    updated: UpdatedLog,
}

impl UniqueState {
    fn open_files(ctx: &BackendContext<'_>, map: KeyMap<u64>, truncate: bool) -> Result<Self, DumpError> {
        Ok(Self {
            map,
            lookup: LookupWriter::open(ctx.files.lookup(), ctx.kind, truncate)?,
            updated: UpdatedLog::open(ctx.files.updated(), truncate)?,
        })
    }

    fn duplicate(field: &str, key: &IndexKey) -> DumpError {
        DumpError::DuplicateKey {
            field: field.to_string(),
            key: key.to_string(),
        }
    }

    pub(crate) fn position_of(&self, key: &IndexKey) -> Option<u64> {
        self.map.get(key).copied()
    }
}

impl Backend for UniqueState {
    const KIND: &'static str = "unique";

    type Options = ();

    fn load(ctx: &BackendContext<'_>, _: &()) -> Result<Self, DumpError> {
        let mut skips = read_updated(&ctx.files.updated())?;
        let mut map = KeyMap::new(ctx.kind);
        replay_lookup(&ctx.files.lookup(), ctx.kind, |key, pos| {
            if skip_once(&mut skips, pos) || (ctx.is_deleted)(pos) {
                return Ok(());
            }
            if map.insert(&key, pos).is_some() {
                return Err(Self::duplicate(ctx.field, &key));
            }
            Ok(())
        })?;
        Self::open_files(ctx, map, false)
    }

    fn create(ctx: &BackendContext<'_>, _: &()) -> Result<Self, DumpError> {
        Self::open_files(ctx, KeyMap::new(ctx.kind), true)
    }

    fn check_add(&self, field: &str, key: &IndexKey) -> Result<(), DumpError> {
        if self.map.get(key).is_some() {
            return Err(Self::duplicate(field, key));
        }
        Ok(())
    }

    fn check_update(
        &self,
        field: &str,
        pos: u64,
        old: Option<&IndexKey>,
        new: Option<&IndexKey>,
        _in_place: bool,
    ) -> Result<(), DumpError> {
        let Some(new) = new else { return Ok(()) };
        if old == Some(new) {
            return Ok(());
        }
        match self.map.get(new) {
            Some(&other) if other != pos => Err(Self::duplicate(field, new)),
            _ => Ok(()),
        }
    }

    fn add(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError> {
        self.map.insert(key, pos);
        self.lookup.append(key, pos)
    }

    fn delete(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError> {
        if self.map.get(key) == Some(&pos) {
            self.map.remove(key);
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
// UniqueIndex
// ------------------------------------------------------------------------------------------------

/// An index holding at most one live record per key.
///
/// Adding a record whose key is already present fails with
/// [`DumpError::DuplicateKey`] before anything is written. Key-changing
/// updates stay in place: the new entry is appended to the lookup file and
/// the superseded one is skipped at the next load.
///
/// # Example
///
/// ```rust,no_run
/// # use beandump::{BeanType, Dump, DumpError, UniqueIndex};
/// # fn demo<B: BeanType>(dump: &Dump<B>) -> Result<(), DumpError> {
/// let by_id = UniqueIndex::open(dump, "id")?;
/// if let Some(record) = by_id.lookup_int(42)? {
///     println!("{record:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct UniqueIndex<B: BeanType> {
    core: Arc<IndexCore<B, UniqueState>>,
}

impl<B: BeanType> std::fmt::Debug for UniqueIndex<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniqueIndex")
            .field("field", &self.core.field().name)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}

impl<B: BeanType> UniqueIndex<B> {
    /// Attaches a unique index on `field` to `dump`.
    pub fn open(dump: &Dump<B>, field: &str) -> Result<Self, DumpError> {
        Ok(Self {
            core: IndexCore::open(dump, field, ())?,
        })
    }

    /// Position of the live record with `key`.
    pub fn position_of(&self, key: &IndexKey) -> Result<Option<u64>, DumpError> {
        self.core.check_key(key)?;
        self.core.with_index(|s| Ok(s.position_of(key)))
    }

    pub fn position_of_int(&self, key: i32) -> Result<Option<u64>, DumpError> {
        self.position_of(&IndexKey::Int(key))
    }

    pub fn position_of_long(&self, key: i64) -> Result<Option<u64>, DumpError> {
        self.position_of(&IndexKey::Long(key))
    }

    /// The live record with `key`.
    pub fn lookup(&self, key: &IndexKey) -> Result<Option<B>, DumpError> {
        self.core.check_key(key)?;
        let found = self.core.with_store(|inner, s| match s.position_of(key) {
            Some(pos) => Ok(inner.get(pos)?.map(|bean| (pos, bean))),
            None => Ok(None),
        })?;
        Ok(found.map(|(pos, bean)| {
            self.core.note_access(pos);
            bean
        }))
    }

    pub fn lookup_int(&self, key: i32) -> Result<Option<B>, DumpError> {
        self.lookup(&IndexKey::Int(key))
    }

    pub fn lookup_long(&self, key: i64) -> Result<Option<B>, DumpError> {
        self.lookup(&IndexKey::Long(key))
    }

    pub fn lookup_str(&self, key: &str) -> Result<Option<B>, DumpError> {
        self.lookup(&IndexKey::Str(key.to_string()))
    }

    /// The key a field value maps to, `None` for null.
    pub fn key_for(&self, value: &Value) -> Result<Option<IndexKey>, DumpError> {
        self.core.key_for(value)
    }

    /// Number of keys.
    pub fn len(&self) -> Result<usize, DumpError> {
        self.core.with_index(|s| Ok(s.map.len()))
    }

    pub fn is_empty(&self) -> Result<bool, DumpError> {
        self.len().map(|n| n == 0)
    }
}

impl<B: BeanType> DumpIndex<B> for UniqueIndex<B> {
    fn field_name(&self) -> &'static str {
        self.core.field().name
    }

    fn contains(&self, key: &IndexKey) -> Result<bool, DumpError> {
        self.core.contains(key)
    }

    fn all_positions(&self) -> Result<Vec<u64>, DumpError> {
        self.core.with_index(|s| {
            let mut positions: Vec<u64> = s.map.values().copied().collect();
            positions.sort_unstable();
            Ok(positions)
        })
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
