//! Disk-backed non-unique index for key spaces too large for memory.
//!
//! ## Layers
//!
//! - **Overflow**: an ordinary group index (`P.<f>.overflow.*`) taking
//!   every new entry.
//! - **Disk**: `P.<f>.lookup`, fixed 16-byte `[i64 key][i64 value]`
//!   records sorted by `(key, value)` and memory-mapped. A lookup binary
//!   searches the first record with the key and scans forward. A value of
//!   `-1` marks a record deleted in place.
//!
//! When the overflow layer reaches its threshold both layers are merged
//! through the external sorter into a fresh disk file and the overflow
//! layer is emptied.
//!
//! ## Wide keys
//!
//! Int and Long keys are stored directly and the value is the record
//! position. String, nested bean and object keys are stored as the CRC32
//! of their identity bytes; the value is then a position in the key dump
//! `P.<f>.keys`, whose entries hold the full key and the record position.
//! Every hash match is verified against the key dump.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use bloomfilter::Bloom;
use lru::LruCache;
use memmap2::MmapMut;
use tracing::{debug, info, trace};

use super::DumpIndex;
use super::base::{Backend, BackendContext, IndexCore};
use super::files::{IndexFiles, KEY_DUMPS, remove_store_files, rename_store_files};
use super::group::GroupState;
use super::key::{IndexKey, KeyKind};
use crate::codec::{Bean, BeanType, FieldDef, FieldType, Schema, Value};
use crate::dump::{BulkIter, Dump, DumpConfig};
use crate::encoding::{Decode, Encode, EncodingError};
use crate::error::{DumpError, IoContext};
use crate::sort::{ExternalSorter, SortError, SortItem, SortedSource};

/// Disk value of a record deleted in place.
const TOMBSTONE: i64 = -1;

const ENTRY_LEN: usize = 16;

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Tuning of an [`InfiniteGroupIndex`].
#[derive(Debug, Clone)]
pub struct InfiniteIndexConfig {
    /// Overflow entries that trigger a merge into the disk layer.
    ///
    /// Default: 50 000.
    pub overflow_threshold: usize,

    /// Keys whose positions are cached. `0` disables the cache.
    ///
    /// Default: 1 000.
    pub lookup_cache_size: usize,

    /// Entries the external sorter holds in memory during a merge.
    ///
    /// Default: 1 000 000.
    pub sort_memory_entries: usize,

    /// Target false positive rate of the disk key bloom filter.
    ///
    /// Default: 0.01.
    pub bloom_false_positive_rate: f64,
}

impl Default for InfiniteIndexConfig {
    fn default() -> Self {
        Self {
            overflow_threshold: 50_000,
            lookup_cache_size: 1_000,
            sort_memory_entries: 1_000_000,
            bloom_false_positive_rate: 0.01,
        }
    }
}

impl InfiniteIndexConfig {
    pub(crate) fn validate(&self) -> Result<(), DumpError> {
        if self.overflow_threshold == 0 {
            return Err(DumpError::InvalidConfig(
                "overflow_threshold must be > 0".into(),
            ));
        }
        if self.sort_memory_entries == 0 {
            return Err(DumpError::InvalidConfig(
                "sort_memory_entries must be > 0".into(),
            ));
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return Err(DumpError::InvalidConfig(
                "bloom_false_positive_rate must be in (0, 1)".into(),
            ));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Disk entries
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct DiskEntry {
    key: i64,
    value: i64,
}

impl Encode for DiskEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.value.encode_to(buf)
    }
}

impl Decode for DiskEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (key, n) = i64::decode_from(buf)?;
        let (value, m) = i64::decode_from(&buf[n..])?;
        Ok((Self { key, value }, n + m))
    }
}

impl SortItem for DiskEntry {
    const ENCODED_LEN: usize = ENTRY_LEN;
}

#[inline]
fn be_i64(bytes: &[u8]) -> i64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    i64::from_be_bytes(arr)
}

/// Streams the live records of a disk file, for folding into a merge.
struct DiskReader {
    path: PathBuf,
    reader: BufReader<File>,
    buf: [u8; ENTRY_LEN],
}

impl Iterator for DiskReader {
    type Item = Result<DiskEntry, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.read_exact(&mut self.buf) {
                Ok(()) => {
                    let entry = DiskEntry {
                        key: be_i64(&self.buf[..8]),
                        value: be_i64(&self.buf[8..]),
                    };
                    if entry.value != TOMBSTONE {
                        return Some(Ok(entry));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
                Err(source) => {
                    return Some(Err(SortError::Io {
                        path: self.path.clone(),
                        source,
                    }));
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Key dump entries
// ------------------------------------------------------------------------------------------------

static KEY_ENTRY_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(
        "beandump.KeyEntry",
        vec![
            FieldDef::new(0, "key", FieldType::ByteArray),
            FieldDef::new(1, "position", FieldType::Long),
        ],
    )
});

/// Full key of a hashed disk record, with the record position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct KeyEntry {
    key: Vec<u8>,
    position: i64,
}

impl Bean for KeyEntry {
    fn schema(&self) -> &'static Schema {
        &KEY_ENTRY_SCHEMA
    }

    fn field(&self, index: u8) -> Value {
        match index {
            0 => Value::ByteArray(self.key.clone()),
            1 => Value::Long(self.position),
            _ => Value::Null,
        }
    }

    fn set_field(&mut self, index: u8, value: Value) {
        match (index, value) {
            (0, v) => self.key = v.into_bytes().unwrap_or_default(),
            (1, Value::Long(v)) => self.position = v,
            _ => {}
        }
    }

    fn clone_bean(&self) -> Box<dyn Bean> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl BeanType for KeyEntry {
    fn bean_schema() -> &'static Schema {
        &KEY_ENTRY_SCHEMA
    }
}

// ------------------------------------------------------------------------------------------------
// Backend
// ------------------------------------------------------------------------------------------------

pub(crate) struct InfiniteState {
    files: IndexFiles,
    field: &'static str,
    kind: KeyKind,
    config: InfiniteIndexConfig,
    overflow: GroupState,
    /// `None` while the disk layer is empty.
    disk: Option<MmapMut>,
    bloom: Bloom<i64>,
    /// Only for String, nested bean and object keys.
    key_dump: Option<Dump<KeyEntry>>,
    cache: Option<LruCache<IndexKey, Vec<u64>>>,
    /// Filled during a rebuild scan.
    rebuild: Option<ExternalSorter<DiskEntry>>,
}

impl InfiniteState {
    fn open(
        ctx: &BackendContext<'_>,
        config: &InfiniteIndexConfig,
        overflow: GroupState,
    ) -> Result<Self, DumpError> {
        config.validate()?;
        let key_dump = if ctx.kind.is_variable() {
            Some(Dump::open(ctx.files.path(KEY_DUMPS[0]), key_dump_config())?)
        } else {
            None
        };
        let mut state = Self {
            files: ctx.files.clone(),
            field: ctx.field,
            kind: ctx.kind,
            config: config.clone(),
            overflow,
            disk: None,
            bloom: new_bloom(1, config.bloom_false_positive_rate)?,
            key_dump,
            cache: NonZeroUsize::new(config.lookup_cache_size).map(LruCache::new),
            rebuild: None,
        };
        state.map_disk()?;
        state.rebuild_bloom()?;
        Ok(state)
    }

    fn overflow_ctx<'a>(ctx: &BackendContext<'a>, files: &'a IndexFiles) -> BackendContext<'a> {
        BackendContext {
            files,
            field: ctx.field,
            kind: ctx.kind,
            is_deleted: ctx.is_deleted,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Disk layer
    // --------------------------------------------------------------------------------------------

    /// Maps `P.<f>.lookup`, creating it empty if absent.
    fn map_disk(&mut self) -> Result<(), DumpError> {
        let path = self.files.lookup();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .io_context(&path, "open disk layer")?;
        let len = file.metadata().io_context(&path, "stat disk layer")?.len();
        if len % ENTRY_LEN as u64 != 0 {
            return Err(DumpError::corruption(
                &path,
                format!("size {len} is not a multiple of {ENTRY_LEN}"),
            ));
        }
        self.disk = if len == 0 {
            None
        } else {
            // SAFETY: the file is only written through this mapping or
            // replaced by rename while the mapping is dropped, under the
            // index lock.
            Some(unsafe { MmapMut::map_mut(&file) }.io_context(&path, "map disk layer")?)
        };
        Ok(())
    }

    fn disk_len(&self) -> usize {
        self.disk.as_ref().map_or(0, |m| m.len() / ENTRY_LEN)
    }

    fn disk_entry(&self, i: usize) -> Option<DiskEntry> {
        let map = self.disk.as_ref()?;
        let at = i * ENTRY_LEN;
        let bytes = map.get(at..at + ENTRY_LEN)?;
        Some(DiskEntry {
            key: be_i64(&bytes[..8]),
            value: be_i64(&bytes[8..]),
        })
    }

    fn tombstone_disk(&mut self, i: usize) -> Result<(), DumpError> {
        let path = self.files.lookup();
        let map = self
            .disk
            .as_mut()
            .ok_or_else(|| DumpError::Internal("tombstone on an empty disk layer".into()))?;
        let at = i * ENTRY_LEN + 8;
        let slot = map
            .get_mut(at..at + 8)
            .ok_or_else(|| DumpError::corruption(&path, format!("entry {i} out of range")))?;
        slot.copy_from_slice(&TOMBSTONE.to_be_bytes());
        Ok(())
    }

    /// Index of the first disk record with `key`.
    fn lower_bound(&self, key: i64) -> usize {
        let (mut lo, mut hi) = (0, self.disk_len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.disk_entry(mid) {
                Some(e) if e.key < key => lo = mid + 1,
                _ => hi = mid,
            }
        }
        lo
    }

    /// Live `(index, value)` pairs of disk records with `key`.
    fn disk_matches(&self, key: i64) -> Vec<(usize, i64)> {
        if self.disk.is_none() || !self.bloom.check(&key) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut i = self.lower_bound(key);
        while let Some(e) = self.disk_entry(i) {
            if e.key != key {
                break;
            }
            if e.value != TOMBSTONE {
                out.push((i, e.value));
            }
            i += 1;
        }
        out
    }

    fn rebuild_bloom(&mut self) -> Result<(), DumpError> {
        let n = self.disk_len();
        let mut bloom = new_bloom(n.max(1), self.config.bloom_false_positive_rate)?;
        for i in 0..n {
            if let Some(e) = self.disk_entry(i) {
                if e.value != TOMBSTONE {
                    bloom.set(&e.key);
                }
            }
        }
        self.bloom = bloom;
        Ok(())
    }

    /// Replaces the disk layer with the ascending `entries`.
    fn write_disk(
        &mut self,
        entries: impl Iterator<Item = Result<DiskEntry, SortError>>,
    ) -> Result<u64, DumpError> {
        let path = self.files.lookup();
        let tmp = self.files.path("lookup.tmp");
        let mut written = 0u64;
        {
            let file = File::create(&tmp).io_context(&tmp, "create disk layer")?;
            let mut writer = BufWriter::new(file);
            let mut scratch = Vec::with_capacity(ENTRY_LEN);
            for entry in entries {
                scratch.clear();
                entry?.encode_to(&mut scratch)?;
                writer.write_all(&scratch).io_context(&tmp, "write disk layer")?;
                written += 1;
            }
            writer.flush().io_context(&tmp, "flush disk layer")?;
            writer
                .get_ref()
                .sync_data()
                .io_context(&tmp, "sync disk layer")?;
        }
        self.disk = None;
        fs::rename(&tmp, &path).io_context(&path, "rename disk layer")?;
        self.map_disk()?;
        self.rebuild_bloom()?;
        Ok(written)
    }

    // --------------------------------------------------------------------------------------------
    // Keys
    // --------------------------------------------------------------------------------------------

    fn disk_key(&self, key: &IndexKey) -> i64 {
        match key {
            IndexKey::Int(v) => i64::from(*v),
            IndexKey::Long(v) => *v,
            other => i64::from(crc32fast::hash(&other.to_bytes())),
        }
    }

    fn key_dump(&self) -> Result<&Dump<KeyEntry>, DumpError> {
        self.key_dump
            .as_ref()
            .ok_or_else(|| DumpError::Internal("hashed key without a key dump".into()))
    }

    /// Resolves one disk value to `(key dump position, record position)`
    /// if it belongs to `key`.
    fn resolve(&self, key: &IndexKey, bytes: &[u8], value: i64) -> Result<Option<u64>, DumpError> {
        if !self.kind.is_variable() {
            return Ok(Some(value as u64));
        }
        let entry = self.key_dump()?.get(value as u64)?;
        let hit = entry
            .filter(|e| e.key == bytes && e.position >= 0)
            .map(|e| e.position as u64);
        if hit.is_none() {
            trace!(key = %key, value, "hash collision skipped");
        }
        Ok(hit)
    }

    /// Positions of `key` in the disk layer.
    fn disk_positions(&self, key: &IndexKey) -> Result<Vec<u64>, DumpError> {
        let bytes = key.to_bytes();
        let mut out = Vec::new();
        for (_, value) in self.disk_matches(self.disk_key(key)) {
            if let Some(pos) = self.resolve(key, &bytes, value)? {
                out.push(pos);
            }
        }
        Ok(out)
    }

    /// Disk slot holding `(key, pos)`, with its raw value.
    fn find_disk(&self, key: &IndexKey, pos: u64) -> Result<Option<(usize, i64)>, DumpError> {
        let bytes = key.to_bytes();
        for (i, value) in self.disk_matches(self.disk_key(key)) {
            if self.resolve(key, &bytes, value)? == Some(pos) {
                return Ok(Some((i, value)));
            }
        }
        Ok(None)
    }

    /// The disk record for a record position, adding a key dump entry for
    /// wide keys.
    fn disk_entry_for(&self, key: &IndexKey, pos: u64) -> Result<DiskEntry, DumpError> {
        self.disk_entry_in(self.key_dump.as_ref(), key, pos)
    }

    /// Like [`Self::disk_entry_for`], with the key entry going to `keys`.
    fn disk_entry_in(
        &self,
        keys: Option<&Dump<KeyEntry>>,
        key: &IndexKey,
        pos: u64,
    ) -> Result<DiskEntry, DumpError> {
        let value = if self.kind.is_variable() {
            let keys = keys
                .ok_or_else(|| DumpError::Internal("hashed key without a key dump".into()))?;
            keys.add(&KeyEntry {
                key: key.to_bytes(),
                position: pos as i64,
            })? as i64
        } else {
            pos as i64
        };
        Ok(DiskEntry {
            key: self.disk_key(key),
            value,
        })
    }

    pub(crate) fn positions(&mut self, key: &IndexKey) -> Result<Vec<u64>, DumpError> {
        if let Some(hit) = self.cache.as_mut().and_then(|c| c.get(key)) {
            return Ok(hit.clone());
        }
        let mut positions = self.overflow.positions(key);
        positions.extend(self.disk_positions(key)?);
        positions.sort_unstable();
        positions.dedup();
        if let Some(cache) = self.cache.as_mut() {
            cache.put(key.clone(), positions.clone());
        }
        Ok(positions)
    }

    fn invalidate(&mut self, key: &IndexKey) {
        if let Some(cache) = self.cache.as_mut() {
            cache.pop(key);
        }
    }

    pub(crate) fn all_positions(&self) -> Result<Vec<u64>, DumpError> {
        let mut all = self.overflow.all_positions();
        match &self.key_dump {
            Some(keys) => {
                for item in keys.iter()? {
                    let (_, entry) = item?;
                    all.push(entry.position as u64);
                }
            }
            None => {
                for i in 0..self.disk_len() {
                    if let Some(e) = self.disk_entry(i) {
                        if e.value != TOMBSTONE {
                            all.push(e.value as u64);
                        }
                    }
                }
            }
        }
        all.sort_unstable();
        all.dedup();
        Ok(all)
    }

    pub(crate) fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    /// Live disk records.
    pub(crate) fn disk_live(&self) -> usize {
        (0..self.disk_len())
            .filter_map(|i| self.disk_entry(i))
            .filter(|e| e.value != TOMBSTONE)
            .count()
    }

    // --------------------------------------------------------------------------------------------
    // Merge
    // --------------------------------------------------------------------------------------------

    /// Folds the overflow layer into a fresh disk layer.
    ///
    /// For wide keys the key dump is rewritten alongside, keeping only the
    /// entries of live disk records.
    pub(crate) fn merge(&mut self) -> Result<(), DumpError> {
        let moved = self.overflow.len();
        if moved == 0 {
            return Ok(());
        }
        let next_keys = match self.key_dump {
            Some(_) => Some(self.open_next_key_dump()?),
            None => None,
        };

        let mut sorter = ExternalSorter::new(self.files.path("sort"), self.config.sort_memory_entries);
        let mut remapped = None;
        if self.disk.is_some() {
            let path = match &next_keys {
                Some(keys) => {
                    let path = self.remap_disk(keys)?;
                    remapped = Some(path.clone());
                    path
                }
                None => self.files.lookup(),
            };
            let file = File::open(&path).io_context(&path, "open disk layer")?;
            let reader: SortedSource<DiskEntry> = Box::new(DiskReader {
                path,
                reader: BufReader::new(file),
                buf: [0u8; ENTRY_LEN],
            });
            sorter.add_sorted_segment(reader);
        }
        let keys = next_keys.as_ref().or(self.key_dump.as_ref());
        for (key, pos) in self.overflow.sorted_entries() {
            sorter.push(self.disk_entry_in(keys, &key, pos)?)?;
        }
        let written = self.write_disk(sorter.finish()?)?;
        if let Some(path) = remapped {
            fs::remove_file(&path).io_context(&path, "remove remapped disk layer")?;
        }
        if let Some(keys) = next_keys {
            self.swap_key_dump(keys)?;
        }
        self.overflow.clear()?;
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
        info!(
            field = self.field,
            moved,
            disk_entries = written,
            "overflow merged into disk layer"
        );
        Ok(())
    }

    /// An empty staging key dump at `P.<f>.keys.next`.
    fn open_next_key_dump(&self) -> Result<Dump<KeyEntry>, DumpError> {
        let path = self.files.path(KEY_DUMPS[1]);
        remove_store_files(&path)?;
        Dump::open(path, key_dump_config())
    }

    /// Copies the live disk records to `P.<f>.lookup.remap`, moving their
    /// key entries into `keys`. Positions in `keys` grow in disk order, so
    /// the copy stays sorted by `(key, value)`.
    fn remap_disk(&self, keys: &Dump<KeyEntry>) -> Result<PathBuf, DumpError> {
        let old = self.key_dump()?;
        let path = self.files.path("lookup.remap");
        let file = File::create(&path).io_context(&path, "create remapped disk layer")?;
        let mut writer = BufWriter::new(file);
        let mut scratch = Vec::with_capacity(ENTRY_LEN);
        let mut kept = 0u64;
        for i in 0..self.disk_len() {
            let Some(e) = self.disk_entry(i) else { break };
            if e.value == TOMBSTONE {
                continue;
            }
            let Some(entry) = old.get(e.value as u64)? else {
                continue;
            };
            let value = keys.add(&entry)? as i64;
            scratch.clear();
            DiskEntry { key: e.key, value }.encode_to(&mut scratch)?;
            writer
                .write_all(&scratch)
                .io_context(&path, "write remapped disk layer")?;
            kept += 1;
        }
        writer.flush().io_context(&path, "flush remapped disk layer")?;
        trace!(field = self.field, kept, "disk layer remapped");
        Ok(path)
    }

    /// Replaces the key dump with the staged one.
    fn swap_key_dump(&mut self, next: Dump<KeyEntry>) -> Result<(), DumpError> {
        if let Some(old) = self.key_dump.take() {
            old.close()?;
        }
        next.close()?;
        let live = self.files.path(KEY_DUMPS[0]);
        remove_store_files(&live)?;
        rename_store_files(&self.files.path(KEY_DUMPS[1]), &live)?;
        self.key_dump = Some(Dump::open(live, key_dump_config())?);
        Ok(())
    }

    fn merge_if_full(&mut self) -> Result<(), DumpError> {
        if self.overflow.len() >= self.config.overflow_threshold {
            self.merge()?;
        }
        Ok(())
    }

    /// Removes `(key, pos)` from whichever layer holds it.
    fn remove(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError> {
        if self.overflow.has(key, pos) {
            return Backend::delete(&mut self.overflow, key, pos);
        }
        if let Some((i, value)) = self.find_disk(key, pos)? {
            self.tombstone_disk(i)?;
            if let Some(keys) = &self.key_dump {
                keys.delete(value as u64)?;
            }
        }
        Ok(())
    }
}

/// Key dumps are compacted by merges, never by the store's own prune.
fn key_dump_config() -> DumpConfig {
    DumpConfig {
        prune_threshold: usize::MAX,
        sync_deletions: false,
        will_be_closed_during_shutdown: true,
        ..DumpConfig::default()
    }
}

fn new_bloom(n: usize, fp: f64) -> Result<Bloom<i64>, DumpError> {
    Bloom::new_for_fp_rate(n, fp).map_err(|e| DumpError::Internal(e.to_string()))
}

impl Backend for InfiniteState {
    const KIND: &'static str = "infinite";

    type Options = InfiniteIndexConfig;

    fn load(ctx: &BackendContext<'_>, options: &InfiniteIndexConfig) -> Result<Self, DumpError> {
        let files = ctx.files.child("overflow");
        let overflow = GroupState::load(&Self::overflow_ctx(ctx, &files), &())?;
        let state = Self::open(ctx, options, overflow)?;
        debug!(
            field = ctx.field,
            disk = state.disk_len(),
            overflow = state.overflow.len(),
            "infinite index loaded"
        );
        Ok(state)
    }

    fn create(ctx: &BackendContext<'_>, options: &InfiniteIndexConfig) -> Result<Self, DumpError> {
        let files = ctx.files.child("overflow");
        let overflow = GroupState::create(&Self::overflow_ctx(ctx, &files), &())?;
        Self::open(ctx, options, overflow)
    }

    fn rebuild_add(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError> {
        let entry = self.disk_entry_for(key, pos)?;
        let sorter = self.rebuild.get_or_insert_with(|| {
            ExternalSorter::new(self.files.path("sort"), self.config.sort_memory_entries)
        });
        sorter.push(entry)?;
        Ok(())
    }

    fn rebuild_finish(&mut self) -> Result<(), DumpError> {
        let Some(sorter) = self.rebuild.take() else {
            return Ok(());
        };
        let written = self.write_disk(sorter.finish()?)?;
        debug!(field = self.field, disk_entries = written, "disk layer written");
        Ok(())
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
        self.invalidate(key);
        Backend::add(&mut self.overflow, key, pos)?;
        self.merge_if_full()
    }

    fn delete(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError> {
        self.invalidate(key);
        self.remove(key, pos)
    }

    fn update(
        &mut self,
        pos: u64,
        old: Option<&IndexKey>,
        new: Option<&IndexKey>,
    ) -> Result<(), DumpError> {
        if let Some(old) = old {
            self.invalidate(old);
        }
        if let Some(new) = new {
            self.invalidate(new);
        }
        match old {
            Some(old) if self.overflow.has(old, pos) => {
                Backend::update(&mut self.overflow, pos, Some(old), new)?;
            }
            _ => {
                if let Some(old) = old {
                    self.remove(old, pos)?;
                }
                if let Some(new) = new {
                    Backend::add(&mut self.overflow, new, pos)?;
                }
            }
        }
        self.merge_if_full()
    }

    fn is_update_in_place_compatible(&self, _: Option<&IndexKey>, _: Option<&IndexKey>) -> bool {
        true
    }

    fn contains(&mut self, key: &IndexKey) -> Result<bool, DumpError> {
        if !self.overflow.positions(key).is_empty() {
            return Ok(true);
        }
        Ok(!self.positions(key)?.is_empty())
    }

    fn flush(&mut self) -> Result<(), DumpError> {
        if let Some(map) = self.disk.as_ref() {
            let path = self.files.lookup();
            map.flush().io_context(&path, "flush disk layer")?;
        }
        Backend::flush(&mut self.overflow)?;
        if let Some(keys) = &self.key_dump {
            keys.flush()?;
        }
        Ok(())
    }

    fn close(mut self) -> Result<(), DumpError> {
        Backend::flush(&mut self)?;
        self.disk = None;
        let overflow = self.overflow;
        overflow.close()?;
        if let Some(keys) = self.key_dump.take() {
            keys.close()?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// InfiniteGroupIndex
// ------------------------------------------------------------------------------------------------

/// A non-unique index keeping most of its entries on disk.
///
/// Memory use is bounded by the overflow threshold, the lookup cache and
/// the bloom filter; the full key set lives in the sorted disk layer.
///
/// # Example
///
/// ```rust,no_run
/// # use beandump::{BeanType, Dump, DumpError, InfiniteGroupIndex, InfiniteIndexConfig};
/// # fn demo<B: BeanType>(dump: &Dump<B>) -> Result<(), DumpError> {
/// let config = InfiniteIndexConfig {
///     overflow_threshold: 10_000,
///     ..InfiniteIndexConfig::default()
/// };
/// let by_category = InfiniteGroupIndex::open_with_config(dump, "category", config)?;
/// for record in by_category.lookup_str("books")? {
///     println!("{record:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct InfiniteGroupIndex<B: BeanType> {
    core: Arc<IndexCore<B, InfiniteState>>,
}

impl<B: BeanType> std::fmt::Debug for InfiniteGroupIndex<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfiniteGroupIndex")
            .field("field", &self.core.field().name)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}

impl<B: BeanType> InfiniteGroupIndex<B> {
    /// Attaches an infinite group index on `field` with default tuning.
    pub fn open(dump: &Dump<B>, field: &str) -> Result<Self, DumpError> {
        Self::open_with_config(dump, field, InfiniteIndexConfig::default())
    }

    pub fn open_with_config(
        dump: &Dump<B>,
        field: &str,
        config: InfiniteIndexConfig,
    ) -> Result<Self, DumpError> {
        config.validate()?;
        Ok(Self {
            core: IndexCore::open(dump, field, config)?,
        })
    }

    /// Ascending positions of the live records with `key`.
    pub fn positions(&self, key: &IndexKey) -> Result<Vec<u64>, DumpError> {
        self.core.check_key(key)?;
        self.core.with_index(|s| s.positions(key))
    }

    /// Live records with `key`, in position order.
    pub fn lookup(&self, key: &IndexKey) -> Result<Vec<B>, DumpError> {
        self.core.check_key(key)?;
        let found = self.core.with_store(|inner, s| {
            let mut out = Vec::new();
            for pos in s.positions(key)? {
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

    /// Merges the overflow layer into the disk layer now.
    pub fn merge(&self) -> Result<(), DumpError> {
        self.core.touch()?;
        self.core.with_index(|s| s.merge())
    }

    /// Entries waiting in the overflow layer.
    pub fn overflow_len(&self) -> Result<usize, DumpError> {
        self.core.with_index(|s| Ok(s.overflow_len()))
    }

    /// Live entries in the disk layer.
    pub fn disk_len(&self) -> Result<usize, DumpError> {
        self.core.with_index(|s| Ok(s.disk_live()))
    }

    /// The key a field value maps to, `None` for null.
    pub fn key_for(&self, value: &Value) -> Result<Option<IndexKey>, DumpError> {
        self.core.key_for(value)
    }
}

impl<B: BeanType> DumpIndex<B> for InfiniteGroupIndex<B> {
    fn field_name(&self) -> &'static str {
        self.core.field().name
    }

    fn contains(&self, key: &IndexKey) -> Result<bool, DumpError> {
        self.core.contains(key)
    }

    fn all_positions(&self) -> Result<Vec<u64>, DumpError> {
        self.core.with_index(|s| s.all_positions())
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
