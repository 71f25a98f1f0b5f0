//! State of an open store, guarded by the store mutex.
//!
//! Everything here runs with the lock held: file I/O, the position cache,
//! the sequence counter and the fan-out to attached indexes. Indexes get
//! `&mut DumpInner` when they need to read records during their own
//! operations, so they never re-enter the public locking API.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, trace};

use super::cache::{CacheEntry, PositionCache};
use super::deletions::Deletions;
use super::lock::OpenRegistration;
use super::meta::StoreMeta;
use crate::codec::{self, BeanType};
use crate::error::{DumpError, IoContext};
use crate::index::IndexListener;

// ------------------------------------------------------------------------------------------------
// Read window
// ------------------------------------------------------------------------------------------------

/// A contiguous copy of `[start, start + buf.len())` of the data file.
///
/// Sequential reads are served from it without touching the file; a read
/// outside it refills it at the requested position.
#[derive(Debug, Default)]
pub(crate) struct ReadWindow {
    start: u64,
    buf: Vec<u8>,
}

impl ReadWindow {
    #[inline]
    fn slice_from(&self, pos: u64) -> Option<&[u8]> {
        let end = self.start + self.buf.len() as u64;
        if pos >= self.start && pos < end {
            Some(&self.buf[(pos - self.start) as usize..])
        } else {
            None
        }
    }

    #[inline]
    fn end(&self) -> u64 {
        self.start + self.buf.len() as u64
    }

    pub(crate) fn invalidate(&mut self) {
        self.start = 0;
        self.buf.clear();
    }

    fn fill(&mut self, file: &File, path: &Path, pos: u64, len: usize) -> Result<(), DumpError> {
        self.buf.clear();
        self.buf.resize(len, 0);
        file.read_exact_at(&mut self.buf, pos)
            .io_context(path, format!("read at {pos}"))?;
        self.start = pos;
        Ok(())
    }
}

/// Reads the raw encoding of the record at `pos` through `window`.
///
/// The window is refilled at `pos` when it does not cover the position,
/// and grown by doubling while the record does not fit. A record running
/// past `data_len` is corruption.
pub(crate) fn read_entry(
    file: &File,
    path: &Path,
    data_len: u64,
    window: &mut ReadWindow,
    min_chunk: usize,
    pos: u64,
) -> Result<CacheEntry, DumpError> {
    if pos >= data_len {
        return Err(DumpError::NoSuchRecord(pos));
    }

    let mut chunk = min_chunk;
    let mut refill = window.slice_from(pos).is_none();
    loop {
        if refill {
            let len = chunk.min((data_len - pos) as usize);
            window.fill(file, path, pos, len)?;
        }
        let slice = window.slice_from(pos).unwrap_or(&[]);
        match codec::skip_record(slice) {
            Ok(n) => {
                return Ok(CacheEntry {
                    bytes: slice[..n].to_vec(),
                    next_position: pos + n as u64,
                });
            }
            Err(e) if e.is_eof() => {
                if window.end() >= data_len {
                    return Err(DumpError::corruption(
                        path,
                        format!("record at {pos} runs past end of file ({data_len})"),
                    ));
                }
                chunk = chunk.saturating_mul(2).max(slice.len() * 2);
                refill = true;
            }
            Err(e) => {
                return Err(DumpError::corruption(
                    path,
                    format!("unreadable record at {pos}: {e}"),
                ));
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// DumpInner
// ------------------------------------------------------------------------------------------------

pub(crate) struct DumpInner<B: BeanType> {
    path: PathBuf,
    /// Positional reads and in-place overwrites.
    file: File,
    /// Appends. `None` for a read-only store.
    writer: Option<BufWriter<File>>,
    /// Logical length, buffered appends included.
    data_len: u64,
    window: ReadWindow,
    read_buffer_size: usize,
    cache: PositionCache,
    pub(crate) deletions: Deletions,
    pub(crate) meta: StoreMeta,
    listeners: Vec<Arc<dyn IndexListener<B>>>,
    encode_buf: Vec<u8>,
    _registration: Option<OpenRegistration>,
}

impl<B: BeanType> std::fmt::Debug for DumpInner<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpInner")
            .field("path", &self.path)
            .field("data_len", &self.data_len)
            .field("tombstones", &self.deletions.len())
            .field("sequence", &self.meta.sequence())
            .field("indexes", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

pub(crate) struct InnerParts {
    pub(crate) path: PathBuf,
    pub(crate) file: File,
    pub(crate) writer: Option<BufWriter<File>>,
    pub(crate) data_len: u64,
    pub(crate) read_buffer_size: usize,
    pub(crate) cache_size: usize,
    pub(crate) deletions: Deletions,
    pub(crate) meta: StoreMeta,
    pub(crate) registration: Option<OpenRegistration>,
}

impl<B: BeanType> DumpInner<B> {
    pub(crate) fn new(parts: InnerParts) -> Self {
        Self {
            path: parts.path,
            file: parts.file,
            writer: parts.writer,
            data_len: parts.data_len,
            window: ReadWindow::default(),
            read_buffer_size: parts.read_buffer_size,
            cache: PositionCache::new(parts.cache_size),
            deletions: parts.deletions,
            meta: parts.meta,
            listeners: Vec::new(),
            encode_buf: Vec::with_capacity(256),
            _registration: parts.registration,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------------------------------

    #[inline]
    pub(crate) fn data_len(&self) -> u64 {
        self.data_len
    }

    #[inline]
    pub(crate) fn sequence(&self) -> u64 {
        self.meta.sequence()
    }

    #[inline]
    pub(crate) fn is_deleted(&self, pos: u64) -> bool {
        self.deletions.contains(pos)
    }

    pub(crate) fn deleted_count(&self) -> usize {
        self.deletions.len()
    }

    pub(crate) fn cached_count(&self) -> usize {
        self.cache.len()
    }

    // --------------------------------------------------------------------------------------------
    // Index attachment
    // --------------------------------------------------------------------------------------------

    pub(crate) fn has_index(&self, field: &str) -> bool {
        self.listeners.iter().any(|l| l.field_name() == field)
    }

    pub(crate) fn attach(&mut self, listener: Arc<dyn IndexListener<B>>) {
        self.listeners.push(listener);
    }

    pub(crate) fn detach(&mut self, field: &str) {
        self.listeners.retain(|l| l.field_name() != field);
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Makes buffered appends visible to positional reads.
    fn flush_writer(&mut self) -> Result<(), DumpError> {
        if let Some(w) = self.writer.as_mut() {
            if !w.buffer().is_empty() {
                w.flush().io_context(&self.path, "flush")?;
            }
        }
        Ok(())
    }

    /// Raw entry at `pos`, bypassing the cache.
    pub(crate) fn read_raw(&mut self, pos: u64) -> Result<CacheEntry, DumpError> {
        self.flush_writer()?;
        read_entry(
            &self.file,
            &self.path,
            self.data_len,
            &mut self.window,
            self.read_buffer_size,
            pos,
        )
    }

    /// Raw entry at `pos`, served from and stored into the cache.
    pub(crate) fn entry(&mut self, pos: u64) -> Result<CacheEntry, DumpError> {
        if let Some(hit) = self.cache.get(pos) {
            trace!(pos, "cache hit");
            return Ok(hit.clone());
        }
        let entry = self.read_raw(pos)?;
        self.cache.put(pos, entry.clone());
        Ok(entry)
    }

    pub(crate) fn decode(&self, pos: u64, bytes: &[u8]) -> Result<B, DumpError> {
        codec::decode_record::<B>(bytes)
            .map(|(bean, _)| bean)
            .map_err(|source| DumpError::Decode {
                type_name: B::bean_schema().type_name(),
                pos,
                source,
            })
    }

    /// The live record at `pos`, or `None` if it is tombstoned.
    pub(crate) fn get(&mut self, pos: u64) -> Result<Option<B>, DumpError> {
        if self.deletions.contains(pos) {
            return Ok(None);
        }
        let entry = self.entry(pos)?;
        self.decode(pos, &entry.bytes).map(Some)
    }

    /// First live record at or after `from`, with the position after it.
    pub(crate) fn next_live(&mut self, mut from: u64) -> Result<Option<(u64, B, u64)>, DumpError> {
        while from < self.data_len {
            let entry = self.read_raw(from)?;
            if self.deletions.contains(from) {
                from = entry.next_position;
                continue;
            }
            let bean = self.decode(from, &entry.bytes)?;
            return Ok(Some((from, bean, entry.next_position)));
        }
        Ok(None)
    }

    /// Calls `f` for every live record in file order.
    pub(crate) fn for_each_live(
        &mut self,
        mut f: impl FnMut(u64, B) -> Result<(), DumpError>,
    ) -> Result<(), DumpError> {
        let mut pos = 0;
        while let Some((at, bean, next)) = self.next_live(pos)? {
            f(at, bean)?;
            pos = next;
        }
        Ok(())
    }

    /// Every live position, ascending.
    pub(crate) fn live_positions(&mut self) -> Result<Vec<u64>, DumpError> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < self.data_len {
            let entry = self.read_raw(pos)?;
            if !self.deletions.contains(pos) {
                out.push(pos);
            }
            pos = entry.next_position;
        }
        Ok(out)
    }

    // --------------------------------------------------------------------------------------------
    // Mutations
    // --------------------------------------------------------------------------------------------

    fn writer(&mut self) -> Result<&mut BufWriter<File>, DumpError> {
        self.writer
            .as_mut()
            .ok_or(DumpError::AccessDenied("store is read-only"))
    }

    /// Encodes `bean` with the store's reusable buffer and appends it.
    pub(crate) fn add(&mut self, bean: &B) -> Result<u64, DumpError> {
        let mut buf = std::mem::take(&mut self.encode_buf);
        buf.clear();
        let result = codec::encode_bean(bean, &mut buf)
            .map_err(DumpError::from)
            .and_then(|()| self.add_encoded(bean, &buf));
        self.encode_buf = buf;
        result
    }

    /// Appends an already encoded record and notifies every index.
    ///
    /// Every index is asked first; a rejection leaves the file untouched.
    pub(crate) fn add_encoded(&mut self, bean: &B, bytes: &[u8]) -> Result<u64, DumpError> {
        for l in &self.listeners {
            l.check_add(bean)?;
        }

        let pos = self.append(bytes)?;
        self.meta.bump();
        for l in &self.listeners {
            l.add(bean, pos)?;
        }
        trace!(pos, len = bytes.len(), "record appended");
        Ok(pos)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64, DumpError> {
        let pos = self.data_len;
        let path = self.path.clone();
        self.writer()?
            .write_all(bytes)
            .io_context(&path, format!("append at {pos}"))?;
        self.data_len += bytes.len() as u64;
        Ok(pos)
    }

    /// Tombstones the live record at `pos` and returns it.
    pub(crate) fn delete(&mut self, pos: u64) -> Result<B, DumpError> {
        let old = self.get(pos)?.ok_or(DumpError::NoSuchRecord(pos))?;
        self.tombstone(pos, &old)?;
        Ok(old)
    }

    fn tombstone(&mut self, pos: u64, old: &B) -> Result<(), DumpError> {
        self.deletions.add(pos)?;
        self.cache.invalidate(pos);
        self.meta.bump();
        for l in &self.listeners {
            l.delete(old, pos)?;
        }
        trace!(pos, "record deleted");
        Ok(())
    }

    /// Replaces the record at `pos`.
    ///
    /// Returns the old record and the position the new one lives at.
    pub(crate) fn update(
        &mut self,
        pos: u64,
        new: &B,
        in_place_allowed: bool,
        out_of_place_allowed: bool,
    ) -> Result<(B, u64), DumpError> {
        if self.deletions.contains(pos) {
            return Err(DumpError::NoSuchRecord(pos));
        }

        // With the cache disabled the old entry lives in this local slot
        // for the length comparison only.
        let old_entry = self.entry(pos)?;
        let old = self.decode(pos, &old_entry.bytes)?;
        let new_bytes = codec::encode_to_vec(new)?;

        let in_place = in_place_allowed
            && new_bytes.len() == old_entry.len()
            && self
                .listeners
                .iter()
                .all(|l| l.is_update_in_place_compatible(&old, new));
        if !in_place && !out_of_place_allowed {
            return Err(DumpError::AccessDenied(
                "update needs relocation but UPDATE_OUT_OF_PLACE is not granted",
            ));
        }
        for l in &self.listeners {
            l.check_update(pos, &old, new, in_place)?;
        }

        if in_place {
            self.overwrite(pos, &new_bytes, old_entry.next_position)?;
            self.meta.bump();
            for l in &self.listeners {
                l.update(pos, &old, new)?;
            }
            trace!(pos, "record updated in place");
            return Ok((old, pos));
        }

        self.tombstone(pos, &old)?;
        let new_pos = self.append(&new_bytes)?;
        self.meta.bump();
        for l in &self.listeners {
            l.add(new, new_pos)?;
        }
        trace!(from = pos, to = new_pos, "record relocated by update");
        Ok((old, new_pos))
    }

    fn overwrite(&mut self, pos: u64, bytes: &[u8], next_position: u64) -> Result<(), DumpError> {
        self.writer()?;
        self.flush_writer()?;
        self.file
            .write_all_at(bytes, pos)
            .io_context(&self.path, format!("overwrite at {pos}"))?;
        self.window.invalidate();
        self.cache.invalidate(pos);
        if self.cache.is_enabled() {
            self.cache.put(
                pos,
                CacheEntry {
                    bytes: bytes.to_vec(),
                    next_position,
                },
            );
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Durability
    // --------------------------------------------------------------------------------------------

    /// Forces buffered appends to disk.
    pub(crate) fn flush(&mut self) -> Result<(), DumpError> {
        if let Some(w) = self.writer.as_mut() {
            w.flush().io_context(&self.path, "flush")?;
            w.get_ref().sync_data().io_context(&self.path, "sync")?;
        }
        self.deletions.flush()
    }

    /// Persists the sequence and lets every index checkpoint itself.
    pub(crate) fn flush_meta(&mut self) -> Result<(), DumpError> {
        self.flush()?;
        self.meta.flush()?;
        let sequence = self.meta.sequence();
        for l in &self.listeners {
            l.flush(sequence)?;
        }
        Ok(())
    }

    /// Flushes everything and closes every attached index.
    ///
    /// Every step is attempted; the first error is returned.
    pub(crate) fn close(mut self) -> Result<(), DumpError> {
        let mut first: Option<DumpError> = None;
        let mut keep = |r: Result<(), DumpError>| {
            if let Err(e) = r {
                error!(error = %e, "error while closing dump");
                first.get_or_insert(e);
            }
        };

        keep(self.flush());
        keep(self.meta.flush());
        let sequence = self.meta.sequence();
        for l in std::mem::take(&mut self.listeners) {
            debug!(field = l.field_name(), "closing index with dump");
            keep(l.close_with_dump(sequence));
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drops open files without persisting the sequence or index state.
    #[cfg(test)]
    pub(crate) fn abandon(mut self) {
        self.listeners.clear();
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }
}
