//! Bounded-memory external merge sort.
//!
//! [`ExternalSorter`] accepts fixed-width items in any order. Items are
//! buffered in memory until `memory_entries` is reached, then the buffer is
//! sorted and spilled to a run file next to the given spill prefix. Already
//! sorted sources can be folded in with [`ExternalSorter::add_sorted_segment`]
//! without being re-sorted.
//!
//! [`ExternalSorter::finish`] returns a [`SortedIter`]: a heap-based k-way
//! merge over every spilled run, the in-memory remainder and the folded
//! segments. Run files are removed when the iterator is dropped.
//!
//! ## Run file format
//!
//! A run is a bare concatenation of `T::ENCODED_LEN`-byte encodings, in
//! ascending order. No header, no checksum: runs never outlive the sort.


use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::encoding::{Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SortError {
    /// Spill file I/O failed.
    #[error("I/O error on sort run {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An item could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SortError + '_ {
    move |source| SortError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ------------------------------------------------------------------------------------------------
// SortItem
// ------------------------------------------------------------------------------------------------

/// An item the external sorter can spill: totally ordered and encoded in a
/// fixed number of bytes.
pub trait SortItem: Ord + Encode + Decode + Send + 'static {
    /// Exact size of one encoded item.
    const ENCODED_LEN: usize;
}

/// An already sorted source folded into the merge.
pub type SortedSource<T> = Box<dyn Iterator<Item = Result<T, SortError>> + Send>;

// ------------------------------------------------------------------------------------------------
// ExternalSorter
// ------------------------------------------------------------------------------------------------

pub struct ExternalSorter<T: SortItem> {
    spill_prefix: PathBuf,
    memory_entries: usize,
    buffer: Vec<T>,
    runs: Vec<PathBuf>,
    segments: Vec<SortedSource<T>>,
    pushed: u64,
}

impl<T: SortItem> ExternalSorter<T> {
    /// Creates a sorter spilling to `<spill_prefix>.<n>` files.
    ///
    /// `memory_entries` is the maximum number of items held in memory; it
    /// is clamped to at least 1.
    pub fn new(spill_prefix: impl Into<PathBuf>, memory_entries: usize) -> Self {
        let memory_entries = memory_entries.max(1);
        Self {
            spill_prefix: spill_prefix.into(),
            memory_entries,
            buffer: Vec::with_capacity(memory_entries.min(64 * 1024)),
            runs: Vec::new(),
            segments: Vec::new(),
            pushed: 0,
        }
    }

    /// Adds one item in arbitrary order.
    pub fn push(&mut self, item: T) -> Result<(), SortError> {
        self.buffer.push(item);
        self.pushed += 1;
        if self.buffer.len() >= self.memory_entries {
            self.spill()?;
        }
        Ok(())
    }

    /// Folds a source whose items are already in ascending order.
    ///
    /// The source is consumed lazily during the final merge.
    pub fn add_sorted_segment(&mut self, source: SortedSource<T>) {
        self.segments.push(source);
    }

    /// Number of items pushed so far (folded segments not included).
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Sorts the buffer and writes it out as a new run.
    fn spill(&mut self) -> Result<(), SortError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort_unstable();

        let path = run_path(&self.spill_prefix, self.runs.len());
        let file = File::create(&path).map_err(io_err(&path))?;
        let mut writer = BufWriter::new(file);
        let mut scratch = Vec::with_capacity(T::ENCODED_LEN);
        for item in self.buffer.drain(..) {
            scratch.clear();
            item.encode_to(&mut scratch)?;
            writer.write_all(&scratch).map_err(io_err(&path))?;
        }
        writer.flush().map_err(io_err(&path))?;

        trace!(run = %path.display(), "sort run spilled");
        self.runs.push(path);
        Ok(())
    }

    /// Ends the input phase and returns the merged, ascending stream.
    pub fn finish(mut self) -> Result<SortedIter<T>, SortError> {
        self.buffer.sort_unstable();

        let mut sources: Vec<SortedSource<T>> = Vec::with_capacity(self.runs.len() + 1);
        let runs = std::mem::take(&mut self.runs);
        for path in &runs {
            sources.push(Box::new(RunReader::<T>::open(path)?));
        }
        sources.push(Box::new(
            std::mem::take(&mut self.buffer)
                .into_iter()
                .map(Ok::<T, SortError>),
        ));
        sources.append(&mut self.segments);

        debug!(
            runs = runs.len(),
            sources = sources.len(),
            items = self.pushed,
            "external sort merging"
        );
        Ok(SortedIter::new(sources, runs))
    }
}

impl<T: SortItem> Drop for ExternalSorter<T> {
    fn drop(&mut self) {
        remove_runs(&self.runs);
    }
}

fn run_path(prefix: &Path, n: usize) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

fn remove_runs(runs: &[PathBuf]) {
    for path in runs {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(run = %path.display(), error = %e, "failed to remove sort run");
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// RunReader — streams one spilled run
// ------------------------------------------------------------------------------------------------

struct RunReader<T> {
    path: PathBuf,
    reader: BufReader<File>,
    scratch: Vec<u8>,
    done: bool,
    _marker: std::marker::PhantomData<T>,
}

impl<T: SortItem> RunReader<T> {
    fn open(path: &Path) -> Result<Self, SortError> {
        let file = File::open(path).map_err(io_err(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            scratch: vec![0u8; T::ENCODED_LEN],
            done: false,
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T: SortItem> Iterator for RunReader<T> {
    type Item = Result<T, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_exact(&mut self.scratch) {
            Ok(()) => Some(T::decode_from(&self.scratch).map(|(item, _)| item).map_err(Into::into)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(io_err(&self.path)(e)))
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SortedIter — heap-based k-way merge
// ------------------------------------------------------------------------------------------------

struct HeapEntry<T> {
    item: T,
    source_idx: usize,
}

impl<T: Ord> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap; ties resolved by source order so the merge is stable.
        self.item
            .cmp(&other.item)
            .then(self.source_idx.cmp(&other.source_idx))
            .reverse()
    }
}

impl<T: Ord> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Ord> Eq for HeapEntry<T> {}

/// Ascending merge of every source of an [`ExternalSorter`].
///
/// The first error from any source is yielded once and ends the stream.
pub struct SortedIter<T: SortItem> {
    sources: Vec<SortedSource<T>>,
    heap: BinaryHeap<HeapEntry<T>>,
    pending_error: Option<SortError>,
    failed: bool,
    runs: Vec<PathBuf>,
}

impl<T: SortItem> SortedIter<T> {
    fn new(mut sources: Vec<SortedSource<T>>, runs: Vec<PathBuf>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        let mut pending_error = None;

        for (idx, source) in sources.iter_mut().enumerate() {
            match source.next() {
                Some(Ok(item)) => heap.push(HeapEntry {
                    item,
                    source_idx: idx,
                }),
                Some(Err(e)) => {
                    pending_error.get_or_insert(e);
                }
                None => {}
            }
        }

        Self {
            sources,
            heap,
            pending_error,
            failed: false,
            runs,
        }
    }
}

impl<T: SortItem> Iterator for SortedIter<T> {
    type Item = Result<T, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(e));
        }

        let entry = self.heap.pop()?;
        match self.sources[entry.source_idx].next() {
            Some(Ok(item)) => self.heap.push(HeapEntry {
                item,
                source_idx: entry.source_idx,
            }),
            Some(Err(e)) => self.pending_error = Some(e),
            None => {}
        }
        Some(Ok(entry.item))
    }
}

impl<T: SortItem> Drop for SortedIter<T> {
    fn drop(&mut self) {
        // Close the run readers before unlinking their files.
        self.sources.clear();
        remove_runs(&self.runs);
    }
}
