//! On-disk files of one index on field `f` of store `P`.
//!
//! - `P.<f>.lookup`: append-only `(key, position)` entries in add order.
//!   Int keys are `[i32][i64]`, Long keys `[i64][i64]`, every other key
//!   `[u32 len][bytes][i64]`.
//! - `P.<f>.updatedPositions`: append-only 8-byte positions; each entry
//!   makes replay skip the next lookup entry for that position once.
//! - `P.<f>.meta`: `[u64 sequence][string type name][string index kind]
//!   [u32 crc32]`. Present only while the lookup file is known to match
//!   the store at that sequence.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use super::key::{IndexKey, KeyKind};
use crate::dump::sidecar_path;
use crate::encoding::{Decode, Encode, EncodingError, SliceReader};
use crate::error::{DumpError, IoContext};

/// Files of one layer, relative to `P.<f>` or `P.<f>.overflow`.
const LAYER_FILES: [&str; 6] = [
    "lookup",
    "lookup.tmp",
    "lookup.remap",
    "updatedPositions",
    "meta",
    "meta.tmp",
];

/// Key dumps of an infinite index: the live one and a merge's staging copy.
pub(crate) const KEY_DUMPS: [&str; 2] = ["keys", "keys.next"];

/// Sidecars a store keeps next to its data file.
const STORE_SIDECARS: [&str; 4] = ["meta", "deletions", "prune", "prune.tmp"];

fn remove_file_if_exists(path: &Path) -> Result<bool, DumpError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).io_context(path, "remove index file"),
    }
}

/// Removes a closed store's data file and its sidecars.
pub(crate) fn remove_store_files(path: &Path) -> Result<(), DumpError> {
    remove_file_if_exists(path)?;
    for suffix in STORE_SIDECARS {
        remove_file_if_exists(&sidecar_path(path, suffix))?;
    }
    Ok(())
}

/// Moves a closed store's data file and sidecars from `from` to `to`.
pub(crate) fn rename_store_files(from: &Path, to: &Path) -> Result<(), DumpError> {
    fs::rename(from, to).io_context(to, "rename store")?;
    for suffix in STORE_SIDECARS {
        let src = sidecar_path(from, suffix);
        if src.exists() {
            let dst = sidecar_path(to, suffix);
            fs::rename(&src, &dst).io_context(&dst, "rename store sidecar")?;
        }
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// IndexFiles
// ------------------------------------------------------------------------------------------------

/// Paths of one index, all derived from `P.<f>`.
#[derive(Debug, Clone)]
pub(crate) struct IndexFiles {
    base: PathBuf,
}

impl IndexFiles {
    pub(crate) fn new(store_path: &Path, field: &str) -> Self {
        Self {
            base: sidecar_path(store_path, field),
        }
    }

    /// Files nested under this index, e.g. the overflow layer.
    pub(crate) fn child(&self, name: &str) -> Self {
        Self {
            base: sidecar_path(&self.base, name),
        }
    }

    pub(crate) fn path(&self, suffix: &str) -> PathBuf {
        sidecar_path(&self.base, suffix)
    }

    pub(crate) fn lookup(&self) -> PathBuf {
        self.path("lookup")
    }

    pub(crate) fn meta(&self) -> PathBuf {
        self.path("meta")
    }

    pub(crate) fn updated(&self) -> PathBuf {
        self.path("updatedPositions")
    }

    /// Removes every file of this index, nested layers included.
    ///
    /// Only names this index writes are touched, so stores sharing the
    /// path prefix are left alone.
    pub(crate) fn remove_all(&self) -> Result<(), DumpError> {
        for layer in [self.clone(), self.child("overflow")] {
            for suffix in LAYER_FILES {
                remove_file_if_exists(&layer.path(suffix))?;
            }
        }
        for name in KEY_DUMPS {
            remove_store_files(&self.path(name))?;
        }
        let sort = self.path("sort");
        let mut n = 0;
        while remove_file_if_exists(&sidecar_path(&sort, &n.to_string()))? {
            n += 1;
        }
        trace!(index = %self.base.display(), "index files removed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Meta
    // --------------------------------------------------------------------------------------------

    /// Reads the meta file. A missing or unreadable file is `None`.
    pub(crate) fn read_meta(&self) -> Result<Option<IndexMeta>, DumpError> {
        let path = self.meta();
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).io_context(&path, "read index meta"),
        };
        match IndexMeta::decode_checked(&bytes) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "ignoring unreadable index meta");
                Ok(None)
            }
        }
    }

    pub(crate) fn write_meta(&self, meta: &IndexMeta) -> Result<(), DumpError> {
        let path = self.meta();
        let bytes = meta.encode_checked()?;
        let tmp = self.path("meta.tmp");
        {
            let mut f = File::create(&tmp).io_context(&tmp, "create index meta")?;
            f.write_all(&bytes).io_context(&tmp, "write index meta")?;
            f.sync_data().io_context(&tmp, "sync index meta")?;
        }
        fs::rename(&tmp, &path).io_context(&path, "rename index meta")?;
        debug!(file = %path.display(), sequence = meta.sequence, "index meta written");
        Ok(())
    }

    pub(crate) fn remove_meta(&self) -> Result<(), DumpError> {
        remove_file_if_exists(&self.meta()).map(|_| ())
    }
}

// ------------------------------------------------------------------------------------------------
// IndexMeta
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexMeta {
    pub(crate) sequence: u64,
    pub(crate) type_name: String,
    pub(crate) kind: String,
}

impl IndexMeta {
    fn encode_checked(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(32);
        self.sequence.encode_to(&mut buf)?;
        self.type_name.encode_to(&mut buf)?;
        self.kind.encode_to(&mut buf)?;
        let crc = crc32fast::hash(&buf);
        crc.encode_to(&mut buf)?;
        Ok(buf)
    }

    fn decode_checked(bytes: &[u8]) -> Result<Self, EncodingError> {
        if bytes.len() < 4 {
            return Err(EncodingError::UnexpectedEof {
                needed: 4,
                available: bytes.len(),
            });
        }
        let (body, tail) = bytes.split_at(bytes.len() - 4);
        let (stored, _) = u32::decode_from(tail)?;
        if stored != crc32fast::hash(body) {
            return Err(EncodingError::Custom("index meta checksum mismatch".into()));
        }
        let mut r = SliceReader::new(body);
        let sequence = r.read::<u64>()?;
        let type_name = r.read::<String>()?;
        let kind = r.read::<String>()?;
        Ok(Self {
            sequence,
            type_name,
            kind,
        })
    }

    /// `true` if the index files match the store at `sequence`.
    pub(crate) fn matches(&self, sequence: u64, type_name: &str, kind: &str) -> bool {
        self.sequence == sequence && self.type_name == type_name && self.kind == kind
    }
}

// ------------------------------------------------------------------------------------------------
// Lookup file
// ------------------------------------------------------------------------------------------------

fn encode_entry(kind: KeyKind, key: &IndexKey, pos: u64, buf: &mut Vec<u8>) -> Result<(), DumpError> {
    match (kind, key) {
        (KeyKind::Int, IndexKey::Int(k)) => k.encode_to(buf)?,
        (KeyKind::Long, IndexKey::Long(k)) => k.encode_to(buf)?,
        (KeyKind::Str, IndexKey::Str(s)) => s.encode_to(buf)?,
        (KeyKind::Bean | KeyKind::Object, IndexKey::Object(b)) => b.encode_to(buf)?,
        (kind, key) => {
            return Err(DumpError::Internal(format!(
                "key {key} written to a {kind:?} lookup file"
            )));
        }
    }
    (pos as i64).encode_to(buf)?;
    Ok(())
}

fn decode_entry(kind: KeyKind, r: &mut SliceReader<'_>) -> Result<(IndexKey, u64), EncodingError> {
    let key = match kind {
        KeyKind::Int => IndexKey::Int(r.read::<i32>()?),
        KeyKind::Long => IndexKey::Long(r.read::<i64>()?),
        KeyKind::Str => IndexKey::Str(r.read::<String>()?),
        KeyKind::Bean | KeyKind::Object => IndexKey::Object(r.read::<Vec<u8>>()?),
    };
    let pos = r.read::<i64>()?;
    if pos < 0 {
        return Err(EncodingError::Custom(format!("negative position {pos}")));
    }
    Ok((key, pos as u64))
}

/// Append handle on `P.<f>.lookup`.
#[derive(Debug)]
pub(crate) struct LookupWriter {
    path: PathBuf,
    kind: KeyKind,
    writer: BufWriter<File>,
    scratch: Vec<u8>,
}

impl LookupWriter {
    /// Opens for append, truncating first when `truncate` is set.
    pub(crate) fn open(path: PathBuf, kind: KeyKind, truncate: bool) -> Result<Self, DumpError> {
        let mut opts = OpenOptions::new();
        opts.create(true);
        if truncate {
            opts.write(true).truncate(true);
        } else {
            opts.append(true);
        }
        let file = opts.open(&path).io_context(&path, "open lookup")?;
        Ok(Self {
            path,
            kind,
            writer: BufWriter::new(file),
            scratch: Vec::with_capacity(32),
        })
    }

    pub(crate) fn append(&mut self, key: &IndexKey, pos: u64) -> Result<(), DumpError> {
        self.scratch.clear();
        encode_entry(self.kind, key, pos, &mut self.scratch)?;
        self.writer
            .write_all(&self.scratch)
            .io_context(&self.path, "append lookup")
    }

    /// Empties the file.
    pub(crate) fn truncate(&mut self) -> Result<(), DumpError> {
        self.writer.flush().io_context(&self.path, "flush lookup")?;
        self.writer
            .get_ref()
            .set_len(0)
            .io_context(&self.path, "truncate lookup")?;
        self.writer
            .get_mut()
            .seek(SeekFrom::Start(0))
            .io_context(&self.path, "rewind lookup")?;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), DumpError> {
        self.writer.flush().io_context(&self.path, "flush lookup")?;
        self.writer
            .get_ref()
            .sync_data()
            .io_context(&self.path, "sync lookup")
    }
}

/// Replays `P.<f>.lookup` in file order.
///
/// A fixed-width file whose size is not a multiple of the entry width, or
/// a truncated variable-width entry, is corruption.
pub(crate) fn replay_lookup(
    path: &Path,
    kind: KeyKind,
    mut f: impl FnMut(IndexKey, u64) -> Result<(), DumpError>,
) -> Result<usize, DumpError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).io_context(path, "read lookup"),
    };

    let width = match kind {
        KeyKind::Int => Some(12),
        KeyKind::Long => Some(16),
        _ => None,
    };
    if let Some(width) = width {
        if bytes.len() % width != 0 {
            return Err(DumpError::corruption(
                path,
                format!("size {} is not a multiple of {width}", bytes.len()),
            ));
        }
    }

    let mut r = SliceReader::new(&bytes);
    let mut count = 0;
    while r.remaining() > 0 {
        let at = r.offset();
        let (key, pos) = decode_entry(kind, &mut r)
            .map_err(|e| DumpError::corruption(path, format!("entry at offset {at}: {e}")))?;
        f(key, pos)?;
        count += 1;
    }
    Ok(count)
}

// ------------------------------------------------------------------------------------------------
// Updated positions
// ------------------------------------------------------------------------------------------------

/// Append handle on `P.<f>.updatedPositions`.
#[derive(Debug)]
pub(crate) struct UpdatedLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl UpdatedLog {
    pub(crate) fn open(path: PathBuf, truncate: bool) -> Result<Self, DumpError> {
        let mut opts = OpenOptions::new();
        opts.create(true);
        if truncate {
            opts.write(true).truncate(true);
        } else {
            opts.append(true);
        }
        let file = opts.open(&path).io_context(&path, "open updated positions")?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub(crate) fn append(&mut self, pos: u64) -> Result<(), DumpError> {
        self.writer
            .write_all(&pos.to_be_bytes())
            .io_context(&self.path, "append updated position")
    }

    pub(crate) fn truncate(&mut self) -> Result<(), DumpError> {
        self.writer.flush().io_context(&self.path, "flush updated positions")?;
        self.writer
            .get_ref()
            .set_len(0)
            .io_context(&self.path, "truncate updated positions")?;
        self.writer
            .get_mut()
            .seek(SeekFrom::Start(0))
            .io_context(&self.path, "rewind updated positions")?;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), DumpError> {
        self.writer.flush().io_context(&self.path, "flush updated positions")?;
        self.writer
            .get_ref()
            .sync_data()
            .io_context(&self.path, "sync updated positions")
    }
}

/// Skip counts per position from `P.<f>.updatedPositions`.
pub(crate) fn read_updated(path: &Path) -> Result<HashMap<u64, u32>, DumpError> {
    let mut bytes = Vec::new();
    match File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut bytes)
                .io_context(path, "read updated positions")?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e).io_context(path, "open updated positions"),
    }
    if bytes.len() % 8 != 0 {
        return Err(DumpError::corruption(
            path,
            format!("size {} is not a multiple of 8", bytes.len()),
        ));
    }
    let mut skips = HashMap::new();
    for chunk in bytes.chunks_exact(8) {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(chunk);
        *skips.entry(u64::from_be_bytes(arr)).or_insert(0) += 1;
    }
    Ok(skips)
}
