//! The deletions log `P.deletions`.
//!
//! An append-only array of 8-byte big-endian positions, one per tombstone,
//! in tombstone order. Replayed into memory at open.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::{DumpError, IoContext};

const ENTRY_LEN: usize = 8;

#[derive(Debug)]
pub(crate) struct Deletions {
    path: PathBuf,
    /// `None` when the store is read-only.
    file: Option<File>,
    positions: HashSet<u64>,
    sync: bool,
}

impl Deletions {
    /// Opens the log and replays it.
    ///
    /// Every position must lie inside `[0, data_len)`.
    pub(crate) fn open(
        path: PathBuf,
        data_len: u64,
        writable: bool,
        sync: bool,
    ) -> Result<Self, DumpError> {
        let mut raw = Vec::new();
        match File::open(&path) {
            Ok(mut f) => {
                f.read_to_end(&mut raw).io_context(&path, "read deletions")?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).io_context(&path, "open deletions"),
        }

        if raw.len() % ENTRY_LEN != 0 {
            return Err(DumpError::corruption(
                &path,
                format!("size {} is not a multiple of {ENTRY_LEN}", raw.len()),
            ));
        }

        let mut positions = HashSet::with_capacity(raw.len() / ENTRY_LEN);
        for chunk in raw.chunks_exact(ENTRY_LEN) {
            let mut bytes = [0u8; ENTRY_LEN];
            bytes.copy_from_slice(chunk);
            let pos = u64::from_be_bytes(bytes);
            if pos >= data_len {
                return Err(DumpError::corruption(
                    &path,
                    format!("position {pos} outside data file of length {data_len}"),
                ));
            }
            positions.insert(pos);
        }

        let file = if writable {
            Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .io_context(&path, "open deletions")?,
            )
        } else {
            None
        };

        debug!(path = %path.display(), tombstones = positions.len(), "deletions replayed");
        Ok(Self {
            path,
            file,
            positions,
            sync,
        })
    }

    #[inline]
    pub(crate) fn contains(&self, pos: u64) -> bool {
        self.positions.contains(&pos)
    }

    pub(crate) fn len(&self) -> usize {
        self.positions.len()
    }

    /// Records a tombstone durably (when `sync` is set) before returning.
    pub(crate) fn add(&mut self, pos: u64) -> Result<(), DumpError> {
        let file = self
            .file
            .as_mut()
            .ok_or(DumpError::AccessDenied("deletions log is read-only"))?;
        file.write_all(&pos.to_be_bytes())
            .io_context(&self.path, "append deletion")?;
        if self.sync {
            file.sync_data().io_context(&self.path, "sync deletions")?;
        }
        self.positions.insert(pos);
        trace!(pos, "tombstone recorded");
        Ok(())
    }

    /// Drops every tombstone, on disk and in memory.
    pub(crate) fn clear(&mut self) -> Result<(), DumpError> {
        if let Some(file) = self.file.as_mut() {
            file.set_len(0).io_context(&self.path, "truncate deletions")?;
            file.sync_all().io_context(&self.path, "sync deletions")?;
        }
        self.positions.clear();
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), DumpError> {
        if let Some(file) = self.file.as_mut() {
            file.sync_data().io_context(&self.path, "sync deletions")?;
        }
        Ok(())
    }
}
