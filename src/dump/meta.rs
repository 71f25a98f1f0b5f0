//! The store meta file `P.meta`: an 8-byte big-endian sequence counter.
//!
//! The same file is the target of the advisory lock.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::lock::lock_exclusive;
use crate::error::{DumpError, IoContext};

#[derive(Debug)]
pub(crate) struct StoreMeta {
    path: PathBuf,
    /// Open for the lifetime of the store so the lock stays held.
    file: Option<File>,
    sequence: u64,
    writable: bool,
}

impl StoreMeta {
    /// Opens `P.meta`, locking it when `lock` is set, and reads the
    /// persisted sequence (0 for a new store).
    pub(crate) fn open(path: PathBuf, writable: bool, lock: bool) -> Result<Self, DumpError> {
        let file = if writable {
            Some(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)
                    .io_context(&path, "open meta")?,
            )
        } else {
            match File::open(&path) {
                Ok(f) => Some(f),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e).io_context(&path, "open meta"),
            }
        };

        if let (Some(f), true) = (file.as_ref(), lock) {
            lock_exclusive(f, &path)?;
        }

        let sequence = match file.as_ref() {
            Some(f) => read_sequence(f, &path)?,
            None => 0,
        };

        Ok(Self {
            path,
            file,
            sequence,
            writable,
        })
    }

    #[inline]
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub(crate) fn bump(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    pub(crate) fn reset(&mut self) {
        self.sequence = 0;
    }

    /// Persists the current sequence.
    pub(crate) fn flush(&mut self) -> Result<(), DumpError> {
        if !self.writable {
            return Ok(());
        }
        if let Some(f) = self.file.as_ref() {
            f.write_all_at(&self.sequence.to_be_bytes(), 0)
                .io_context(&self.path, "write meta")?;
            f.sync_data().io_context(&self.path, "sync meta")?;
            trace!(sequence = self.sequence, "meta flushed");
        }
        Ok(())
    }
}

fn read_sequence(f: &File, path: &Path) -> Result<u64, DumpError> {
    let len = f.metadata().io_context(path, "stat meta")?.len();
    if len == 0 {
        return Ok(0);
    }
    if len < 8 {
        return Err(DumpError::corruption(path, format!("meta file is {len} bytes")));
    }
    let mut bytes = [0u8; 8];
    f.read_exact_at(&mut bytes, 0).io_context(path, "read meta")?;
    Ok(u64::from_be_bytes(bytes))
}
