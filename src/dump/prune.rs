//! Open-time rewrite of the data file without tombstoned records.
//!
//! A prune runs in two phases so a crash at any point leaves a store that
//! the next writable open can finish:
//!
//! 1. Live records are copied to `P.prune.tmp`, which is synced and
//!    renamed to `P.prune`. From here on `P.prune` is a complete
//!    compacted copy.
//! 2. Index metas are removed, the deletions log is truncated, and
//!    `P.prune` is renamed over `P`.
//!
//! The deletions log is only truncated while `P.prune` exists, so at open
//! a leftover `P.prune` means phase 2 must be replayed.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use super::deletions::Deletions;
use super::inner::{ReadWindow, read_entry};
use super::sidecar_path;
use crate::error::{DumpError, IoContext};

/// Copies every live record of `path` into a compacted file and swaps it
/// in. `index_fields` names the fields whose `P.<f>.meta` must go so
/// attached indexes rebuild. Returns the new data length.
pub(crate) fn prune(
    path: &Path,
    data_len: u64,
    deletions: &mut Deletions,
    read_buffer_size: usize,
    index_fields: &[&str],
) -> Result<u64, DumpError> {
    info!(path = %path.display(), tombstones = deletions.len(), "pruning dump");

    let tmp_path = sidecar_path(path, "prune.tmp");
    let source = File::open(path).io_context(path, "open for prune")?;
    let target = File::create(&tmp_path).io_context(&tmp_path, "create")?;
    let mut writer = BufWriter::new(target);
    let mut window = ReadWindow::default();

    let mut pos = 0;
    let mut kept: u64 = 0;
    let mut dropped: u64 = 0;
    while pos < data_len {
        let entry = read_entry(&source, path, data_len, &mut window, read_buffer_size, pos)?;
        if deletions.contains(pos) {
            dropped += 1;
        } else {
            writer
                .write_all(&entry.bytes)
                .io_context(&tmp_path, "write")?;
            kept += 1;
        }
        pos = entry.next_position;
    }

    let target = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .io_context(&tmp_path, "flush")?;
    target.sync_all().io_context(&tmp_path, "sync")?;
    drop(source);

    let ready = sidecar_path(path, "prune");
    fs::rename(&tmp_path, &ready).io_context(&ready, "rename compacted file")?;
    fsync_parent(path)?;

    let new_len = swap_in(path, deletions, index_fields)?;
    info!(path = %path.display(), kept, dropped, len = new_len, "dump pruned");
    Ok(new_len)
}

/// Finishes a prune interrupted by a crash. Returns the new data length
/// if one was pending, `None` otherwise.
pub(crate) fn resume(
    path: &Path,
    deletions: &mut Deletions,
    index_fields: &[&str],
) -> Result<Option<u64>, DumpError> {
    let tmp_path = sidecar_path(path, "prune.tmp");
    if remove_if_exists(&tmp_path)? {
        warn!(file = %tmp_path.display(), "discarded partial prune output");
    }
    if !pending(path) {
        return Ok(None);
    }
    warn!(path = %path.display(), "finishing interrupted prune");
    swap_in(path, deletions, index_fields).map(Some)
}

/// `true` if a compacted copy is waiting to replace the data file.
pub(crate) fn pending(path: &Path) -> bool {
    sidecar_path(path, "prune").exists()
}

/// Phase 2: index metas, then deletions, then the rename.
fn swap_in(
    path: &Path,
    deletions: &mut Deletions,
    index_fields: &[&str],
) -> Result<u64, DumpError> {
    remove_index_metas(path, index_fields)?;
    deletions.clear()?;
    let ready = sidecar_path(path, "prune");
    fs::rename(&ready, path).io_context(path, "rename pruned file")?;
    fsync_parent(path)?;
    Ok(fs::metadata(path).io_context(path, "stat")?.len())
}

/// Removes `P.<f>.meta` for every field in `index_fields`.
fn remove_index_metas(path: &Path, index_fields: &[&str]) -> Result<(), DumpError> {
    for field in index_fields {
        let meta = sidecar_path(&sidecar_path(path, field), "meta");
        if remove_if_exists(&meta)? {
            debug!(file = %meta.display(), "index meta removed for prune");
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool, DumpError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).io_context(path, "remove"),
    }
}

fn fsync_parent(path: &Path) -> Result<(), DumpError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(dir)
        .and_then(|d| d.sync_all())
        .io_context(dir, "sync directory")
}
