//! Single-writer guards: the advisory file lock on `P.meta` and the
//! in-process registry of open data files.

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{DumpError, IoContext};

// ------------------------------------------------------------------------------------------------
// Advisory file lock
// ------------------------------------------------------------------------------------------------

/// Takes an exclusive `flock` on `file`, blocking until it is available.
///
/// The lock is released when the file is closed.
#[cfg(unix)]
pub(crate) fn lock_exclusive(file: &File, path: &Path) -> Result<(), DumpError> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    // SAFETY: `fd` is a valid descriptor owned by `file` for the whole call.
    let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        debug!(path = %path.display(), "file lock acquired");
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.kind() != io::ErrorKind::WouldBlock {
        return Err(err).io_context(path, "lock");
    }

    warn!(path = %path.display(), "file is locked by another process, waiting");
    loop {
        // SAFETY: as above.
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc == 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err).io_context(path, "lock");
        }
    }
    warn!(path = %path.display(), "file lock acquired after waiting");
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn lock_exclusive(_file: &File, path: &Path) -> Result<(), DumpError> {
    debug!(path = %path.display(), "advisory locking unsupported on this platform");
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// In-process registry
// ------------------------------------------------------------------------------------------------

static OPEN_PATHS: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

/// Marks a data file as open in this process until dropped.
#[derive(Debug)]
pub(crate) struct OpenRegistration {
    path: PathBuf,
}

impl OpenRegistration {
    /// Fails with [`DumpError::AlreadyOpen`] if the path is already held.
    ///
    /// `path` must exist so it can be canonicalized.
    pub(crate) fn register(path: &Path) -> Result<Self, DumpError> {
        let canonical = path.canonicalize().io_context(path, "canonicalize")?;
        let mut open = OPEN_PATHS
            .lock()
            .map_err(|_| DumpError::poisoned("open registry"))?;
        if !open.insert(canonical.clone()) {
            return Err(DumpError::AlreadyOpen(path.to_path_buf()));
        }
        Ok(Self { path: canonical })
    }
}

impl Drop for OpenRegistration {
    fn drop(&mut self) {
        if let Ok(mut open) = OPEN_PATHS.lock() {
            open.remove(&self.path);
        }
    }
}
