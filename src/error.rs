//! Crate-level error taxonomy.
//!
//! Every public operation returns [`DumpError`]. Lower layers keep their
//! own error enums ([`EncodingError`], [`SortError`]) and are rolled up
//! here through `#[from]`, the same way each subsystem error rolls up into
//! the next layer.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::sort::SortError;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Dump`](crate::Dump) and its indexes.
#[derive(Debug, Error)]
pub enum DumpError {
    /// The operation needs a capability that was not granted at open time.
    #[error("access denied: {0}")]
    AccessDenied(&'static str),

    /// A unique index already holds a live record with this key.
    #[error("duplicate key {key} in unique index on `{field}`")]
    DuplicateKey {
        /// Indexed field name.
        field: String,
        /// Rendered key.
        key: String,
    },

    /// A grouped index saw a key again after its run was closed.
    #[error("key {key} on `{field}` is not consecutive with its earlier run")]
    NonConsecutiveKey {
        /// Indexed field name.
        field: String,
        /// Rendered key.
        key: String,
    },

    /// An on-disk file failed validation.
    #[error("corrupt file {}: {detail}", path.display())]
    Corruption {
        /// The offending file.
        path: PathBuf,
        /// What was wrong with it.
        detail: String,
    },

    /// Filesystem I/O failed.
    #[error("I/O error during {op} on {}: {source}", path.display())]
    Io {
        /// File the operation targeted.
        path: PathBuf,
        /// Operation that failed, e.g. `"append"` or `"read at 42"`.
        op: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A record could not be decoded.
    #[error("failed to decode {type_name} at position {pos}: {source}")]
    Decode {
        /// Record type being decoded.
        type_name: &'static str,
        /// Position of the record in the data file.
        pos: u64,
        /// Underlying decode failure.
        #[source]
        source: EncodingError,
    },

    /// Encoding or decoding of auxiliary data failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// External sort failed.
    #[error("sort error: {0}")]
    Sort(#[from] SortError),

    /// Another store in this process already has the path open.
    #[error("{} is already open in this process", .0.display())]
    AlreadyOpen(PathBuf),

    /// The store or index has been closed.
    #[error("closed")]
    Closed,

    /// The position does not hold a live record.
    #[error("no live record at position {0}")]
    NoSuchRecord(u64),

    /// Caller-supplied argument is not valid for this index or store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

impl DumpError {
    pub(crate) fn corruption(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        DumpError::Corruption {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        DumpError::Internal(format!("{what} lock poisoned"))
    }
}

// ------------------------------------------------------------------------------------------------
// I/O context
// ------------------------------------------------------------------------------------------------

/// Attaches a path and an operation name to an I/O result.
pub(crate) trait IoContext<T> {
    fn io_context(self, path: &Path, op: impl Into<String>) -> Result<T, DumpError>;
}

impl<T> IoContext<T> for io::Result<T> {
    #[inline]
    fn io_context(self, path: &Path, op: impl Into<String>) -> Result<T, DumpError> {
        self.map_err(|source| DumpError::Io {
            path: path.to_path_buf(),
            op: op.into(),
            source,
        })
    }
}
