//! Open-time configuration of a [`Dump`](crate::Dump).

use std::fmt;
use std::ops::BitOr;

use crate::error::DumpError;

// ------------------------------------------------------------------------------------------------
// DumpAccess
// ------------------------------------------------------------------------------------------------

/// Capability flags checked per operation.
///
/// Flags combine with `|`:
///
/// ```rust
/// use beandump::DumpAccess;
///
/// let access = DumpAccess::READ | DumpAccess::ADD | DumpAccess::INDICES;
/// assert!(access.contains(DumpAccess::ADD));
/// assert!(!access.contains(DumpAccess::DELETE));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DumpAccess(u8);

impl DumpAccess {
    /// Append new records.
    pub const ADD: Self = Self(1);
    /// Tombstone records.
    pub const DELETE: Self = Self(1 << 1);
    /// Overwrite a record at its position when the encoded length is unchanged.
    pub const UPDATE_IN_PLACE: Self = Self(1 << 2);
    /// Update by tombstoning and re-appending.
    pub const UPDATE_OUT_OF_PLACE: Self = Self(1 << 3);
    /// Attach indexes.
    pub const INDICES: Self = Self(1 << 4);
    /// Read records.
    pub const READ: Self = Self(1 << 5);
    /// Skip the advisory file lock and the in-process open registry.
    pub const SHARED: Self = Self(1 << 6);

    /// Everything except [`DumpAccess::SHARED`].
    pub const FULL: Self = Self(0b0011_1111);
    /// Reads and index lookups only.
    pub const READ_ONLY: Self = Self(Self::READ.0 | Self::INDICES.0);

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns `true` if every flag of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if `self` and `other` share at least one flag.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// A store that may change the data file.
    pub const fn is_writable(self) -> bool {
        self.intersects(Self(
            Self::ADD.0 | Self::DELETE.0 | Self::UPDATE_IN_PLACE.0 | Self::UPDATE_OUT_OF_PLACE.0,
        ))
    }
}

impl BitOr for DumpAccess {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for DumpAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(DumpAccess, &str); 7] = [
            (DumpAccess::ADD, "ADD"),
            (DumpAccess::DELETE, "DELETE"),
            (DumpAccess::UPDATE_IN_PLACE, "UPDATE_IN_PLACE"),
            (DumpAccess::UPDATE_OUT_OF_PLACE, "UPDATE_OUT_OF_PLACE"),
            (DumpAccess::INDICES, "INDICES"),
            (DumpAccess::READ, "READ"),
            (DumpAccess::SHARED, "SHARED"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

// ------------------------------------------------------------------------------------------------
// DumpConfig
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Dump`](crate::Dump) instance.
///
/// All fields have defaults via [`DumpConfig::default()`]. The
/// configuration is validated when passed to [`Dump::open`](crate::Dump::open).
///
/// # Example
///
/// ```rust
/// use beandump::{DumpAccess, DumpConfig};
///
/// let config = DumpConfig {
///     access: DumpAccess::READ_ONLY,
///     cache_size: 0,
///     ..DumpConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct DumpConfig {
    /// Granted capabilities.
    ///
    /// Default: [`DumpAccess::FULL`].
    pub access: DumpAccess,

    /// Number of records kept in the position cache. `0` disables it.
    ///
    /// Default: 10 000.
    pub cache_size: usize,

    /// Number of tombstones above which the data file is pruned at open.
    ///
    /// Default: 100 000.
    pub prune_threshold: usize,

    /// Minimum size of one positional read.
    ///
    /// Default: 64 KiB. Must be ≥ 64.
    pub read_buffer_size: usize,

    /// Append buffer size.
    ///
    /// Default: 64 KiB. Must be ≥ 64.
    pub write_buffer_size: usize,

    /// `fsync` the deletions log after every delete.
    ///
    /// Default: `true`.
    pub sync_deletions: bool,

    /// The caller closes the store explicitly before process exit, so it
    /// is not registered for the exit hook.
    ///
    /// Default: `false`.
    pub will_be_closed_during_shutdown: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            access: DumpAccess::FULL,
            cache_size: 10_000,
            prune_threshold: 100_000,
            read_buffer_size: 64 * 1024,
            write_buffer_size: 64 * 1024,
            sync_deletions: true,
            will_be_closed_during_shutdown: false,
        }
    }
}

impl DumpConfig {
    /// Validates all configuration parameters.
    pub(crate) fn validate(&self) -> Result<(), DumpError> {
        if self.read_buffer_size < 64 {
            return Err(DumpError::InvalidConfig(
                "read_buffer_size must be >= 64".into(),
            ));
        }
        if self.write_buffer_size < 64 {
            return Err(DumpError::InvalidConfig(
                "write_buffer_size must be >= 64".into(),
            ));
        }
        if self.access == DumpAccess::empty() || self.access == DumpAccess::SHARED {
            return Err(DumpError::InvalidConfig(
                "access must grant at least one capability".into(),
            ));
        }
        Ok(())
    }
}
