//! Secondary indexes over a [`Dump`](crate::Dump).
//!
//! An index is attached to one field of a store and kept in step with it:
//! the store notifies every attached index inside its own critical
//! section on add, delete and update. Four kinds exist:
//!
//! | Kind                   | Key → positions                 | Memory                 |
//! |------------------------|---------------------------------|------------------------|
//! | [`UniqueIndex`]        | one position per key            | every key              |
//! | [`GroupIndex`]         | sorted positions per key        | every key and position |
//! | [`GroupedIndex`]       | one contiguous run per key      | every key              |
//! | [`InfiniteGroupIndex`] | sorted disk layer + overflow    | overflow and caches    |
//!
//! ## Persistence
//!
//! Each index on field `f` of store `P` keeps `P.<f>.lookup` (entries in
//! add order), `P.<f>.updatedPositions` and `P.<f>.meta`. On attach the
//! meta file's `(sequence, type name, index kind)` is compared with the
//! store; a mismatch discards the index files and rebuilds the index by
//! scanning every live record.
//!
//! ## Key types
//!
//! The declared type of the field selects the key path, see [`IndexKey`].
//! Null field values are not indexed.

#[cfg(test)]
mod tests;

mod base;
mod files;
mod group;
mod grouped;
mod infinite;
mod key;
mod unique;

pub use group::GroupIndex;
pub use grouped::GroupedIndex;
pub use infinite::{InfiniteGroupIndex, InfiniteIndexConfig};
pub use key::IndexKey;
pub use unique::UniqueIndex;

use crate::codec::BeanType;
use crate::dump::BulkIter;
use crate::error::DumpError;

// ------------------------------------------------------------------------------------------------
// Public contract
// ------------------------------------------------------------------------------------------------

/// Operations shared by every index kind.
pub trait DumpIndex<B: BeanType> {
    /// Name of the indexed field.
    fn field_name(&self) -> &'static str;

    /// `true` if at least one live record has `key`.
    ///
    /// # Errors
    ///
    /// [`DumpError::InvalidArgument`] if `key` does not match the field's
    /// key type.
    fn contains(&self, key: &IndexKey) -> Result<bool, DumpError>;

    fn contains_int(&self, key: i32) -> Result<bool, DumpError> {
        self.contains(&IndexKey::Int(key))
    }

    fn contains_long(&self, key: i64) -> Result<bool, DumpError> {
        self.contains(&IndexKey::Long(key))
    }

    /// Every live position known to this index, ascending.
    fn all_positions(&self) -> Result<Vec<u64>, DumpError>;

    /// Reads every indexed record in position order with `threads`
    /// decode workers.
    fn bulk_iter(&self, threads: usize) -> Result<BulkIter<B>, DumpError>;

    /// Detaches from the store and persists the index files.
    ///
    /// Calling `close` more than once is harmless. Closing the store
    /// closes its indexes too.
    fn close(&self) -> Result<(), DumpError>;

    fn is_closed(&self) -> bool;
}

// ------------------------------------------------------------------------------------------------
// Store-side contract
// ------------------------------------------------------------------------------------------------

/// How the store notifies an attached index.
///
/// Every call is made with the store lock held, so implementations must
/// not go through the store's public API.
pub(crate) trait IndexListener<B: BeanType>: Send + Sync {
    fn field_name(&self) -> &'static str;

    /// Look-ahead check before an add writes anything.
    fn check_add(&self, bean: &B) -> Result<(), DumpError>;

    /// Look-ahead check before an update writes anything. `in_place` says
    /// whether the record keeps its position.
    fn check_update(&self, pos: u64, old: &B, new: &B, in_place: bool) -> Result<(), DumpError>;

    fn add(&self, bean: &B, pos: u64) -> Result<(), DumpError>;

    fn delete(&self, bean: &B, pos: u64) -> Result<(), DumpError>;

    /// The record at `pos` was overwritten in place.
    fn update(&self, pos: u64, old: &B, new: &B) -> Result<(), DumpError>;

    /// Whether this index can follow `old → new` without the record moving.
    fn is_update_in_place_compatible(&self, old: &B, new: &B) -> bool;

    /// Checkpoint at the store's `sequence`.
    fn flush(&self, sequence: u64) -> Result<(), DumpError>;

    /// The store is closing at `sequence`.
    fn close_with_dump(&self, sequence: u64) -> Result<(), DumpError>;
}
