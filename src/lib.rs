//! # beandump
//!
//! An embeddable, append-mostly record store. Records of one type are
//! encoded with a compact self-describing codec and appended to a single
//! data file; the returned byte offset is the record's permanent address.
//! Deletes are tombstones in a side log, and secondary indexes over any
//! field are kept in step with every mutation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beandump::{BeanType, Dump, DumpConfig, DumpError, GroupIndex};
//!
//! fn demo<B: BeanType>(records: &[B]) -> Result<(), DumpError> {
//!     let dump: Dump<B> = Dump::open("/tmp/records.dump", DumpConfig::default())?;
//!     let by_category = GroupIndex::open(&dump, "category")?;
//!
//!     // Write
//!     let positions = records
//!         .iter()
//!         .map(|r| dump.add(r))
//!         .collect::<Result<Vec<_>, _>>()?;
//!
//!     // Read
//!     let first = dump.get(positions[0])?;
//!     let books = by_category.lookup_str("books")?;
//!
//!     // Delete
//!     dump.delete(positions[0])?;
//!
//!     // Scan
//!     for item in dump.iter()? {
//!         let (pos, record) = item?;
//!         println!("{pos}: {record:?}");
//!     }
//!
//!     // Graceful shutdown: closes the index too
//!     dump.close()?;
//!     # let _ = (first, books);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Schema-evolving codec**: readers skip fields they no longer declare.
//! - **Stable positions**: a record keeps its offset until the store is pruned.
//! - **Tombstone deletes**: replayed at open, compacted away past a threshold.
//! - **In-place updates**: same-length records are overwritten where they lie.
//! - **Four index kinds**: unique, group, grouped runs and disk-backed.
//! - **Parallel bulk reads**: ordered results with multi-threaded decoding.
//! - **External sort**: bounded-memory merge sort used by the disk index.

pub mod codec;
pub mod dump;
pub mod encoding;
pub mod error;
pub mod index;
pub mod shutdown;
pub mod sort;

pub use codec::{Bean, BeanFactory, BeanType, FieldDef, FieldType, NestedDef, Schema, Value};
pub use dump::{
    BulkIter, BulkReader, Dump, DumpAccess, DumpConfig, DumpIter, MultithreadedDump,
};
pub use error::DumpError;
pub use index::{
    DumpIndex, GroupIndex, GroupedIndex, IndexKey, InfiniteGroupIndex, InfiniteIndexConfig,
    UniqueIndex,
};
pub use shutdown::close_all_open;
