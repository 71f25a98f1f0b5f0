//! Index attach, checkpoint and rebuild tests.
//!
//! Coverage:
//! - a rebuilt index equals the one it replaces
//! - a checkpoint survives a crash when nothing changed after it
//! - changes after a checkpoint force a rebuild after a crash
//! - pruning the store forces a rebuild
//! - an index kind change forces a rebuild
//! - closing the store closes its indexes
//! - a truncated meta file is ignored and the index rebuilds
//! - a rebuild leaves a store named like an index file alone

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::codec::tests::fixtures::Person;
    use crate::dump::{Dump, DumpConfig};
    use crate::dump::tests::helpers::*;
    use crate::error::DumpError;
    use crate::index::files::IndexFiles;
    use crate::index::tests::helpers::*;
    use crate::index::{DumpIndex, GroupIndex, IndexKey, InfiniteGroupIndex, UniqueIndex};

    /// Positions per key of a group index on `category`.
    fn snapshot(index: &GroupIndex<Person>) -> Vec<(IndexKey, Vec<u64>)> {
        index
            .keys()
            .unwrap()
            .into_iter()
            .map(|k| {
                let positions = index.positions(&k).unwrap();
                (k, positions)
            })
            .collect()
    }

    /// # Scenario
    /// Losing the index files only costs a rebuild.
    ///
    /// # Starting environment
    /// Store with 12 records, some deleted and one re-keyed in place, and
    /// a group index on `category`.
    ///
    /// # Actions
    /// 1. Close, delete the lookup and meta files.
    /// 2. Reopen and reattach.
    ///
    /// # Expected behavior
    /// The rebuilt index maps every key to the same positions.
    #[test]
    fn lifecycle__rebuild_matches_original() {
        let tmp = TempDir::new().unwrap();
        let before = {
            let dump = open_store(&tmp);
            let by_category = GroupIndex::open(&dump, "category").unwrap();
            let positions = add_all(&dump, &people(12));
            dump.delete(positions[3]).unwrap();
            dump.delete(positions[8]).unwrap();
            dump.update(positions[0], &Person::new(0, "person-0", "c")).unwrap();
            let before = snapshot(&by_category);
            dump.close().unwrap();
            before
        };
        fs::remove_file(index_file(&tmp, "category", "lookup")).unwrap();
        fs::remove_file(index_file(&tmp, "category", "meta")).unwrap();

        let dump = open_store(&tmp);
        let by_category = GroupIndex::open(&dump, "category").unwrap();

        assert_eq!(snapshot(&by_category), before);
        dump.close().unwrap();
    }

    #[test]
    fn lifecycle__checkpoint_survives_crash() {
        let tmp = TempDir::new().unwrap();
        let positions = {
            let dump = open_store(&tmp);
            let by_id = UniqueIndex::open(&dump, "id").unwrap();
            let positions = add_all(&dump, &people(4));
            dump.flush_meta().unwrap();
            dump.simulate_crash();
            drop(by_id);
            positions
        };
        assert!(index_file(&tmp, "id", "meta").exists());

        let dump = open_store(&tmp);
        let by_id = UniqueIndex::open(&dump, "id").unwrap();

        assert!(!index_file(&tmp, "id", "meta").exists());
        assert_eq!(by_id.position_of_int(2).unwrap(), Some(positions[2]));
        assert_eq!(by_id.len().unwrap(), 4);
        dump.close().unwrap();
    }

    /// # Scenario
    /// Changes after a checkpoint invalidate it.
    ///
    /// # Starting environment
    /// Store with infinite and unique indexes, checkpointed after three
    /// adds.
    ///
    /// # Actions
    /// 1. Add two more records and delete one.
    /// 2. Crash, dropping the index handles.
    /// 3. Reopen and reattach.
    ///
    /// # Expected behavior
    /// The meta files were removed by the first change, so both indexes
    /// rebuild and see every live record.
    #[test]
    fn lifecycle__changes_after_checkpoint_rebuild() {
        let tmp = TempDir::new().unwrap();
        let records = people(5);
        let positions = {
            let dump = open_store(&tmp);
            let by_id = UniqueIndex::open(&dump, "id").unwrap();
            let by_category =
                InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(2)).unwrap();
            let positions = add_all(&dump, &records[..3]);
            dump.flush_meta().unwrap();
            let mut positions = positions;
            positions.extend(add_all(&dump, &records[3..]));
            dump.delete(positions[0]).unwrap();
            assert!(!index_file(&tmp, "id", "meta").exists());
            assert!(!index_file(&tmp, "category", "meta").exists());
            dump.simulate_crash();
            drop(by_id);
            drop(by_category);
            positions
        };

        let dump = open_store(&tmp);
        let by_id = UniqueIndex::open(&dump, "id").unwrap();
        let by_category =
            InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(2)).unwrap();

        assert_eq!(by_id.position_of_int(0).unwrap(), None);
        assert_eq!(by_id.position_of_int(4).unwrap(), Some(positions[4]));
        assert_eq!(by_id.len().unwrap(), 4);
        assert_eq!(ids(&by_category.lookup_str("a").unwrap()), vec![2, 4]);
        assert_eq!(ids(&by_category.lookup_str("b").unwrap()), vec![1, 3]);
        dump.close().unwrap();
    }

    #[test]
    fn lifecycle__prune_forces_rebuild() {
        let tmp = TempDir::new().unwrap();
        {
            let dump = open_store(&tmp);
            let _by_category = GroupIndex::open(&dump, "category").unwrap();
            let positions = add_all(&dump, &people(8));
            for i in [0, 1, 2, 5] {
                dump.delete(positions[i]).unwrap();
            }
            dump.close().unwrap();
        }

        let dump = reopen(
            &tmp,
            DumpConfig {
                prune_threshold: 3,
                ..test_config()
            },
        );
        assert!(!index_file(&tmp, "category", "meta").exists());
        let by_category = GroupIndex::open(&dump, "category").unwrap();

        let live: Vec<(u64, Person)> = dump.iter().unwrap().map(|r| r.unwrap()).collect();
        let a: Vec<u64> = live
            .iter()
            .filter(|(_, p)| p.category.as_deref() == Some("a"))
            .map(|(pos, _)| *pos)
            .collect();
        assert_eq!(by_category.positions(&IndexKey::from("a")).unwrap(), a);
        assert_eq!(ids(&by_category.lookup_str("a").unwrap()), vec![4, 6]);
        assert_eq!(ids(&by_category.lookup_str("b").unwrap()), vec![3, 7]);
        dump.close().unwrap();
    }

    #[test]
    fn lifecycle__kind_change_rebuilds() {
        let tmp = TempDir::new().unwrap();
        {
            let dump = open_store(&tmp);
            let _by_id = GroupIndex::open(&dump, "id").unwrap();
            add_all(&dump, &people(3));
            dump.close().unwrap();
        }

        let dump = open_store(&tmp);
        let by_id = UniqueIndex::open(&dump, "id").unwrap();

        assert_eq!(by_id.lookup_int(1).unwrap().unwrap().id, 1);
        assert_eq!(by_id.len().unwrap(), 3);
        dump.close().unwrap();
    }

    #[test]
    fn lifecycle__store_close_closes_indexes() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let by_id = UniqueIndex::open(&dump, "id").unwrap();
        let by_category = GroupIndex::open(&dump, "category").unwrap();
        add_all(&dump, &people(2));

        dump.close().unwrap();

        assert!(by_id.is_closed());
        assert!(by_category.is_closed());
        assert!(matches!(by_id.lookup_int(0), Err(DumpError::Closed)));
        assert!(matches!(by_category.keys(), Err(DumpError::Closed)));
        by_id.close().unwrap();
    }

    #[test]
    fn lifecycle__short_meta_rebuilds() {
        let tmp = TempDir::new().unwrap();
        {
            let dump = open_store(&tmp);
            let _by_id = UniqueIndex::open(&dump, "id").unwrap();
            add_all(&dump, &people(4));
            dump.close().unwrap();
        }
        fs::write(index_file(&tmp, "id", "meta"), [0u8, 1, 2]).unwrap();

        let files = IndexFiles::new(&store_path(&tmp), "id");
        assert!(files.read_meta().unwrap().is_none());

        let dump = open_store(&tmp);
        let by_id = UniqueIndex::open(&dump, "id").unwrap();
        assert_eq!(by_id.len().unwrap(), 4);
        assert_eq!(by_id.lookup_int(3).unwrap().unwrap().id, 3);
        dump.close().unwrap();
    }

    /// # Scenario
    /// Another store lives at a path that starts with an index's prefix.
    ///
    /// # Starting environment
    /// Store `P.id.backup` with 2 records, next to store `P` with 3.
    ///
    /// # Actions
    /// 1. Attach a unique index on `id` to `P` for the first time, which
    ///    clears the index files before building.
    ///
    /// # Expected behavior
    /// `P.id.backup` and its sidecars survive with both records.
    #[test]
    fn lifecycle__rebuild_leaves_neighbour_store() {
        let tmp = TempDir::new().unwrap();
        let neighbour = index_file(&tmp, "id", "backup");
        {
            let other: Dump<Person> = Dump::open(&neighbour, test_config()).unwrap();
            add_all(&other, &people(2));
            other.close().unwrap();
        }

        let dump = open_store(&tmp);
        add_all(&dump, &people(3));
        let by_id = UniqueIndex::open(&dump, "id").unwrap();
        assert_eq!(by_id.len().unwrap(), 3);
        dump.close().unwrap();

        assert!(neighbour.exists());
        assert!(index_file(&tmp, "id", "backup.meta").exists());
        let other: Dump<Person> = Dump::open(&neighbour, test_config()).unwrap();
        assert_eq!(other.iter().unwrap().count(), 2);
        other.close().unwrap();
    }
}
