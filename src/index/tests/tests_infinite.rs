//! Infinite group index tests.
//!
//! Coverage:
//! - overflow merges keep lookups identical, with hashed string keys
//! - deletes and in-place key changes on both layers
//! - the lookup cache follows adds
//! - reopen loads the disk layer, a missing meta rebuilds it
//! - integer keys use no key dump
//! - string keys sharing a CRC32 stay apart across merges and reopen
//! - merges drop key dump entries of deleted records
//! - configuration validation

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use crate::codec::tests::fixtures::Person;
    use crate::dump::tests::helpers::*;
    use crate::error::DumpError;
    use crate::index::tests::helpers::*;
    use crate::index::{DumpIndex, IndexKey, InfiniteGroupIndex, InfiniteIndexConfig};

    const COLORS: [&str; 3] = ["red", "green", "blue"];

    fn colored(n: i32) -> Vec<Person> {
        (0..n)
            .map(|i| Person::new(i, &format!("person-{i}"), COLORS[i as usize % 3]))
            .collect()
    }

    /// Expected positions per category, ascending.
    fn expected(records: &[Person], positions: &[u64]) -> BTreeMap<String, Vec<u64>> {
        let mut map: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for (p, pos) in records.iter().zip(positions) {
            map.entry(p.category.clone().unwrap()).or_default().push(*pos);
        }
        map
    }

    fn assert_positions(
        index: &InfiniteGroupIndex<Person>,
        expected: &BTreeMap<String, Vec<u64>>,
    ) {
        for (category, positions) in expected {
            assert_eq!(
                &index.positions(&IndexKey::from(category.as_str())).unwrap(),
                positions,
                "category {category}"
            );
        }
    }

    /// # Scenario
    /// Lookups do not change when the overflow layer is merged.
    ///
    /// # Starting environment
    /// Infinite index on `category` merging every 4 entries.
    ///
    /// # Actions
    /// 1. Add 30 records over three categories.
    /// 2. Merge explicitly.
    ///
    /// # Expected behavior
    /// Before and after the merge, every category resolves to exactly its
    /// records. After the merge the overflow layer is empty.
    #[test]
    fn infinite__merge_keeps_lookups() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let by_color =
            InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(4)).unwrap();
        let records = colored(30);
        let positions = add_all(&dump, &records);
        let want = expected(&records, &positions);

        assert!(by_color.overflow_len().unwrap() < 4);
        assert!(by_color.disk_len().unwrap() > 0);
        assert_positions(&by_color, &want);

        by_color.merge().unwrap();

        assert_eq!(by_color.overflow_len().unwrap(), 0);
        assert_eq!(by_color.disk_len().unwrap(), 30);
        assert_positions(&by_color, &want);
        assert_eq!(
            ids(&by_color.lookup_str("green").unwrap()),
            (1..30).step_by(3).collect::<Vec<_>>()
        );
        assert!(by_color.lookup_str("purple").unwrap().is_empty());
        assert!(!by_color.contains(&IndexKey::from("purple")).unwrap());
        dump.close().unwrap();
    }

    #[test]
    fn infinite__delete_on_both_layers() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let by_color =
            InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(4)).unwrap();
        let positions = add_all(&dump, &categorized(&["x"; 6]));
        // The fourth add merged; the last two wait in the overflow.
        assert_eq!(by_color.disk_len().unwrap(), 4);
        assert_eq!(by_color.overflow_len().unwrap(), 2);

        dump.delete(positions[1]).unwrap();
        dump.delete(positions[5]).unwrap();

        assert_eq!(
            by_color.positions(&IndexKey::from("x")).unwrap(),
            vec![positions[0], positions[2], positions[3], positions[4]]
        );
        assert_eq!(by_color.disk_len().unwrap(), 3);
        assert_eq!(by_color.overflow_len().unwrap(), 1);
        assert_eq!(
            by_color.all_positions().unwrap(),
            vec![positions[0], positions[2], positions[3], positions[4]]
        );
        dump.close().unwrap();
    }

    /// # Scenario
    /// In-place key changes of records on either layer.
    ///
    /// # Starting environment
    /// Six records in category `x`, four merged to disk.
    ///
    /// # Actions
    /// 1. Move a disk record and an overflow record to category `y`.
    /// 2. Close and reopen.
    ///
    /// # Expected behavior
    /// `y` holds both positions and `x` the other four, before and after
    /// the reopen.
    #[test]
    fn infinite__key_change_on_both_layers() {
        let tmp = TempDir::new().unwrap();
        let positions = {
            let dump = open_store(&tmp);
            let by_color =
                InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(4)).unwrap();
            let positions = add_all(&dump, &categorized(&["x"; 6]));

            dump.update(positions[0], &Person::new(0, "person-0", "y")).unwrap();
            dump.update(positions[5], &Person::new(5, "person-5", "y")).unwrap();

            assert_eq!(
                by_color.positions(&IndexKey::from("y")).unwrap(),
                vec![positions[0], positions[5]]
            );
            assert_eq!(
                by_color.positions(&IndexKey::from("x")).unwrap(),
                positions[1..5].to_vec()
            );
            dump.close().unwrap();
            positions
        };

        let dump = open_store(&tmp);
        let by_color =
            InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(4)).unwrap();
        assert_eq!(ids(&by_color.lookup_str("y").unwrap()), vec![0, 5]);
        assert_eq!(
            by_color.positions(&IndexKey::from("x")).unwrap(),
            positions[1..5].to_vec()
        );
        dump.close().unwrap();
    }

    #[test]
    fn infinite__cache_follows_adds() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let by_color =
            InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(100)).unwrap();
        add_all(&dump, &categorized(&["red", "blue"]));

        assert_eq!(ids(&by_color.lookup_str("red").unwrap()), vec![0]);
        dump.add(&Person::new(7, "person-7", "red")).unwrap();

        assert_eq!(ids(&by_color.lookup_str("red").unwrap()), vec![0, 7]);
        dump.close().unwrap();
    }

    #[test]
    fn infinite__reopen_loads_disk_layer() {
        let tmp = TempDir::new().unwrap();
        let records = colored(10);
        let want = {
            let dump = open_store(&tmp);
            let _by_color =
                InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(4)).unwrap();
            let positions = add_all(&dump, &records);
            dump.close().unwrap();
            expected(&records, &positions)
        };
        assert!(index_file(&tmp, "category", "meta").exists());

        let dump = open_store(&tmp);
        let by_color =
            InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(4)).unwrap();

        assert!(!index_file(&tmp, "category", "meta").exists());
        assert_eq!(by_color.disk_len().unwrap() + by_color.overflow_len().unwrap(), 10);
        assert_positions(&by_color, &want);
        dump.close().unwrap();
    }

    #[test]
    fn infinite__missing_meta_rebuilds() {
        let tmp = TempDir::new().unwrap();
        let records = colored(9);
        let want = {
            let dump = open_store(&tmp);
            let _by_color =
                InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(4)).unwrap();
            let positions = add_all(&dump, &records);
            dump.delete(positions[4]).unwrap();
            dump.close().unwrap();
            let mut want = expected(&records, &positions);
            want.values_mut().for_each(|v| v.retain(|p| *p != positions[4]));
            want
        };
        std::fs::remove_file(index_file(&tmp, "category", "meta")).unwrap();

        let dump = open_store(&tmp);
        let by_color =
            InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(4)).unwrap();

        assert_eq!(by_color.overflow_len().unwrap(), 0);
        assert_eq!(by_color.disk_len().unwrap(), 8);
        assert_positions(&by_color, &want);
        dump.close().unwrap();
    }

    #[test]
    fn infinite__int_keys_need_no_key_dump() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let by_id = InfiniteGroupIndex::open_with_config(&dump, "id", small_infinite(3)).unwrap();
        let records = people(10);
        add_all(&dump, &records);

        for i in 0..10 {
            assert_eq!(by_id.lookup_int(i).unwrap(), vec![records[i as usize].clone()]);
        }
        assert!(by_id.lookup_int(10).unwrap().is_empty());
        assert!(!index_file(&tmp, "id", "keys").exists());
        assert_eq!(
            by_id.bulk_iter(2).unwrap().map(|r| r.unwrap().1.id).collect::<Vec<_>>(),
            (0..10).collect::<Vec<_>>()
        );
        dump.close().unwrap();
    }

    /// # Scenario
    /// Two categories whose identity bytes share a CRC32 land on the same
    /// disk key.
    ///
    /// # Starting environment
    /// Infinite index on `category` merging every 2 entries.
    ///
    /// # Actions
    /// 1. Add `plumless`, `buckeroo`, `plumless`, `buckeroo`, `plumless`
    ///    (two merges, the last record stays in the overflow layer).
    /// 2. Merge explicitly, then reopen.
    ///
    /// # Expected behavior
    /// At every step each category returns only its own records.
    #[test]
    fn infinite__hash_collision_keeps_keys_apart() {
        let tmp = TempDir::new().unwrap();
        let left = IndexKey::from("plumless");
        let right = IndexKey::from("buckeroo");
        assert_eq!(
            crc32fast::hash(&left.to_bytes()),
            crc32fast::hash(&right.to_bytes())
        );
        let records = categorized(&["plumless", "buckeroo", "plumless", "buckeroo", "plumless"]);
        let check = |index: &InfiniteGroupIndex<Person>| {
            assert_eq!(ids(&index.lookup_str("plumless").unwrap()), vec![0, 2, 4]);
            assert_eq!(ids(&index.lookup_str("buckeroo").unwrap()), vec![1, 3]);
        };

        {
            let dump = open_store(&tmp);
            let by_category =
                InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(2))
                    .unwrap();
            add_all(&dump, &records);
            assert_eq!(by_category.disk_len().unwrap(), 4);
            assert_eq!(by_category.overflow_len().unwrap(), 1);
            check(&by_category);

            by_category.merge().unwrap();
            assert_eq!(by_category.disk_len().unwrap(), 5);
            check(&by_category);
            dump.close().unwrap();
        }

        let dump = open_store(&tmp);
        let by_category =
            InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(2)).unwrap();
        check(&by_category);
        dump.close().unwrap();
    }

    /// # Scenario
    /// Records are added and deleted in rounds, each round merging.
    ///
    /// # Starting environment
    /// Infinite index on `category` merging every 2 entries.
    ///
    /// # Actions
    /// 1. Ten times: add two records under a fresh category, then delete
    ///    both.
    ///
    /// # Expected behavior
    /// The key dump holds only the last round's entries, so its size after
    /// the first round equals its size after the last.
    #[test]
    fn infinite__merge_compacts_key_dump() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let by_category =
            InfiniteGroupIndex::open_with_config(&dump, "category", small_infinite(2)).unwrap();
        let keys = index_file(&tmp, "category", "keys");

        let mut sizes = Vec::new();
        for round in 0..10 {
            let category = format!("k{round:02}");
            let positions = add_all(&dump, &categorized(&[&category, &category]));
            assert_eq!(by_category.overflow_len().unwrap(), 0);
            for pos in positions {
                dump.delete(pos).unwrap();
            }
            assert!(by_category.lookup_str(&category).unwrap().is_empty());
            sizes.push(std::fs::metadata(&keys).unwrap().len());
        }

        assert!(sizes[0] > 0);
        assert_eq!(sizes.first(), sizes.last());
        assert!(by_category.all_positions().unwrap().is_empty());
        assert!(!index_file(&tmp, "category", "keys.next").exists());
        assert!(!index_file(&tmp, "category", "lookup.remap").exists());
        dump.close().unwrap();
    }

    #[test]
    fn infinite__invalid_config() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);

        let err = InfiniteGroupIndex::open_with_config(
            &dump,
            "category",
            InfiniteIndexConfig {
                overflow_threshold: 0,
                ..InfiniteIndexConfig::default()
            },
        )
        .unwrap_err();

        assert!(matches!(err, DumpError::InvalidConfig(_)));
        dump.close().unwrap();
    }
}
