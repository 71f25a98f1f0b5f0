//! Append and positional read tests.
//!
//! Coverage:
//! - positions are byte offsets, strictly increasing
//! - get returns an equal copy, before and after reopen
//! - get past the end of the file
//! - the position cache fills on reads and can be disabled
//! - last position tracking per thread

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use tempfile::TempDir;

    use crate::codec::tests::fixtures::Person;
    use crate::dump::tests::helpers::*;
    use crate::dump::{Dump, DumpConfig};
    use crate::error::DumpError;

    /// # Scenario
    /// Appended records are readable at the positions `add` returned.
    ///
    /// # Starting environment
    /// Empty store.
    ///
    /// # Actions
    /// 1. Add ten people.
    /// 2. Read each position back.
    ///
    /// # Expected behavior
    /// The first position is 0, positions strictly increase, every read
    /// equals the record that was added there.
    #[test]
    fn add__positions_are_increasing_offsets() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let records = people(10);

        let positions = add_all(&dump, &records);

        assert_eq!(positions[0], 0);
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        for (pos, expected) in positions.iter().zip(&records) {
            assert_eq!(dump.get(*pos).unwrap().as_ref(), Some(expected));
        }
        dump.flush().unwrap();
        let on_disk = std::fs::metadata(store_path(&tmp)).unwrap().len();
        assert_eq!(dump.data_len().unwrap(), on_disk);
        dump.close().unwrap();
    }

    /// # Scenario
    /// Records survive a clean close and reopen.
    ///
    /// # Starting environment
    /// Store with three records, closed.
    ///
    /// # Actions
    /// 1. Reopen and read all three positions.
    ///
    /// # Expected behavior
    /// Same records, same positions, sequence preserved.
    #[test]
    fn get__after_reopen() {
        let tmp = TempDir::new().unwrap();
        let records = people(3);
        let (positions, sequence) = {
            let dump = open_store(&tmp);
            let positions = add_all(&dump, &records);
            let sequence = dump.sequence().unwrap();
            dump.close().unwrap();
            (positions, sequence)
        };

        let dump = open_store(&tmp);
        assert_eq!(dump.sequence().unwrap(), sequence);
        for (pos, expected) in positions.iter().zip(&records) {
            assert_eq!(dump.get(*pos).unwrap().as_ref(), Some(expected));
        }
        dump.close().unwrap();
    }

    #[test]
    fn get__past_end_is_no_such_record() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        dump.add(&Person::new(1, "x", "a")).unwrap();

        let end = dump.data_len().unwrap();
        assert!(matches!(dump.get(end), Err(DumpError::NoSuchRecord(p)) if p == end));
        dump.close().unwrap();
    }

    #[test]
    fn get__fills_cache() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let positions = add_all(&dump, &people(5));
        assert_eq!(dump.cached_count(), 0);

        for pos in &positions {
            dump.get(*pos).unwrap();
        }
        assert_eq!(dump.cached_count(), 5);
        dump.close().unwrap();
    }

    #[test]
    fn get__cache_disabled() {
        let tmp = TempDir::new().unwrap();
        let config = DumpConfig {
            cache_size: 0,
            ..test_config()
        };
        let dump: Dump<Person> = Dump::open(store_path(&tmp), config).unwrap();
        let positions = add_all(&dump, &people(5));

        for (pos, expected) in positions.iter().zip(people(5)) {
            assert_eq!(dump.get(*pos).unwrap(), Some(expected));
        }
        assert_eq!(dump.cached_count(), 0);
        dump.close().unwrap();
    }

    /// # Scenario
    /// The last position is tracked per thread.
    ///
    /// # Starting environment
    /// Store with two records.
    ///
    /// # Actions
    /// 1. Read the first record on this thread.
    /// 2. Read the second record on another thread.
    ///
    /// # Expected behavior
    /// Each thread sees its own last position; a fresh thread sees none.
    #[test]
    fn last_position__is_per_thread() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let positions = add_all(&dump, &people(2));

        dump.get(positions[0]).unwrap();
        assert_eq!(dump.get_last_position(), Some(positions[0]));

        let other = dump.clone();
        let second = positions[1];
        std::thread::spawn(move || {
            assert_eq!(other.get_last_position(), None);
            other.get(second).unwrap();
            assert_eq!(other.get_last_position(), Some(second));
        })
        .join()
        .unwrap();

        assert_eq!(dump.get_last_position(), Some(positions[0]));
        dump.close().unwrap();
    }

    #[test]
    fn add__many_records_with_small_read_buffer() {
        let tmp = TempDir::new().unwrap();
        let config = DumpConfig {
            read_buffer_size: 64,
            cache_size: 0,
            ..test_config()
        };
        let dump: Dump<Person> = Dump::open(store_path(&tmp), config).unwrap();
        let mut long = Person::new(1, &"n".repeat(500), "a");
        long.score = -1;
        let pos = dump.add(&long).unwrap();
        let records = people(50);
        let positions = add_all(&dump, &records);

        assert_eq!(dump.get(pos).unwrap(), Some(long));
        for (pos, expected) in positions.iter().zip(&records) {
            assert_eq!(dump.get(*pos).unwrap().as_ref(), Some(expected));
        }
        dump.close().unwrap();
    }
}
