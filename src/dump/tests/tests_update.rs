//! Update tests.
//!
//! Coverage:
//! - same encoded length: overwritten in place, position kept
//! - different length: tombstoned and re-appended
//! - in-place with the cache disabled
//! - update of a deleted record
//! - update_last follows the relocated record

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use tempfile::TempDir;

    use crate::codec::tests::fixtures::Person;
    use crate::dump::tests::helpers::*;
    use crate::dump::{Dump, DumpConfig};
    use crate::error::DumpError;

    /// # Scenario
    /// An update with an unchanged encoded length stays in place.
    ///
    /// # Starting environment
    /// Store with two records.
    ///
    /// # Actions
    /// 1. Update the first record with values of the same encoded length.
    ///
    /// # Expected behavior
    /// The old record is returned, the new one reads back at the same
    /// position, the data file did not grow and nothing was tombstoned.
    #[test]
    fn update__same_length_is_in_place() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let a = Person::new(1, "x", "a");
        let b = Person::new(2, "y", "b");
        let pos_a = dump.add(&a).unwrap();
        let pos_b = dump.add(&b).unwrap();
        let len = dump.data_len().unwrap();

        let a2 = Person::new(7, "z", "c");
        let old = dump.update(pos_a, &a2).unwrap();

        assert_eq!(old, a);
        assert_eq!(dump.get(pos_a).unwrap(), Some(a2));
        assert_eq!(dump.get(pos_b).unwrap(), Some(b));
        assert_eq!(dump.data_len().unwrap(), len);
        assert_eq!(dump.deleted_count().unwrap(), 0);
        assert_eq!(dump.get_last_position(), Some(pos_b));
        dump.close().unwrap();
    }

    /// # Scenario
    /// An update changing the encoded length relocates the record.
    ///
    /// # Starting environment
    /// Store with one record.
    ///
    /// # Actions
    /// 1. Update it with a longer name.
    ///
    /// # Expected behavior
    /// The old position reads as absent, the new record is at the end of
    /// the file and the thread's last position points at it.
    #[test]
    fn update__different_length_relocates() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let a = Person::new(1, "x", "a");
        let pos = dump.add(&a).unwrap();
        let end = dump.data_len().unwrap();

        let longer = Person::new(1, "a much longer name", "a");
        let old = dump.update(pos, &longer).unwrap();

        assert_eq!(old, a);
        assert_eq!(dump.get(pos).unwrap(), None);
        let new_pos = dump.get_last_position().unwrap();
        assert_eq!(new_pos, end);
        assert_eq!(dump.get(new_pos).unwrap(), Some(longer));
        dump.close().unwrap();
    }

    #[test]
    fn update__in_place_with_cache_disabled() {
        let tmp = TempDir::new().unwrap();
        let config = DumpConfig {
            cache_size: 0,
            ..test_config()
        };
        let dump: Dump<Person> = Dump::open(store_path(&tmp), config).unwrap();
        let pos = dump.add(&Person::new(1, "x", "a")).unwrap();
        let len = dump.data_len().unwrap();

        dump.update(pos, &Person::new(2, "y", "b")).unwrap();

        assert_eq!(dump.data_len().unwrap(), len);
        assert_eq!(dump.get(pos).unwrap(), Some(Person::new(2, "y", "b")));
        assert_eq!(dump.cached_count(), 0);
        dump.close().unwrap();
    }

    #[test]
    fn update__in_place_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let pos = {
            let dump = open_store(&tmp);
            let pos = dump.add(&Person::new(1, "x", "a")).unwrap();
            dump.add(&Person::new(2, "y", "b")).unwrap();
            dump.update(pos, &Person::new(3, "q", "c")).unwrap();
            dump.close().unwrap();
            pos
        };

        let dump = open_store(&tmp);
        assert_eq!(dump.get(pos).unwrap(), Some(Person::new(3, "q", "c")));
        assert_eq!(dump.iter().unwrap().count(), 2);
        dump.close().unwrap();
    }

    #[test]
    fn update__deleted_record_is_no_such_record() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let pos = dump.add(&Person::new(1, "x", "a")).unwrap();
        dump.delete(pos).unwrap();

        let err = dump.update(pos, &Person::new(2, "y", "b")).unwrap_err();

        assert!(matches!(err, DumpError::NoSuchRecord(_)));
        dump.close().unwrap();
    }

    #[test]
    fn update_last__after_iteration() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        add_all(&dump, &people(3));

        let (pos, mut second) = dump.iter().unwrap().nth(1).unwrap().unwrap();
        assert_eq!(dump.get_last_position(), Some(pos));
        second.name = Some("renamed to something longer".into());
        dump.update_last(&second).unwrap();

        assert_eq!(dump.get(pos).unwrap(), None);
        let moved = dump.get_last_position().unwrap();
        assert_eq!(dump.get(moved).unwrap(), Some(second));
        dump.close().unwrap();
    }
}
