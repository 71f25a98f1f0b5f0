//! Tombstone tests.
//!
//! Coverage:
//! - delete returns the record and hides it from get
//! - double delete is an error
//! - tombstones persist across reopen
//! - delete_last acts on the thread's last position

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use tempfile::TempDir;

    use crate::codec::tests::fixtures::Person;
    use crate::dump::tests::helpers::*;
    use crate::error::DumpError;

    #[test]
    fn delete__returns_record_and_hides_it() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let records = people(3);
        let positions = add_all(&dump, &records);

        let removed = dump.delete(positions[1]).unwrap();

        assert_eq!(removed, records[1]);
        assert_eq!(dump.get(positions[1]).unwrap(), None);
        assert_eq!(dump.get(positions[0]).unwrap().as_ref(), Some(&records[0]));
        assert_eq!(dump.get(positions[2]).unwrap().as_ref(), Some(&records[2]));
        assert_eq!(dump.deleted_count().unwrap(), 1);
        assert!(!dump.contains(positions[1]).unwrap());
        dump.close().unwrap();
    }

    #[test]
    fn delete__twice_is_no_such_record() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let pos = dump.add(&Person::new(1, "x", "a")).unwrap();

        dump.delete(pos).unwrap();
        let err = dump.delete(pos).unwrap_err();

        assert!(matches!(err, DumpError::NoSuchRecord(p) if p == pos));
        assert_eq!(dump.deleted_count().unwrap(), 1);
        dump.close().unwrap();
    }

    /// # Scenario
    /// Tombstones are replayed at open.
    ///
    /// # Starting environment
    /// Store with five records, two deleted, closed cleanly.
    ///
    /// # Actions
    /// 1. Reopen.
    ///
    /// # Expected behavior
    /// The deleted positions read as absent, the rest are intact.
    #[test]
    fn delete__persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let records = people(5);
        let positions = {
            let dump = open_store(&tmp);
            let positions = add_all(&dump, &records);
            dump.delete(positions[0]).unwrap();
            dump.delete(positions[3]).unwrap();
            dump.close().unwrap();
            positions
        };

        let dump = open_store(&tmp);
        assert_eq!(dump.deleted_count().unwrap(), 2);
        for (i, pos) in positions.iter().enumerate() {
            let got = dump.get(*pos).unwrap();
            if i == 0 || i == 3 {
                assert_eq!(got, None);
            } else {
                assert_eq!(got.as_ref(), Some(&records[i]));
            }
        }
        dump.close().unwrap();
    }

    #[test]
    fn delete_last__uses_last_read() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);
        let records = people(3);
        let positions = add_all(&dump, &records);

        dump.get(positions[0]).unwrap();
        let removed = dump.delete_last().unwrap();

        assert_eq!(removed, records[0]);
        assert_eq!(dump.get(positions[0]).unwrap(), None);
        assert_eq!(dump.get(positions[2]).unwrap().as_ref(), Some(&records[2]));
        dump.close().unwrap();
    }

    #[test]
    fn delete_last__without_access_is_invalid_argument() {
        let tmp = TempDir::new().unwrap();
        let dump = open_store(&tmp);

        let err = dump.delete_last().unwrap_err();

        assert!(matches!(err, DumpError::InvalidArgument(_)));
        dump.close().unwrap();
    }
}
