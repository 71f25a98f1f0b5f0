//! Exit hook tests.
//!
//! Coverage:
//! - every registered store is closed and persists its sequence
//! - a store that panics while closing does not keep the others open
//! - closing works after this thread's locals were destroyed

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use std::cell::RefCell;
    use std::sync::{Arc, Weak};
    use std::thread;

    use tempfile::TempDir;

    use crate::codec::tests::fixtures::Person;
    use crate::dump::tests::helpers::*;
    use crate::dump::{Dump, DumpConfig};
    use crate::error::DumpError;
    use crate::shutdown::{self, Closeable};

    fn registered_config() -> DumpConfig {
        DumpConfig {
            will_be_closed_during_shutdown: false,
            ..test_config()
        }
    }

    fn open_registered(tmp: &TempDir, name: &str) -> Dump<Person> {
        Dump::open(tmp.path().join(name), registered_config()).unwrap()
    }

    fn assert_persisted(tmp: &TempDir, name: &str, expected: &[Person]) {
        let dump: Dump<Person> = Dump::open(tmp.path().join(name), test_config()).unwrap();
        assert_eq!(dump.sequence().unwrap(), expected.len() as u64);
        let got: Vec<Person> = dump.iter().unwrap().map(|r| r.unwrap().1).collect();
        assert_eq!(got, expected);
        dump.close().unwrap();
    }

    /// Panics instead of closing.
    struct Exploding;

    impl Closeable for Exploding {
        fn close_for_shutdown(&self) -> Result<(), DumpError> {
            panic!("close failed hard");
        }

        fn describe(&self) -> String {
            "exploding".into()
        }
    }

    /// Runs the exit hook when this thread's locals are torn down.
    struct CloseOnThreadExit;

    impl Drop for CloseOnThreadExit {
        fn drop(&mut self) {
            shutdown::close_all_open();
        }
    }

    thread_local! {
        static CLOSE_ON_EXIT: RefCell<Option<CloseOnThreadExit>> = const { RefCell::new(None) };
    }

    /// # Scenario
    /// Two stores are still open when the exit hook runs.
    ///
    /// # Starting environment
    /// Stores `a` and `b`, both registered, three records each.
    ///
    /// # Actions
    /// 1. Call `close_all_open`.
    ///
    /// # Expected behavior
    /// Both are closed and both persisted their sequence of 3.
    #[test]
    fn shutdown__closes_every_registered_store() {
        let _serial = SHUTDOWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let tmp = TempDir::new().unwrap();
        let records = people(3);
        let a = open_registered(&tmp, "a.dump");
        let b = open_registered(&tmp, "b.dump");
        add_all(&a, &records);
        add_all(&b, &records);

        let closed = shutdown::close_all_open();

        assert!(closed >= 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_persisted(&tmp, "a.dump", &records);
        assert_persisted(&tmp, "b.dump", &records);
    }

    #[test]
    fn shutdown__panic_in_one_store_closes_the_rest() {
        let _serial = SHUTDOWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let tmp = TempDir::new().unwrap();
        let records = people(2);
        let exploding: Arc<dyn Closeable> = Arc::new(Exploding);
        shutdown::register(u64::MAX, Arc::downgrade(&exploding) as Weak<dyn Closeable>);
        let dump = open_registered(&tmp, "after.dump");
        add_all(&dump, &records);

        shutdown::close_all_open();

        assert!(dump.is_closed());
        assert_persisted(&tmp, "after.dump", &records);
    }

    /// # Scenario
    /// The exit hook runs after thread-local storage was torn down, as it
    /// does from `atexit`.
    ///
    /// # Starting environment
    /// A registered store written to from a worker thread, so the worker's
    /// last-position map exists.
    ///
    /// # Actions
    /// 1. On the worker, install a thread-local whose destructor calls
    ///    `close_all_open`, then add records.
    /// 2. Let the worker exit.
    ///
    /// # Expected behavior
    /// The store is closed without a panic and its records survive.
    #[test]
    fn shutdown__closes_after_thread_locals_destroyed() {
        let _serial = SHUTDOWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let tmp = TempDir::new().unwrap();
        let records = people(3);
        let dump = open_registered(&tmp, "late.dump");

        let worker = dump.clone();
        let written = records.clone();
        thread::spawn(move || {
            CLOSE_ON_EXIT.with(|c| *c.borrow_mut() = Some(CloseOnThreadExit));
            add_all(&worker, &written);
        })
        .join()
        .unwrap();

        assert!(dump.is_closed());
        assert_persisted(&tmp, "late.dump", &records);
    }
}
