use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::codec::tests::fixtures::Person;
use crate::dump::{Dump, DumpConfig};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serializes tests that run the exit hook, which closes every registered
/// store in the process.
pub static SHUTDOWN_LOCK: Mutex<()> = Mutex::new(());

/// Data file path inside a fresh temp dir.
pub fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("people.dump")
}

/// Default config, not registered for the exit hook.
pub fn test_config() -> DumpConfig {
    init_tracing();
    DumpConfig {
        will_be_closed_during_shutdown: true,
        ..DumpConfig::default()
    }
}

pub fn open_store(dir: &TempDir) -> Dump<Person> {
    Dump::open(store_path(dir), test_config()).unwrap()
}

pub fn reopen(dir: &TempDir, config: DumpConfig) -> Dump<Person> {
    Dump::open(store_path(dir), config).unwrap()
}

/// `n` people with ids `0..n`, alternating categories `"a"` and `"b"`.
pub fn people(n: i32) -> Vec<Person> {
    (0..n)
        .map(|i| Person::new(i, &format!("person-{i}"), if i % 2 == 0 { "a" } else { "b" }))
        .collect()
}

/// Adds every record and returns their positions.
pub fn add_all(dump: &Dump<Person>, records: &[Person]) -> Vec<u64> {
    records.iter().map(|p| dump.add(p).unwrap()).collect()
}
