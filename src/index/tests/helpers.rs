use std::path::PathBuf;

use tempfile::TempDir;

use crate::codec::tests::fixtures::Person;
use crate::dump::sidecar_path;
use crate::dump::tests::helpers::store_path;
use crate::index::InfiniteIndexConfig;

/// Path of an index file `P.<field>.<suffix>`.
pub fn index_file(dir: &TempDir, field: &str, suffix: &str) -> PathBuf {
    sidecar_path(&sidecar_path(&store_path(dir), field), suffix)
}

/// One person per category, ids counting from 0.
pub fn categorized(categories: &[&str]) -> Vec<Person> {
    categories
        .iter()
        .enumerate()
        .map(|(i, c)| Person::new(i as i32, &format!("person-{i}"), c))
        .collect()
}

/// Infinite index tuning that merges after `threshold` entries.
pub fn small_infinite(threshold: usize) -> InfiniteIndexConfig {
    InfiniteIndexConfig {
        overflow_threshold: threshold,
        lookup_cache_size: 16,
        sort_memory_entries: 8,
        ..InfiniteIndexConfig::default()
    }
}

/// Ids of `records`, in order.
pub fn ids(records: &[Person]) -> Vec<i32> {
    records.iter().map(|p| p.id).collect()
}
