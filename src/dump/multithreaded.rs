//! A store handle that encodes outside the store lock.

use std::cell::RefCell;
use std::path::Path;

use super::{Dump, DumpConfig, DumpIter};
use crate::codec::{self, BeanType};
use crate::error::DumpError;

thread_local! {
    static ENCODE_BUF: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(256));
}

/// A [`Dump`] for many concurrent writers.
///
/// [`MultithreadedDump::add`] encodes the record on the calling thread,
/// into a per-thread buffer, and only holds the store lock for the append
/// and the index fan-out. Concurrent adds therefore land in arbitrary
/// order. Everything else behaves as on [`Dump`].
#[derive(Debug, Clone)]
pub struct MultithreadedDump<B: BeanType> {
    dump: Dump<B>,
}

impl<B: BeanType> MultithreadedDump<B> {
    pub fn open(path: impl AsRef<Path>, config: DumpConfig) -> Result<Self, DumpError> {
        Dump::open(path, config).map(Self::from)
    }

    pub fn add(&self, bean: &B) -> Result<u64, DumpError> {
        ENCODE_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();
            codec::encode_bean(bean, &mut buf)?;
            self.dump.add_encoded(bean, &buf)
        })
    }

    pub fn get(&self, pos: u64) -> Result<Option<B>, DumpError> {
        self.dump.get(pos)
    }

    pub fn delete(&self, pos: u64) -> Result<B, DumpError> {
        self.dump.delete(pos)
    }

    pub fn update(&self, pos: u64, new: &B) -> Result<B, DumpError> {
        self.dump.update(pos, new)
    }

    pub fn iter(&self) -> Result<DumpIter<B>, DumpError> {
        self.dump.iter()
    }

    pub fn close(&self) -> Result<(), DumpError> {
        self.dump.close()
    }

    /// The underlying store, for index attachment and the rest of the API.
    pub fn dump(&self) -> &Dump<B> {
        &self.dump
    }
}

impl<B: BeanType> From<Dump<B>> for MultithreadedDump<B> {
    fn from(dump: Dump<B>) -> Self {
        Self { dump }
    }
}
