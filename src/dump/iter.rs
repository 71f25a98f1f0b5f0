//! Forward iteration over live records.

use super::Dump;
use crate::codec::BeanType;
use crate::error::DumpError;

/// Lazy, single-pass iterator over `(position, record)` of every live
/// record, in file order.
///
/// The store lock is taken once per record, so other threads may add or
/// delete while iterating. Records appended after the iterator passes the
/// old end of file are still yielded. The first error ends the iteration.
pub struct DumpIter<B: BeanType> {
    dump: Dump<B>,
    next: u64,
    done: bool,
}

impl<B: BeanType> DumpIter<B> {
    pub(crate) fn new(dump: Dump<B>) -> Self {
        Self {
            dump,
            next: 0,
            done: false,
        }
    }
}

impl<B: BeanType> Iterator for DumpIter<B> {
    type Item = Result<(u64, B), DumpError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = self
            .dump
            .shared()
            .check_open()
            .and_then(|()| self.dump.shared().with_inner(|inner| inner.next_live(self.next)));
        match step {
            Ok(Some((pos, bean, next))) => {
                self.next = next;
                self.dump.set_last_position(pos);
                Some(Ok((pos, bean)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<B: BeanType> std::iter::FusedIterator for DumpIter<B> {}
