//! Pipelined bulk reads over a list of positions.
//!
//! One producer thread reads the raw bytes of each requested record in
//! input order and hands them to a pool of decode workers over a bounded
//! `crossbeam` channel. Workers write decoded records into numbered slots;
//! the consumer iterator waits on a condition variable until the next slot
//! in input order is filled. The producer never runs more than
//! `ring_slots` records ahead of the consumer.
//!
//! Cancellation mid-stream is not supported: dropping a [`BulkIter`] early
//! stops the producer at its next slot wait and joins every thread.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, trace};

use super::Dump;
use crate::codec::{self, BeanType};
use crate::error::{DumpError, IoContext};

const DEFAULT_RING_SLOTS: usize = 256;

/// Reads many records with parallel decoding, preserving input order.
pub struct BulkReader<B: BeanType> {
    dump: Dump<B>,
    threads: usize,
    ring_slots: usize,
}

impl<B: BeanType> BulkReader<B> {
    /// A reader decoding on `threads` workers (at least 1).
    pub fn new(dump: Dump<B>, threads: usize) -> Self {
        Self {
            dump,
            threads: threads.max(1),
            ring_slots: DEFAULT_RING_SLOTS,
        }
    }

    /// Bounds how far the producer may run ahead of the consumer.
    pub fn with_ring_slots(mut self, slots: usize) -> Self {
        self.ring_slots = slots.max(1);
        self
    }

    /// Starts reading `positions`. Positions deleted by the time the
    /// producer reaches them are skipped.
    pub fn read(&self, positions: Vec<u64>) -> Result<BulkIter<B>, DumpError> {
        self.dump.shared().check_open()?;
        self.dump
            .shared()
            .require(super::DumpAccess::READ, "bulk read requires READ")?;
        BulkIter::start(self.dump.clone(), positions, self.threads, self.ring_slots)
    }
}

// ------------------------------------------------------------------------------------------------
// Slot coordination
// ------------------------------------------------------------------------------------------------

enum Slot<B> {
    Ready(u64, B),
    Skipped,
    Failed(DumpError),
}

struct Progress<B> {
    slots: HashMap<usize, Slot<B>>,
    /// Next slot the consumer will take.
    consumed: usize,
    producer_waiting: bool,
    consumer_waiting: bool,
    cancelled: bool,
}

struct Coordination<B> {
    progress: Mutex<Progress<B>>,
    /// Signalled when a slot is filled.
    filled: Condvar,
    /// Signalled when the consumer frees a slot or cancels.
    freed: Condvar,
}

impl<B> Coordination<B> {
    fn lock(&self) -> Result<MutexGuard<'_, Progress<B>>, DumpError> {
        self.progress
            .lock()
            .map_err(|_| DumpError::poisoned("bulk reader"))
    }

    fn fill(&self, idx: usize, slot: Slot<B>) {
        let Ok(mut p) = self.lock() else { return };
        p.slots.insert(idx, slot);
        if p.consumer_waiting {
            self.filled.notify_all();
        }
    }
}

struct Work {
    idx: usize,
    pos: u64,
    bytes: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// BulkIter
// ------------------------------------------------------------------------------------------------

/// Ordered results of a [`BulkReader::read`].
pub struct BulkIter<B: BeanType> {
    coord: Arc<Coordination<B>>,
    total: usize,
    done: bool,
    producer: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl<B: BeanType> BulkIter<B> {
    fn start(
        dump: Dump<B>,
        positions: Vec<u64>,
        threads: usize,
        ring_slots: usize,
    ) -> Result<Self, DumpError> {
        let total = positions.len();
        let coord = Arc::new(Coordination {
            progress: Mutex::new(Progress {
                slots: HashMap::new(),
                consumed: 0,
                producer_waiting: false,
                consumer_waiting: false,
                cancelled: false,
            }),
            filled: Condvar::new(),
            freed: Condvar::new(),
        });
        let (tx, rx) = channel::bounded::<Work>(ring_slots);
        let path = dump.path().to_path_buf();

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let rx = rx.clone();
            let coord = Arc::clone(&coord);
            let handle = thread::Builder::new()
                .name(format!("beandump-bulk-{id}"))
                .spawn(move || decode_worker::<B>(rx, coord))
                .io_context(&path, "spawn bulk worker")?;
            workers.push(handle);
        }
        drop(rx);

        let producer = {
            let coord = Arc::clone(&coord);
            thread::Builder::new()
                .name("beandump-bulk-producer".into())
                .spawn(move || produce(dump, positions, ring_slots, tx, coord))
                .io_context(&path, "spawn bulk producer")?
        };

        debug!(records = total, threads, ring_slots, "bulk read started");
        Ok(Self {
            coord,
            total,
            done: total == 0,
            producer: Some(producer),
            workers,
        })
    }

    fn next_slot(&mut self) -> Result<Option<Slot<B>>, DumpError> {
        let mut p = self.coord.lock()?;
        if p.consumed >= self.total {
            return Ok(None);
        }
        let idx = p.consumed;
        loop {
            if let Some(slot) = p.slots.remove(&idx) {
                p.consumer_waiting = false;
                p.consumed += 1;
                if p.producer_waiting {
                    self.coord.freed.notify_all();
                }
                return Ok(Some(slot));
            }
            p.consumer_waiting = true;
            p = self
                .coord
                .filled
                .wait(p)
                .map_err(|_| DumpError::poisoned("bulk reader"))?;
        }
    }
}

impl<B: BeanType> Iterator for BulkIter<B> {
    type Item = Result<(u64, B), DumpError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.next_slot() {
                Ok(Some(Slot::Ready(pos, bean))) => return Some(Ok((pos, bean))),
                Ok(Some(Slot::Skipped)) => continue,
                Ok(Some(Slot::Failed(e))) | Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Ok(None) => self.done = true,
            }
        }
        None
    }
}

impl<B: BeanType> Drop for BulkIter<B> {
    fn drop(&mut self) {
        if let Ok(mut p) = self.coord.lock() {
            p.cancelled = true;
            self.coord.freed.notify_all();
        }
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Threads
// ------------------------------------------------------------------------------------------------

fn produce<B: BeanType>(
    dump: Dump<B>,
    positions: Vec<u64>,
    ring_slots: usize,
    tx: Sender<Work>,
    coord: Arc<Coordination<B>>,
) {
    for (idx, pos) in positions.into_iter().enumerate() {
        // Wait until the slot is within the ring.
        {
            let Ok(mut p) = coord.lock() else { return };
            while !p.cancelled && idx >= p.consumed + ring_slots {
                p.producer_waiting = true;
                p = match coord.freed.wait(p) {
                    Ok(p) => p,
                    Err(_) => return,
                };
            }
            p.producer_waiting = false;
            if p.cancelled {
                return;
            }
        }

        let read = dump.shared().with_inner(|inner| {
            if inner.is_deleted(pos) {
                Ok(None)
            } else {
                inner.read_raw(pos).map(|e| Some(e.bytes))
            }
        });
        match read {
            Ok(Some(bytes)) => {
                trace!(idx, pos, "bulk record queued");
                if tx.send(Work { idx, pos, bytes }).is_err() {
                    return;
                }
            }
            Ok(None) => coord.fill(idx, Slot::Skipped),
            Err(e) => {
                coord.fill(idx, Slot::Failed(e));
                return;
            }
        }
    }
}

fn decode_worker<B: BeanType>(rx: Receiver<Work>, coord: Arc<Coordination<B>>) {
    while let Ok(work) = rx.recv() {
        let slot = match codec::decode_record::<B>(&work.bytes) {
            Ok((bean, _)) => Slot::Ready(work.pos, bean),
            Err(source) => Slot::Failed(DumpError::Decode {
                type_name: B::bean_schema().type_name(),
                pos: work.pos,
                source,
            }),
        };
        coord.fill(work.idx, slot);
    }
}
