//! Quota-bounded producer/consumer loops over a [`BlockingQueue`].
//!
//! A [`Quota`] is shared by every producer and consumer of one queue. Producers
//! reserve a production slot before pushing and stop once `limit` items have been
//! reserved. Consumers claim a consumption slot before each wait and stop once
//! `limit` items have been claimed, i.e. once the quota is reached and every
//! produced item has been taken out of the queue. Claiming before waiting means
//! a consumer never blocks on an item nobody will produce, no matter how many
//! consumers share the quota.
//!
//! If a producer panics after reserving a slot, that item never arrives. The
//! producer loop then aborts the quota: other producers stop, and consumers
//! drain what is already queued and return `QuotaAborted` instead of waiting
//! forever.
//!
//! Items are processed after they are popped, outside the queue's lock, so slow
//! processing never serializes other producers or consumers.

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
};

use strand_common::{Result, error::Error};

use crate::blocking_queue::BlockingQueue;

/// Shared production/consumption counters for a fixed number of items.
#[derive(Debug)]
pub struct Quota {
    limit: usize,
    produced: AtomicUsize,
    claimed: AtomicUsize,
    aborted: AtomicBool,
}

impl Quota {
    /// Creates a quota of `limit` items.
    pub fn new(limit: usize) -> Quota {
        Quota {
            limit,
            produced: AtomicUsize::new(0),
            claimed: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of production slots reserved so far.
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::Acquire)
    }

    /// Number of consumption slots claimed so far.
    pub fn claimed(&self) -> usize {
        self.claimed.load(Ordering::Acquire)
    }

    /// Returns `true` once every production slot has been reserved.
    pub fn is_reached(&self) -> bool {
        self.produced() >= self.limit
    }

    /// Returns `true` if the quota is reached and `queue` is empty.
    ///
    /// Advisory: a producer that has reserved the last slot may not have pushed
    /// its item yet.
    pub fn is_drained<T>(&self, queue: &BlockingQueue<T>) -> bool {
        self.is_reached() && queue.is_empty()
    }

    /// Returns `true` once the quota has been aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Marks the quota as aborted and wakes every consumer blocked on `queue`.
    ///
    /// Producers stop reserving slots; consumers hand out the items already
    /// queued and then fail with `QuotaAborted`.
    pub fn abort<T>(&self, queue: &BlockingQueue<T>) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            log::debug!("quota of {} items aborted", self.limit);
        }
        queue.wake_all();
    }

    /// Reserves one production slot. Returns `false` if the quota is exhausted
    /// or aborted.
    pub fn try_reserve_production(&self) -> bool {
        self.reserve_production().is_some()
    }

    /// Reserves one consumption slot. Returns `false` once every item has been
    /// claimed by some consumer, or the quota was aborted.
    pub fn try_claim(&self) -> bool {
        !self.is_aborted() && Self::try_take(&self.claimed, self.limit).is_some()
    }

    /// Production loop: pushes `make(index)` into `queue` until the quota is
    /// reached. `index` is the global sequence number of the item. Returns the
    /// number of items this caller produced.
    ///
    /// If `make` panics, the quota is aborted before the panic propagates.
    pub fn produce_into<T>(
        &self,
        queue: &BlockingQueue<T>,
        mut make: impl FnMut(usize) -> T,
    ) -> usize {
        let _guard = AbortOnPanic { quota: self, queue };
        let mut count = 0;
        while let Some(index) = self.reserve_production() {
            queue.push(make(index));
            count += 1;
        }
        log::trace!("producer finished after {count} items");
        count
    }

    /// Consumption loop: takes items from `queue` and hands each to `process`
    /// until all items of the quota have been claimed. Returns the number of
    /// items this caller processed.
    ///
    /// # Errors
    ///
    /// Returns `QuotaAborted` if the quota was aborted while this consumer was
    /// waiting for an item that will never be produced.
    pub fn consume_from<T>(
        &self,
        queue: &BlockingQueue<T>,
        mut process: impl FnMut(T),
    ) -> Result<usize> {
        let mut count = 0;
        while self.try_claim() {
            match queue.wait_and_pop_unless(|| self.is_aborted()) {
                Some(item) => {
                    process(item);
                    count += 1;
                }
                None => break,
            }
        }
        if self.is_aborted() {
            log::trace!("consumer stopped by abort after {count} items");
            return Err(Error::quota_aborted(format!(
                "consumer stopped after {count} items"
            )));
        }
        log::trace!("consumer finished after {count} items");
        Ok(count)
    }

    fn reserve_production(&self) -> Option<usize> {
        if self.is_aborted() {
            return None;
        }
        Self::try_take(&self.produced, self.limit)
    }

    fn try_take(counter: &AtomicUsize, limit: usize) -> Option<usize> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()
    }
}

/// Aborts the quota if dropped during a panic in the production loop.
struct AbortOnPanic<'a, T> {
    quota: &'a Quota,
    queue: &'a BlockingQueue<T>,
}

impl<T> Drop for AbortOnPanic<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.quota.abort(self.queue);
        }
    }
}
