//! Fork-join reduction of a slice.
//!
//! The slice is split into contiguous blocks. Every block but the last is reduced
//! on its own [`ScopedOwnedThread`], while the calling thread reduces the last
//! block; the partial results are then folded left to right, seeded with the
//! caller's initial value.
//!
//! # Associativity
//!
//! Blocks are reduced independently, so the result equals a sequential left fold
//! only when `op` is associative: `op(op(a, b), c) == op(a, op(b, c))`. `op` does
//! not need to be commutative; block order is preserved. Floating-point addition
//! is *not* associative and may give slightly different results than a
//! sequential sum.
//!
//! # Failures
//!
//! Each worker writes its outcome into a dedicated slot. A worker that panics, or
//! whose fallible `op` returns an error, does not abort the others: every worker
//! is joined first, and then the failure of the earliest block is returned. A
//! panic in the block reduced on the calling thread unwinds the caller as usual.

use std::{num::NonZeroUsize, ops::Range, thread};

use strand_common::{Result, error::Error, verify_arg};

use crate::owned_thread::ScopedOwnedThread;

/// Default minimum number of elements handled by one worker.
pub const DEFAULT_MIN_CHUNK: usize = 25;

/// Worker count used when the hardware parallelism cannot be determined.
const FALLBACK_PARALLELISM: usize = 2;

/// Tuning knobs for [`reduce_with`] and [`try_reduce_with`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReduceOptions {
    min_chunk: usize,
    max_workers: Option<usize>,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        ReduceOptions {
            min_chunk: DEFAULT_MIN_CHUNK,
            max_workers: None,
        }
    }
}

impl ReduceOptions {
    pub fn new() -> ReduceOptions {
        Default::default()
    }

    /// Sets the minimum number of elements per worker. Must be non-zero.
    pub fn with_min_chunk(mut self, min_chunk: usize) -> Self {
        self.min_chunk = min_chunk;
        self
    }

    /// Caps the number of workers (including the calling thread). Must be
    /// non-zero. Without a cap, the hardware parallelism of the host is used.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn min_chunk(&self) -> usize {
        self.min_chunk
    }

    pub fn max_workers(&self) -> Option<usize> {
        self.max_workers
    }

    fn validate(&self) -> Result<()> {
        verify_arg!(min_chunk, self.min_chunk != 0);
        verify_arg!(max_workers, self.max_workers != Some(0));
        Ok(())
    }
}

/// How a slice of a given length is partitioned among workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReducePlan {
    len: usize,
    workers: usize,
    block_size: usize,
}

impl ReducePlan {
    /// Computes the partition of `len` elements:
    ///
    /// - `max_threads = ceil(len / min_chunk)`
    /// - `workers = min(max_workers or hardware parallelism, max_threads)`
    /// - `block_size = len / workers`, the last block absorbing the remainder
    ///
    /// An empty input yields a plan with no workers.
    pub fn new(len: usize, options: &ReduceOptions) -> Result<ReducePlan> {
        options.validate()?;
        if len == 0 {
            return Ok(ReducePlan {
                len,
                workers: 0,
                block_size: 0,
            });
        }
        let max_threads = len.div_ceil(options.min_chunk);
        let available = options.max_workers.unwrap_or_else(hardware_parallelism);
        let workers = available.min(max_threads).max(1);
        Ok(ReducePlan {
            len,
            workers,
            block_size: len / workers,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of blocks, i.e. spawned workers plus the calling thread.
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Element range of block `index`. The last block extends to the end.
    pub fn block_range(&self, index: usize) -> Range<usize> {
        let start = index * self.block_size;
        if index + 1 == self.workers {
            start..self.len
        } else {
            start..start + self.block_size
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (0..self.workers).map(|i| self.block_range(i))
    }
}

/// Number of threads the host can run in parallel, or 2 if unknown.
pub fn hardware_parallelism() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(FALLBACK_PARALLELISM)
}

/// Reduces `items` with the associative operator `op`, seeded with `initial`,
/// using the default [`ReduceOptions`].
///
/// Returns `initial` without spawning any thread if `items` is empty.
///
/// # Errors
///
/// `WorkerPanicked` if `op` panicked on a worker thread; `Spawn` if a worker
/// could not be started.
pub fn reduce<T, F>(items: &[T], initial: T, op: F) -> Result<T>
where
    T: Clone + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    reduce_with(&ReduceOptions::default(), items, initial, op)
}

/// [`reduce`] with explicit options.
pub fn reduce_with<T, F>(options: &ReduceOptions, items: &[T], initial: T, op: F) -> Result<T>
where
    T: Clone + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    try_reduce_with(options, items, initial, |a, b| Ok::<T, Error>(op(a, b)))
}

/// Reduces `items` with a fallible associative operator.
///
/// The first failure in block order is returned after every worker has been
/// joined. Worker panics and spawn failures are converted into `E`.
pub fn try_reduce<T, E, F>(items: &[T], initial: T, op: F) -> std::result::Result<T, E>
where
    T: Clone + Send + Sync,
    E: From<Error> + Send,
    F: Fn(T, T) -> std::result::Result<T, E> + Sync,
{
    try_reduce_with(&ReduceOptions::default(), items, initial, op)
}

/// [`try_reduce`] with explicit options.
pub fn try_reduce_with<T, E, F>(
    options: &ReduceOptions,
    items: &[T],
    initial: T,
    op: F,
) -> std::result::Result<T, E>
where
    T: Clone + Send + Sync,
    E: From<Error> + Send,
    F: Fn(T, T) -> std::result::Result<T, E> + Sync,
{
    let plan = ReducePlan::new(items.len(), options)?;
    if plan.is_empty() {
        return Ok(initial);
    }
    log::debug!(
        "parallel reduce: {} items, {} workers, block size {}",
        plan.len(),
        plan.workers(),
        plan.block_size()
    );

    let op = &op;
    let mut slots = (0..plan.workers())
        .map(|_| None)
        .collect::<Vec<Option<std::result::Result<T, E>>>>();

    let join_failures = thread::scope(|scope| -> Result<Vec<(usize, Error)>> {
        let Some((last_slot, worker_slots)) = slots.split_last_mut() else {
            return Ok(Vec::new());
        };

        let mut workers = Vec::with_capacity(worker_slots.len());
        for (index, slot) in worker_slots.iter_mut().enumerate() {
            let block = &items[plan.block_range(index)];
            let worker = ScopedOwnedThread::create_named(
                scope,
                format!("strand-reduce-{index}"),
                move || {
                    *slot = reduce_block(block, op);
                },
            )?;
            workers.push(worker);
        }

        *last_slot = reduce_block(&items[plan.block_range(plan.workers() - 1)], op);

        let mut failures = Vec::new();
        for (index, mut worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                log::trace!("reduce worker {index} failed: {e}");
                failures.push((index, e));
            }
        }
        Ok(failures)
    })?;

    let mut failed = (0..plan.workers()).map(|_| None).collect::<Vec<_>>();
    for (index, e) in join_failures {
        failed[index] = Some(e);
    }

    let mut acc = initial;
    for (slot, failure) in slots.into_iter().zip(failed) {
        if let Some(e) = failure {
            return Err(e.into());
        }
        if let Some(partial) = slot {
            acc = op(acc, partial?)?;
        }
    }
    Ok(acc)
}

fn reduce_block<T, E, F>(block: &[T], op: &F) -> Option<std::result::Result<T, E>>
where
    T: Clone,
    F: Fn(T, T) -> std::result::Result<T, E>,
{
    let (first, rest) = block.split_first()?;
    Some(rest.iter().cloned().try_fold(first.clone(), op))
}
