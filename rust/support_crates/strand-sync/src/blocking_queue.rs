//! A blocking FIFO queue built from a mutex and a condition variable.
//!
//! Consumers can either poll ([`try_pop`](BlockingQueue::try_pop),
//! [`pop`](BlockingQueue::pop)) or block until an element arrives
//! ([`wait_and_pop`](BlockingQueue::wait_and_pop)). The blocking path waits on a
//! predicate ("queue is not empty") that is re-checked under the lock on every
//! wakeup, so neither spurious wakeups nor several consumers racing for one
//! element can make it return on an empty queue.
//!
//! Unlike a channel, the queue has no notion of disconnection: it lives as long
//! as its owner and a `wait_and_pop` on a queue that never receives another
//! element blocks indefinitely. Callers that need a termination condition pass
//! one to [`wait_and_pop_unless`](BlockingQueue::wait_and_pop_unless) (see
//! [`crate::quota`]).

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, PoisonError},
};

use strand_common::{Result, error::Error};

use crate::lock_set::lock;

/// A thread-safe, unbounded FIFO queue with blocking consumption.
///
/// ## Guarantees
///
/// - Every element pushed is returned by exactly one successful `pop`,
///   `try_pop` or `wait_and_pop`; none is duplicated or dropped.
/// - With one producer and one consumer, elements are delivered in push order.
///   With several producers or consumers only atomicity is guaranteed.
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
}

impl<T> BlockingQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> BlockingQueue<T> {
        BlockingQueue {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Appends `value` to the back of the queue and wakes one waiting consumer.
    pub fn push(&self, value: T) {
        let mut items = lock(&self.items);
        items.push_back(value);

        // Drop the lock before notifying so the woken consumer does not
        // immediately block on it again.
        drop(items);
        self.not_empty.notify_one();
    }

    /// Removes and returns the front element without blocking, or `None` if the
    /// queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        lock(&self.items).pop_front()
    }

    /// Removes and returns the front element without blocking.
    ///
    /// # Errors
    ///
    /// Returns `EmptyQueue` if there was nothing to remove.
    pub fn pop(&self) -> Result<T> {
        self.try_pop().ok_or_else(Error::empty_queue)
    }

    /// Blocks until an element is available, then removes and returns it.
    ///
    /// The emptiness check is repeated under the lock after every wakeup.
    /// There is no timeout: if nothing is ever pushed, this never returns.
    pub fn wait_and_pop(&self) -> T {
        let mut items = lock(&self.items);
        loop {
            if let Some(value) = items.pop_front() {
                return value;
            }
            items = self
                .not_empty
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait_and_pop`](Self::wait_and_pop), but gives up and returns `None`
    /// once `stop` returns `true` while the queue is empty.
    ///
    /// Queued elements are always handed out before `stop` is consulted. `stop`
    /// is evaluated under the queue's lock; whoever makes it true must call
    /// [`wake_all`](Self::wake_all) afterwards.
    pub fn wait_and_pop_unless(&self, mut stop: impl FnMut() -> bool) -> Option<T> {
        let mut items = lock(&self.items);
        loop {
            if let Some(value) = items.pop_front() {
                return Some(value);
            }
            if stop() {
                return None;
            }
            items = self
                .not_empty
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wakes every blocked consumer so that it re-evaluates its stop condition.
    pub fn wake_all(&self) {
        // Passing through the lock orders this wakeup after any stop check
        // that is already in progress.
        drop(lock(&self.items));
        self.not_empty.notify_all();
    }

    /// Returns `true` if the queue was empty at the instant of the check.
    ///
    /// Advisory only: another thread may push or pop immediately afterwards.
    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// Returns the number of queued elements at the instant of the check.
    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    /// Consumes the queue and returns the remaining elements, front first.
    pub fn into_vec(self) -> Vec<T> {
        self.items
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        BlockingQueue::new()
    }
}

/// Copies the queued elements while holding the source's lock. The clone has its
/// own lock and condition variable; consumers waiting on the source are not
/// woken by pushes to the clone.
impl<T: Clone> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        let items = lock(&self.items).clone();
        BlockingQueue {
            items: Mutex::new(items),
            not_empty: Condvar::new(),
        }
    }
}

impl<T> FromIterator<T> for BlockingQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        BlockingQueue {
            items: Mutex::new(iter.into_iter().collect()),
            not_empty: Condvar::new(),
        }
    }
}

impl<T> std::fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
            mpsc,
        },
        thread,
        time::{Duration, Instant},
    };

    use super::BlockingQueue;

    #[test]
    fn test_queue_send_sync() {
        fn is_send_sync<T: Send + Sync>() {}
        is_send_sync::<BlockingQueue<usize>>();
        is_send_sync::<BlockingQueue<Vec<u8>>>();
    }

    #[test]
    fn test_fifo_single_thread() {
        let queue = BlockingQueue::new();
        assert!(queue.is_empty());
        assert!(queue.try_pop().is_none());
        assert!(queue.pop().unwrap_err().is_empty_queue());

        for i in 0..10 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 10);
        assert_eq!(queue.pop().unwrap(), 0);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.wait_and_pop(), 2);
        assert_eq!(queue.into_vec(), (3..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_clone_copies_contents() {
        let queue = (0..4).collect::<BlockingQueue<_>>();
        let copy = queue.clone();
        assert_eq!(queue.wait_and_pop(), 0);
        assert_eq!(copy.len(), 4);
        assert_eq!(copy.into_vec(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_wait_and_pop_unblocked_by_delayed_push() {
        let queue = Arc::new(BlockingQueue::new());
        let (tx, rx) = mpsc::channel();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let value = queue.wait_and_pop();
                tx.send(value).unwrap();
            })
        };

        // The consumer must still be blocked: nothing has been pushed yet.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        let start = Instant::now();
        queue.push(42u32);
        let value = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(value, 42);
        assert!(start.elapsed() < Duration::from_secs(1));
        consumer.join().unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_single_producer_single_consumer_preserves_order() {
        const COUNT: usize = 2_000;
        let queue = BlockingQueue::new();

        let received = thread::scope(|s| {
            s.spawn(|| {
                for i in 0..COUNT {
                    queue.push(i);
                }
            });
            let consumer = s.spawn(|| (0..COUNT).map(|_| queue.wait_and_pop()).collect::<Vec<_>>());
            consumer.join().unwrap()
        });

        assert_eq!(received, (0..COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn test_many_producers_many_consumers_no_loss_no_duplicates() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;
        const CONSUMERS: usize = 3;
        const PER_CONSUMER: usize = 400;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let queue = BlockingQueue::new();
        let delivered = AtomicUsize::new(0);

        let received = thread::scope(|s| {
            let queue = &queue;
            let delivered = &delivered;
            for p in 0..PRODUCERS {
                s.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.push(p * PER_PRODUCER + i);
                    }
                });
            }

            let consumers = (0..CONSUMERS)
                .map(|c| {
                    s.spawn(move || {
                        let mut taken = Vec::with_capacity(PER_CONSUMER);
                        for n in 0..PER_CONSUMER {
                            // Mix the blocking and the polling paths.
                            let value = if (n + c) % 3 == 0 {
                                match queue.try_pop() {
                                    Some(v) => v,
                                    None => queue.wait_and_pop(),
                                }
                            } else {
                                queue.wait_and_pop()
                            };
                            delivered.fetch_add(1, Ordering::SeqCst);
                            taken.push(value);
                        }
                        taken
                    })
                })
                .collect::<Vec<_>>();

            consumers
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        let delivered = delivered.load(Ordering::SeqCst);
        assert_eq!(delivered, CONSUMERS * PER_CONSUMER);
        assert_eq!(queue.len(), TOTAL - delivered);

        let remaining = queue.into_vec();
        let unique = received.iter().chain(remaining.iter()).collect::<HashSet<_>>();
        assert_eq!(unique.len(), TOTAL);
        assert_eq!(received.len() + remaining.len(), TOTAL);
    }

    #[test]
    fn test_multiple_waiters_each_get_one_item() {
        const WAITERS: usize = 6;
        let queue = BlockingQueue::new();

        let mut got = thread::scope(|s| {
            let queue = &queue;
            let waiters = (0..WAITERS)
                .map(|_| s.spawn(move || queue.wait_and_pop()))
                .collect::<Vec<_>>();
            thread::sleep(Duration::from_millis(20));
            for i in 0..WAITERS {
                queue.push(i);
            }
            waiters
                .into_iter()
                .map(|w| w.join().unwrap())
                .collect::<Vec<_>>()
        });

        got.sort();
        assert_eq!(got, (0..WAITERS).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wait_and_pop_unless_prefers_queued_items() {
        let queue = BlockingQueue::new();
        queue.push(7);
        assert_eq!(queue.wait_and_pop_unless(|| true), Some(7));
        assert_eq!(queue.wait_and_pop_unless(|| true), None);
    }

    #[test]
    fn test_wake_all_releases_stopped_waiters() {
        const WAITERS: usize = 4;
        let queue = BlockingQueue::<u32>::new();
        let stop = AtomicBool::new(false);

        let results = thread::scope(|s| {
            let queue = &queue;
            let stop = &stop;
            let waiters = (0..WAITERS)
                .map(|_| {
                    s.spawn(move || queue.wait_and_pop_unless(|| stop.load(Ordering::SeqCst)))
                })
                .collect::<Vec<_>>();
            thread::sleep(Duration::from_millis(20));
            stop.store(true, Ordering::SeqCst);
            queue.wake_all();
            waiters
                .into_iter()
                .map(|w| w.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(results, vec![None; WAITERS]);
    }
}
