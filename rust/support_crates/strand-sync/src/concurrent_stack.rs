//! A mutex-protected LIFO stack.
//!
//! Every operation takes the internal lock for its full duration, and no
//! reference into the stored elements ever leaves a method: values are moved in
//! on [`push`](ConcurrentStack::push) and moved out on
//! [`pop`](ConcurrentStack::pop). This makes "check for empty, then pop" a single
//! atomic step instead of a racy pair of calls.

use std::sync::Mutex;

use strand_common::{Result, error::Error};

use crate::lock_set::{lock, lock_distinct_pair};

/// A thread-safe LIFO stack.
///
/// The stack is usually shared by reference (or through an `Arc`) between the
/// threads that push and pop. Ordering is LIFO with respect to a single thread's
/// sequential pushes and pops; pushes from different threads interleave in an
/// unspecified order.
pub struct ConcurrentStack<T> {
    items: Mutex<Vec<T>>,
}

impl<T> ConcurrentStack<T> {
    /// Creates an empty stack.
    pub fn new() -> ConcurrentStack<T> {
        ConcurrentStack {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Creates an empty stack with room for `capacity` elements before reallocating.
    pub fn with_capacity(capacity: usize) -> ConcurrentStack<T> {
        ConcurrentStack {
            items: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Pushes `value` on top of the stack.
    pub fn push(&self, value: T) {
        lock(&self.items).push(value);
    }

    /// Removes and returns the top element.
    ///
    /// # Errors
    ///
    /// Returns `EmptyStack` if the stack held no elements at the time of the call.
    /// The emptiness check and the removal happen under the same lock.
    pub fn pop(&self) -> Result<T> {
        self.try_pop().ok_or_else(Error::empty_stack)
    }

    /// Removes and returns the top element, or `None` if the stack is empty.
    pub fn try_pop(&self) -> Option<T> {
        lock(&self.items).pop()
    }

    /// Returns `true` if the stack was empty at the instant of the check.
    ///
    /// The answer may be stale as soon as this returns; use it only for
    /// best-effort decisions, never to decide whether `pop` will succeed.
    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// Returns the number of elements at the instant of the check. Advisory, like
    /// [`is_empty`](Self::is_empty).
    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    /// Exchanges the contents of `self` and `other`, holding both locks.
    ///
    /// Safe to call concurrently with `other.swap(self)`: the locks are taken in a
    /// fixed global order.
    pub fn swap(&self, other: &ConcurrentStack<T>) {
        if std::ptr::eq(self, other) {
            return;
        }
        let (mut mine, mut theirs) = lock_distinct_pair(&self.items, &other.items);
        std::mem::swap(&mut *mine, &mut *theirs);
    }

    /// Consumes the stack and returns its elements, bottom first.
    pub fn into_vec(self) -> Vec<T> {
        self.items
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T> Default for ConcurrentStack<T> {
    fn default() -> Self {
        ConcurrentStack::new()
    }
}

/// Copies the stack while holding the source's lock, so the copy never observes
/// a half-applied push or pop. The clone is fully independent of the source.
impl<T: Clone> Clone for ConcurrentStack<T> {
    fn clone(&self) -> Self {
        let items = lock(&self.items).clone();
        ConcurrentStack {
            items: Mutex::new(items),
        }
    }
}

impl<T> FromIterator<T> for ConcurrentStack<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        ConcurrentStack {
            items: Mutex::new(iter.into_iter().collect()),
        }
    }
}

impl<T> std::fmt::Debug for ConcurrentStack<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentStack")
            .field("len", &self.len())
            .finish()
    }
}
