//! Deadlock-free acquisition of several mutexes at once.
//!
//! Mutating two protected objects together (for example swapping the contents of
//! two stacks) requires holding both of their locks. If one thread locks `a` then
//! `b` while another locks `b` then `a`, both can block forever. The functions in
//! this module acquire every requested mutex in a single global order (by address),
//! regardless of the order in which the caller lists them, so any number of
//! threads using them concurrently cannot deadlock against each other.
//!
//! Guards are always returned in the caller's order.

use std::sync::{Mutex, MutexGuard, PoisonError};

use strand_common::{Result, error::Error};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// All structures in this crate keep their protected collection consistent at
/// every point where a panic could unwind, so a poisoned lock carries no torn state.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn address<T: ?Sized>(mutex: &Mutex<T>) -> usize {
    mutex as *const Mutex<T> as *const u8 as usize
}

/// Locks two mutexes without risking a lock-order deadlock.
///
/// # Errors
///
/// Returns `InvalidArgument` if `a` and `b` are the same mutex: locking it twice
/// from one thread would never return.
pub fn lock_pair<'a, A, B>(
    a: &'a Mutex<A>,
    b: &'a Mutex<B>,
) -> Result<(MutexGuard<'a, A>, MutexGuard<'a, B>)> {
    if address(a) == address(b) {
        return Err(Error::invalid_arg("lock_pair", "the same mutex was passed twice"));
    }
    Ok(lock_distinct_pair(a, b))
}

/// [`lock_pair`] for callers that have already ruled out `a` and `b` being the
/// same mutex.
pub(crate) fn lock_distinct_pair<'a, A, B>(
    a: &'a Mutex<A>,
    b: &'a Mutex<B>,
) -> (MutexGuard<'a, A>, MutexGuard<'a, B>) {
    debug_assert_ne!(address(a), address(b));
    if address(a) < address(b) {
        let guard_a = lock(a);
        let guard_b = lock(b);
        (guard_a, guard_b)
    } else {
        let guard_b = lock(b);
        let guard_a = lock(a);
        (guard_a, guard_b)
    }
}

/// Locks every mutex in `mutexes` without risking a lock-order deadlock.
///
/// The returned guards are in the same order as `mutexes`. An empty slice yields
/// an empty vector.
///
/// # Errors
///
/// Returns `InvalidArgument` if any mutex appears more than once.
pub fn lock_all<'a, T>(mutexes: &[&'a Mutex<T>]) -> Result<Vec<MutexGuard<'a, T>>> {
    let mut order = (0..mutexes.len()).collect::<Vec<_>>();
    order.sort_unstable_by_key(|&i| address(mutexes[i]));
    if order
        .windows(2)
        .any(|pair| address(mutexes[pair[0]]) == address(mutexes[pair[1]]))
    {
        return Err(Error::invalid_arg("lock_all", "the same mutex was passed twice"));
    }

    let mut slots = mutexes.iter().map(|_| None).collect::<Vec<_>>();
    for i in order {
        slots[i] = Some(lock(mutexes[i]));
    }
    Ok(slots.into_iter().flatten().collect())
}

/// Exchanges the values protected by two mutexes, holding both locks for the
/// duration of the swap. Swapping a mutex with itself is a no-op.
pub fn swap_contents<T>(a: &Mutex<T>, b: &Mutex<T>) {
    if std::ptr::eq(a, b) {
        return;
    }
    let (mut guard_a, mut guard_b) = lock_distinct_pair(a, b);
    std::mem::swap(&mut *guard_a, &mut *guard_b);
}
