//! Lock-protected containers for sharing mutable state between threads.
//!
//! Every structure in this crate owns its data and its lock. No method returns a
//! reference into the protected state and no lock is exposed to callers, so a
//! guard can never outlive the critical section it belongs to.
//!
//! # Key Components
//!
//! - [`concurrent_stack::ConcurrentStack`] - A mutex-protected LIFO stack
//! - [`blocking_queue::BlockingQueue`] - A FIFO queue with blocking and non-blocking
//!   consumption, built on a mutex and a condition variable
//! - [`rw_cache::ReadWriteCache`] - A key-value map allowing concurrent readers and
//!   exclusive writers
//! - [`quota::Quota`] - Quota-bounded producer/consumer loops over a `BlockingQueue`
//! - [`lock_set`] - Deadlock-free acquisition of several mutexes at once
//!
//! Structures are plain values: create one per use and share it by reference (or
//! `Arc`) with the threads that need it.

pub mod blocking_queue;
pub mod concurrent_stack;
pub mod lock_set;
pub mod quota;
pub mod rw_cache;

pub use blocking_queue::BlockingQueue;
pub use concurrent_stack::ConcurrentStack;
pub use quota::Quota;
pub use rw_cache::ReadWriteCache;
