//! Thread ownership and fork-join utilities.
//!
//! # Key Components
//!
//! ## Thread Ownership
//!
//! - [`owned_thread::OwnedThread`] - Exclusive, move-only owner of one OS thread that
//!   joins it when dropped
//! - [`owned_thread::ScopedOwnedThread`] - The same for threads spawned inside
//!   `std::thread::scope`, whose work may borrow local data
//!
//! ## Parallel Processing
//!
//! - [`parallel_reduce`] - Fork-join reduction of a slice with an associative
//!   operator, one thread per block
//!
//! # Failure Propagation
//!
//! Nothing a worker does crosses a thread boundary implicitly. Panics are caught by
//! the runtime and surfaced as `WorkerPanicked` when the owning handle is joined;
//! fallible reductions report the first failing block after all workers are joined.

pub mod owned_thread;
pub mod parallel_reduce;

pub use owned_thread::{OwnedThread, ScopedOwnedThread};
pub use parallel_reduce::{ReduceOptions, reduce, try_reduce};
