//! A family of reentrant (recursive) mutual-exclusion locks built to beat a
//! conventional recursive mutex under contention and under same-thread
//! re-acquisition.
//!
//! A reentrant lock may be acquired again by the thread that already holds
//! it, any number of times, without deadlocking against itself; it frees up
//! only after a matching number of releases. The cost of that convenience
//! is usually an atomic read-modify-write plus a thread-id lookup on every
//! acquisition. The locks in this crate remove the read-modify-write from
//! the reentrant path entirely: once a thread owns a lock, re-acquiring it
//! is a plain load and a plain store, or a thread-local increment.
//!
//! ## Lock variants
//!
//! Three variants share one contract and differ in how they lay out state:
//!
//! - [`sameline`]: owner id and recursion depth fused into a single atomic
//!   word. Smallest footprint; contenders spin on the line the owner writes.
//! - [`padded`]: the contended word and the owner's recursion depth on
//!   separate cache lines, with an adaptive reentrancy metric folded into
//!   the word on release. The default choice.
//! - [`queue`]: a FIFO queue of waiters in the style of the
//!   Mellor-Crummey and Scott lock, each spinning on a flag in its own
//!   thread-local node.
//!
//! Every variant is generic over a back-off policy from the [`relax`]
//! module: [`NoSleep`], [`Yield`], [`Loop`], [`Exponential`] or
//! [`Adaptive`]. Policies only affect CPU waste and handover latency,
//! never the locking contract.
//!
//! ## Sharing data
//!
//! Because the owning thread may hold several guards at once, guards give
//! shared access only. Wrap the protected value in a [`Cell`] or
//! [`RefCell`] when critical sections must mutate:
//!
//! ```
//! use std::cell::Cell;
//!
//! use relock::Mutex;
//!
//! let mutex = Mutex::new(Cell::new(0));
//!
//! let outer = mutex.lock();
//! let inner = mutex.lock();
//! inner.set(inner.get() + 1);
//! drop(inner);
//! drop(outer);
//!
//! assert_eq!(mutex.lock().get(), 1);
//! ```
//!
//! ## Spinlock use cases
//!
//! It is noteworthy to mention that spinlocks are usually not what you
//! want. The majority of use cases are well covered by OS-based mutexes
//! like [`std::sync::Mutex`], which will notify the system that the
//! waiting thread should be parked, freeing the processor to work on
//! something else. The locks here never enter the kernel: contenders
//! spin, yield or briefly sleep, which pays off only when critical
//! sections are short or reentrant traffic dominates.
//!
//! [`Cell`]: core::cell::Cell
//! [`RefCell`]: core::cell::RefCell
//! [`NoSleep`]: relax::NoSleep
//! [`Yield`]: relax::Yield
//! [`Loop`]: relax::Loop
//! [`Exponential`]: relax::Exponential
//! [`Adaptive`]: relax::Adaptive

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::inline_always)]
#![warn(rust_2021_compatibility)]
#![warn(missing_docs)]

pub mod lock;
pub mod padded;
pub mod queue;
pub mod relax;
pub mod sameline;

pub(crate) mod cfg;
pub(crate) mod tid;
pub(crate) mod word;

#[cfg(test)]
pub(crate) mod test;

#[cfg(all(loom, test))]
pub(crate) mod loom;

pub use lock::{RawLock, ReentrantMutex, ReentrantMutexGuard};

/// The default reentrant mutex: the [`padded`] variant with
/// [`Exponential`] back-off.
///
/// [`Exponential`]: relax::Exponential
pub type Mutex<T> = padded::exponential::Mutex<T>;

/// The guard type matching [`Mutex`].
pub type MutexGuard<'a, T> = padded::exponential::MutexGuard<'a, T>;
