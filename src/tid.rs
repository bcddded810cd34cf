//! Thread identity.
//!
//! Every OS thread that touches a lock gets a small, stable, process-unique
//! integer identity on first use. Identities are handed out by a process
//! wide counter and cached in thread local storage, so all but the very
//! first query are a plain TLS read. Id `0` is reserved to mean "no owner"
//! and is never allocated.

use core::num::NonZeroU32;

use crate::cfg::atomic::{AtomicU32, Ordering::Relaxed};

// Ids start at 1 and are never reused, not even after the thread exits.
#[cfg(not(all(loom, test)))]
static ALLOCATOR: AtomicU32 = AtomicU32::new(1);

#[cfg(all(loom, test))]
::loom::lazy_static! {
    static ref ALLOCATOR: AtomicU32 = AtomicU32::new(1);
}

crate::cfg::thread::thread_local! {
    static CURRENT: NonZeroU32 = allocate();
}

fn allocate() -> NonZeroU32 {
    let id = ALLOCATOR.fetch_add(1, Relaxed);
    NonZeroU32::new(id).expect("thread id space exhausted")
}

/// Returns the identity of the calling thread.
///
/// The first call on a given thread allocates the id; every later call is a
/// cached TLS read. Two live threads never share an identity.
pub(crate) fn current() -> NonZeroU32 {
    CURRENT.with(|id| *id)
}

#[cfg(all(not(loom), test))]
mod test {
    use std::thread;

    #[test]
    fn nonzero_and_stable() {
        let id = super::current();
        assert_eq!(id, super::current());
    }

    #[test]
    fn distinct_across_threads() {
        let mine = super::current();
        let theirs = thread::spawn(super::current).join().unwrap();
        assert_ne!(mine, theirs);
    }
}
