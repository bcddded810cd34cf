//! Reentrant lock variant built on a queue of per-thread waiters.
//!
//! Instead of contending on one shared word, waiters line up behind an
//! atomic tail pointer and each spins on a flag inside its own queue node,
//! in the style of the Mellor-Crummey and Scott lock. Handover is a single
//! store into the successor's node, so the lock word never becomes a
//! coherence hot spot and waiters are served in FIFO order.
//!
//! Queue nodes live in thread local storage, one per (thread, lock) pair,
//! so the reentrant fast path touches nothing shared and a thread may hold
//! any number of queue locks at once. A node's `waiting` flag doubles as a
//! depth channel: while the holder is reentrant it publishes its current
//! depth there, which the adaptive back-off policy reads as its hint.
//!
//! The lock is generic over the back-off policy. See the [`relax`] module
//! for the provided policies, and the alias modules below for ready-made
//! `Mutex` types.
//!
//! [`relax`]: crate::relax

use core::cell::RefCell;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::{AtomicPtr, AtomicU32, Ordering};
use crate::cfg::cell::Cell;
use crate::cfg::hint;
use crate::lock::RawLock;
use crate::relax::Relax;

/// Lock granted; any other `waiting` value is the holder's depth hint.
const GRANTED: u32 = 0;

/// A queue node, owned by one thread and enqueued on at most one lock.
struct Node {
    /// The next waiter, linked by the successor itself after it swaps the
    /// tail.
    next: AtomicPtr<Node>,
    /// [`GRANTED`] once the predecessor hands the lock over.
    waiting: AtomicU32,
    /// Outstanding acquisitions; thread private, so no atomics needed.
    counter: CachePadded<Cell<u32>>,
}

impl Node {
    fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            waiting: AtomicU32::new(GRANTED),
            counter: CachePadded::new(Cell::new(0)),
        }
    }
}

crate::cfg::thread::thread_local! {
    // One node per lock this thread has ever touched, keyed by the lock's
    // address. Boxed, so addresses stay stable while the vector grows.
    static NODES: RefCell<Vec<(usize, Box<Node>)>> = RefCell::new(Vec::new())
}

/// Returns this thread's node for the lock at `key`, allocating on first
/// contact.
///
/// A node outlives every acquisition it is used for: it is dropped only
/// at thread exit, when no lock can still reference it.
fn local_node(key: usize) -> NonNull<Node> {
    NODES.with(|nodes| {
        let mut nodes = nodes.borrow_mut();
        if let Some((_, node)) = nodes.iter().find(|(k, _)| *k == key) {
            return NonNull::from(&**node);
        }
        let node = Box::new(Node::new());
        let ptr = NonNull::from(&*node);
        nodes.push((key, node));
        ptr
    })
}

/// A reentrant lock whose waiters queue up and spin on their own flags.
///
/// This is a raw lock: it protects no data of its own. Wrap it in a
/// [`ReentrantMutex`] (see the alias modules in this module) unless you
/// are pairing it with external state by hand.
///
/// [`ReentrantMutex`]: crate::ReentrantMutex
pub struct QueueLock<R> {
    /// Null when the lock is free and no waiters exist.
    tail: AtomicPtr<Node>,
    relax: PhantomData<R>,
}

// SAFETY: Shared state is the atomic tail plus the intrusive links between
// nodes; a node's non-atomic counter is only touched by its owning thread.
unsafe impl<R> Send for QueueLock<R> {}
unsafe impl<R> Sync for QueueLock<R> {}

impl<R> QueueLock<R> {
    fn node(&self) -> NonNull<Node> {
        local_node(self as *const Self as usize)
    }

    /// Publishes the holder's current depth to a linked successor.
    ///
    /// Any non-zero value keeps the successor waiting, so this only ever
    /// runs while the depth is positive.
    fn publish_depth(node: &Node, depth: u32) {
        debug_assert!(depth > 0);
        let next = node.next.load(Ordering::Acquire);
        if !next.is_null() {
            // SAFETY: A linked successor stays enqueued, and so alive,
            // until this thread hands the lock over.
            unsafe { (*next).waiting.store(depth, Ordering::Relaxed) };
        }
    }

    /// Prepares this thread's idle node for a fresh acquisition.
    fn arm(node: &Node) {
        debug_assert_eq!(node.counter.get(), 0);
        node.counter.set(1);
        node.next.store(ptr::null_mut(), Ordering::Relaxed);
        node.waiting.store(1, Ordering::Relaxed);
    }
}

unsafe impl<R: Relax> RawLock for QueueLock<R> {
    fn new() -> Self {
        Self { tail: AtomicPtr::new(ptr::null_mut()), relax: PhantomData }
    }

    fn lock(&self) {
        // SAFETY: The node belongs to this thread and lives until thread
        // exit; see `local_node`.
        let node = unsafe { self.node().as_ref() };
        let depth = node.counter.get();
        if depth > 0 {
            node.counter.set(depth + 1);
            Self::publish_depth(node, depth + 1);
            return;
        }
        Self::arm(node);
        let this = NonNull::from(node).as_ptr();
        let pred = self.tail.swap(this, Ordering::AcqRel);
        if pred.is_null() {
            // Empty queue, the lock was free and is now ours.
            node.waiting.store(GRANTED, Ordering::Relaxed);
            return;
        }
        // SAFETY: The predecessor cannot leave the queue before it has
        // granted the lock onward, and granting requires seeing this link.
        unsafe { (*pred).next.store(this, Ordering::Release) };
        let mut relax = R::new();
        loop {
            let hint = node.waiting.load(Ordering::Acquire);
            if hint == GRANTED {
                return;
            }
            relax.relax(hint);
        }
    }

    fn try_lock(&self) -> bool {
        // SAFETY: see `lock`.
        let node = unsafe { self.node().as_ref() };
        let depth = node.counter.get();
        if depth > 0 {
            node.counter.set(depth + 1);
            Self::publish_depth(node, depth + 1);
            return true;
        }
        Self::arm(node);
        let this = NonNull::from(node).as_ptr();
        // Unlike `lock`, never enqueue: claim the tail only if the queue
        // is empty, so a failed attempt leaves no trace for a successor
        // to trip over.
        let claimed = self
            .tail
            .compare_exchange(ptr::null_mut(), this, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        if claimed {
            node.waiting.store(GRANTED, Ordering::Relaxed);
        } else {
            node.counter.set(0);
        }
        claimed
    }

    unsafe fn unlock(&self) {
        // SAFETY: see `lock`.
        let node = unsafe { self.node().as_ref() };
        let depth = node.counter.get();
        debug_assert!(depth > 0, "released by a thread that does not hold the lock");
        node.counter.set(depth - 1);
        if depth > 1 {
            Self::publish_depth(node, depth - 1);
            return;
        }
        let this = NonNull::from(node).as_ptr();
        let mut next = node.next.load(Ordering::Acquire);
        if next.is_null() {
            if self
                .tail
                .compare_exchange(this, ptr::null_mut(), Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            // A successor has swapped itself behind us but has not linked
            // yet; its store is imminent.
            loop {
                next = node.next.load(Ordering::Acquire);
                if !next.is_null() {
                    break;
                }
                hint::spin_loop();
            }
        }
        // SAFETY: A linked successor stays enqueued, and so alive, until
        // this store grants it the lock.
        unsafe { (*next).waiting.store(GRANTED, Ordering::Release) };
    }

    fn is_locked(&self) -> bool {
        !self.tail.load(Ordering::Relaxed).is_null()
    }
}

/// A queue [`ReentrantMutex`] wired to a chosen back-off policy.
///
/// [`ReentrantMutex`]: crate::ReentrantMutex
pub type Mutex<T, R> = crate::lock::ReentrantMutex<T, QueueLock<R>>;

/// The guard type matching [`Mutex`].
pub type MutexGuard<'a, T, R> = crate::lock::ReentrantMutexGuard<'a, T, QueueLock<R>>;

/// A queue lock that spins in a tight loop while waiting.
pub mod nosleep {
    use crate::relax::NoSleep;

    /// A queue [`Mutex`] with the [`NoSleep`] back-off policy.
    ///
    /// # Example
    ///
    /// ```
    /// use relock::queue::nosleep::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 0);
    /// ```
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, NoSleep>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, NoSleep>;
}

/// A queue lock that yields its time slice while waiting.
pub mod yields {
    use crate::relax::Yield;

    /// A queue [`Mutex`] with the [`Yield`] back-off policy.
    ///
    /// # Example
    ///
    /// ```
    /// use relock::queue::yields::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// let guard = mutex.lock();
    /// assert_eq!(*guard, 0);
    /// ```
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Yield>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Yield>;
}

/// A queue lock that spins without power-down hints while waiting.
pub mod loops {
    use crate::relax::Loop;

    /// A queue [`Mutex`] with the [`Loop`] back-off policy.
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Loop>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Loop>;
}

/// A queue lock that backs off exponentially while waiting.
pub mod exponential {
    use crate::relax::Exponential;

    /// A queue [`Mutex`] with the [`Exponential`] back-off policy.
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Exponential>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Exponential>;
}

/// A queue lock whose waiting scales with the holder's published depth.
pub mod adaptive {
    use crate::relax::Adaptive;

    /// A queue [`Mutex`] with the [`Adaptive`] back-off policy.
    ///
    /// A reentrant holder publishes its depth through the first waiter's
    /// flag, which is the hint this policy consumes.
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Adaptive>;

    /// The guard type matching [`Mutex`].
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Adaptive>;
}

#[cfg(all(not(loom), test))]
mod test {
    use crate::test::tests;

    type Mutex<T> = super::yields::Mutex<T>;

    #[test]
    fn lots_and_lots_lock() {
        tests::lots_and_lots_lock::<Mutex<_>>();
    }

    #[test]
    fn lots_and_lots_reentrant() {
        tests::lots_and_lots_reentrant::<Mutex<_>>();
    }

    #[test]
    fn smoke() {
        tests::smoke::<Mutex<_>>();
    }

    #[test]
    fn reentrancy_depth() {
        tests::reentrancy_depth::<Mutex<_>>();
    }

    #[test]
    fn no_self_deadlock() {
        tests::no_self_deadlock::<Mutex<_>>();
    }

    #[test]
    fn partial_release_keeps_lock() {
        tests::partial_release_keeps_lock::<Mutex<_>>();
    }

    #[test]
    fn mutual_exclusion_handover() {
        tests::mutual_exclusion_handover::<Mutex<_>>();
    }

    #[test]
    fn message_passing() {
        tests::message_passing::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_debug() {
        tests::test_mutex_debug::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_from() {
        tests::test_mutex_from::<Mutex<_>>();
    }

    #[test]
    fn test_mutex_default() {
        tests::test_mutex_default::<Mutex<_>>();
    }

    #[test]
    fn test_get_mut() {
        tests::test_get_mut::<Mutex<_>>();
    }

    #[test]
    fn test_lock_arc_nested() {
        tests::test_lock_arc_nested::<Mutex<_>, Mutex<_>>();
    }

    #[test]
    fn two_queue_locks_one_thread() {
        tests::test_lock_arc_nested::<Mutex<_>, super::exponential::Mutex<_>>();
    }

    #[test]
    fn test_lock_arc_access_in_unwind() {
        tests::test_lock_arc_access_in_unwind::<Mutex<_>>();
    }

    #[test]
    fn test_lock_unsized() {
        tests::test_lock_unsized::<super::nosleep::Mutex<_>>();
    }

    #[test]
    fn counter_exact_under_contention() {
        tests::counter_exact_under_contention::<super::exponential::Mutex<_>>();
    }

    #[test]
    fn nested_pairs_under_contention() {
        tests::nested_pairs_under_contention::<super::adaptive::Mutex<_>>();
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;

    type Mutex<T> = super::yields::Mutex<T>;

    #[test]
    fn lock_join() {
        models::lock_join::<Mutex<_>>();
    }

    #[test]
    fn reentrant_join() {
        models::reentrant_join::<Mutex<_>>();
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join::<Mutex<_>>();
    }
}
