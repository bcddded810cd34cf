/// A trait for lock types that can hold user defined values.
pub trait LockNew {
    /// The type of the value this lock holds.
    type Target: ?Sized;

    /// Creates a new mutex in an unlocked state ready for use.
    fn new(value: Self::Target) -> Self
    where
        Self::Target: Sized;
}

/// A trait for lock types that can run closures against the protected data.
///
/// Closures get a shared reference, matching the reentrant guards of this
/// crate; tests that mutate place a [`Cell`] inside the lock.
///
/// [`Cell`]: core::cell::Cell
pub trait LockThen: LockNew {
    /// Acquires the mutex and then runs the closure against the protected
    /// data.
    fn lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&Self::Target) -> Ret;

    /// Attempts to acquire the mutex and, on success, runs the closure
    /// against the protected data.
    fn try_lock_then<F, Ret>(&self, f: F) -> Option<Ret>
    where
        F: FnOnce(&Self::Target) -> Ret;
}

/// A trait for lock types that can return a exclusive reference to the
/// underlying value.
#[cfg(not(loom))]
pub trait LockData: LockNew {
    /// Returns a mutable reference to the underlying data.
    fn get_mut(&mut self) -> &mut Self::Target;
}

#[cfg(all(not(loom), test))]
pub mod tests {
    // Partially derived from the test suite of Rust's Mutex implementation,
    // adapted to closure based locking and shared (reentrant) guards.
    //
    // Copyright 2014 The Rust Project Developers.
    //
    // Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
    // http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
    // <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
    // option. This file may not be copied, modified, or distributed
    // except according to those terms.

    use std::cell::Cell;
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    use super::{LockData, LockThen};

    type Int = u32;

    #[derive(Eq, PartialEq, Debug)]
    pub struct NonCopy(u32);

    const ITERS: Int = 1000;
    const CONCURRENCY: Int = 3;
    const EXPECTED_VALUE: Int = ITERS * CONCURRENCY * 2;

    /// Runs `f` with the lock held `depth` times over.
    fn with_depth<L, F>(lock: &L, depth: usize, f: F)
    where
        L: LockThen,
        F: FnOnce(&L::Target),
    {
        lock.lock_then(|data| match depth {
            0 | 1 => f(data),
            _ => with_depth(lock, depth - 1, f),
        });
    }

    fn inc<L: LockThen<Target = Cell<Int>>>(data: &Arc<L>) {
        data.lock_then(|n| n.set(n.get() + 1));
    }

    fn inc_for<L: LockThen<Target = Cell<Int>>>(data: &Arc<L>) {
        for _ in 0..ITERS {
            inc::<L>(data);
        }
    }

    fn inc_reentrant_for<L: LockThen<Target = Cell<Int>>>(data: &Arc<L>) {
        for _ in 0..ITERS {
            data.lock_then(|_| inc::<L>(data));
        }
    }

    fn lots_and_lots<L>(f: fn(&Arc<L>)) -> Int
    where
        L: LockThen<Target = Cell<Int>> + Send + Sync + 'static,
    {
        let data = Arc::new(L::new(Cell::new(0)));
        let (tx, rx) = channel();
        for _ in 0..CONCURRENCY {
            let data1 = Arc::clone(&data);
            let tx2 = tx.clone();
            thread::spawn(move || {
                f(&data1);
                tx2.send(()).unwrap();
            });
            let data2 = Arc::clone(&data);
            let tx2 = tx.clone();
            thread::spawn(move || {
                f(&data2);
                tx2.send(()).unwrap();
            });
        }

        drop(tx);
        for _ in 0..2 * CONCURRENCY {
            rx.recv().unwrap();
        }
        data.lock_then(|n| n.get())
    }

    pub fn lots_and_lots_lock<L>()
    where
        L: LockThen<Target = Cell<Int>> + Send + Sync + 'static,
    {
        let value = lots_and_lots(inc_for::<L>);
        assert_eq!(value, EXPECTED_VALUE);
    }

    pub fn lots_and_lots_reentrant<L>()
    where
        L: LockThen<Target = Cell<Int>> + Send + Sync + 'static,
    {
        let value = lots_and_lots(inc_reentrant_for::<L>);
        assert_eq!(value, EXPECTED_VALUE);
    }

    pub fn smoke<L>()
    where
        L: LockThen<Target = Int>,
    {
        let mutex = L::new(1);
        mutex.lock_then(|_| ());
        mutex.lock_then(|_| ());
    }

    /// A single thread may stack up acquisitions arbitrarily deep; the lock
    /// frees up only once the outermost scope unwinds.
    pub fn reentrancy_depth<L>()
    where
        L: LockThen<Target = Cell<Int>>,
    {
        let mutex = L::new(Cell::new(0));
        for _ in 0..ITERS {
            with_depth(&mutex, 4, |n| n.set(n.get() + 1));
        }
        // Fully released: a plain try must succeed again.
        let value = mutex.try_lock_then(|n| n.get());
        assert_eq!(value, Some(ITERS));
    }

    /// The owning thread never blocks itself, not even through `try_lock`.
    pub fn no_self_deadlock<L>()
    where
        L: LockThen<Target = Int>,
    {
        let mutex = L::new(42);
        let reentered = mutex.lock_then(|_| mutex.try_lock_then(|n| *n));
        assert_eq!(reentered, Some(42));
    }

    /// Releasing some, but not all, acquisitions keeps other threads out;
    /// the final release lets them in.
    pub fn partial_release_keeps_lock<L>()
    where
        L: LockThen<Target = Int> + Send + Sync + 'static,
    {
        let mutex = Arc::new(L::new(0));
        let (ready_tx, ready_rx) = channel();
        let (go_tx, go_rx) = channel();

        let holder = {
            let mutex = Arc::clone(&mutex);
            thread::spawn(move || {
                mutex.lock_then(|_| {
                    // Acquired twice, released once: still ours.
                    mutex.lock_then(|_| ());
                    ready_tx.send(()).unwrap();
                    go_rx.recv().unwrap();
                });
            })
        };

        ready_rx.recv().unwrap();
        assert!(mutex.try_lock_then(|_| ()).is_none());
        go_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(mutex.try_lock_then(|_| ()).is_some());
    }

    /// While one thread holds the lock every `try_lock` from another fails,
    /// and succeeds again once the holder is gone.
    pub fn mutual_exclusion_handover<L>()
    where
        L: LockThen<Target = Int> + Send + Sync + 'static,
    {
        let mutex = Arc::new(L::new(0));
        let (locked_tx, locked_rx) = channel();
        let (release_tx, release_rx) = channel();

        let holder = {
            let mutex = Arc::clone(&mutex);
            thread::spawn(move || {
                mutex.lock_then(|_| {
                    locked_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                });
            })
        };

        locked_rx.recv().unwrap();
        assert!(mutex.try_lock_then(|_| ()).is_none());
        release_tx.send(()).unwrap();
        holder.join().unwrap();
        while mutex.try_lock_then(|_| ()).is_none() {
            thread::yield_now();
        }
    }

    /// Writes made before a release are visible after the next acquisition.
    pub fn message_passing<L>()
    where
        L: LockThen<Target = Cell<u64>> + Send + Sync + 'static,
    {
        const PAYLOAD: u64 = 42;

        let mutex = Arc::new(L::new(Cell::new(0)));
        let writer = {
            let mutex = Arc::clone(&mutex);
            thread::spawn(move || mutex.lock_then(|payload| payload.set(PAYLOAD)))
        };

        loop {
            match mutex.try_lock_then(|payload| payload.get()) {
                // Not yet written, or the writer holds the lock right now.
                Some(0) | None => thread::yield_now(),
                Some(value) => {
                    assert_eq!(value, PAYLOAD);
                    break;
                }
            }
        }
        writer.join().unwrap();
    }

    /// K threads, M pairs each, no lost updates.
    pub fn counter_exact_under_contention<L>()
    where
        L: LockThen<Target = Cell<Int>> + Send + Sync + 'static,
    {
        const THREADS: Int = 4;
        const PAIRS: Int = 10_000;

        let data = Arc::new(L::new(Cell::new(0)));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let data = Arc::clone(&data);
                thread::spawn(move || {
                    for _ in 0..PAIRS {
                        inc::<L>(&data);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(data.lock_then(|n| n.get()), THREADS * PAIRS);
    }

    /// Deep nesting under contention still loses nothing.
    pub fn nested_pairs_under_contention<L>()
    where
        L: LockThen<Target = Cell<Int>> + Send + Sync + 'static,
    {
        const THREADS: Int = 8;
        const PAIRS: Int = 1000;
        const DEPTH: usize = 4;

        let data = Arc::new(L::new(Cell::new(0)));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let data = Arc::clone(&data);
                thread::spawn(move || {
                    for _ in 0..PAIRS {
                        with_depth(&*data, DEPTH, |n| n.set(n.get() + 1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(data.lock_then(|n| n.get()), THREADS * PAIRS);
    }

    pub fn test_mutex_debug<L>()
    where
        L: LockThen<Target = Int> + std::fmt::Debug + Send + Sync + 'static,
    {
        let value = 42;
        let mutex = Arc::new(L::new(value));
        let msg = format!("Mutex {{ data: {value:?} }}");
        assert_eq!(msg, format!("{mutex:?}"));
    }

    pub fn test_mutex_default<L>()
    where
        L: LockData<Target = Int> + Default,
    {
        let mut mutex: L = Default::default();
        assert_eq!(u32::default(), *mutex.get_mut());
    }

    pub fn test_mutex_from<L>()
    where
        L: LockData<Target = Int> + From<Int>,
    {
        let value = 42;
        let mut mutex = L::from(value);
        assert_eq!(value, *mutex.get_mut());
    }

    pub fn test_get_mut<M>()
    where
        M: LockData<Target = NonCopy>,
    {
        let mut mutex = M::new(NonCopy(10));
        *mutex.get_mut() = NonCopy(20);
        assert_eq!(*mutex.get_mut(), NonCopy(20));
    }

    pub fn test_lock_arc_nested<L1, L2>()
    where
        L1: LockThen<Target = Int> + Send + Sync + 'static,
        L2: LockThen<Target = Arc<L1>> + Send + Sync + 'static,
    {
        // Tests nested locks and access
        // to underlying data.
        let arc = Arc::new(L1::new(1));
        let arc2 = Arc::new(L2::new(arc));
        let (tx, rx) = channel();
        let _t = thread::spawn(move || {
            let val = arc2.lock_then(|inner| inner.lock_then(|n| *n));
            assert_eq!(val, 1);
            tx.send(()).unwrap();
        });
        rx.recv().unwrap();
    }

    pub fn test_lock_arc_access_in_unwind<L>()
    where
        L: LockThen<Target = Cell<Int>> + Send + Sync + 'static,
    {
        let arc = Arc::new(L::new(Cell::new(1)));
        let arc2 = arc.clone();
        let _ = thread::spawn(move || {
            struct Unwinder<T: LockThen<Target = Cell<Int>>> {
                i: Arc<T>,
            }
            impl<T: LockThen<Target = Cell<Int>>> Drop for Unwinder<T> {
                fn drop(&mut self) {
                    self.i.lock_then(|n| n.set(n.get() + 1));
                }
            }
            let _u = Unwinder { i: arc2 };
            panic!();
        })
        .join();
        let value = arc.lock_then(|n| n.get());
        assert_eq!(value, 2);
    }

    pub fn test_lock_unsized<L>()
    where
        L: LockThen<Target = [Cell<Int>; 3]>,
    {
        let lock: &L = &L::new([Cell::new(1), Cell::new(2), Cell::new(3)]);
        lock.lock_then(|d| {
            d[0].set(4);
            d[2].set(5);
        });
        let comp = [4, 2, 5];
        lock.lock_then(|d| {
            for (cell, expected) in d.iter().zip(comp) {
                assert_eq!(cell.get(), expected);
            }
        });
    }
}
