//! Loom model entry points shared by every lock variant.
//!
//! Data mutation inside the models goes through [`Cell`]s, matching the
//! shared access that reentrant guards hand out. Loom permutes the lock's
//! atomics; a broken acquire/release pairing shows up as a lost update in
//! the final assertion of some interleaving.
//!
//! [`Cell`]: core::cell::Cell

pub mod models {
    use core::cell::Cell;

    use ::loom::sync::Arc;
    use ::loom::{model, thread};

    use crate::test::LockThen;

    type Int = usize;

    /// Increments the shared integer with the lock held once.
    fn inc<L: LockThen<Target = Cell<Int>>>(lock: &Arc<L>) {
        lock.lock_then(|n| n.set(n.get() + 1));
    }

    /// Increments the shared integer with the lock held twice over.
    fn inc_reentrant<L: LockThen<Target = Cell<Int>>>(lock: &Arc<L>) {
        lock.lock_then(|_| inc(lock));
    }

    /// Gets the shared integer.
    fn get<L: LockThen<Target = Cell<Int>>>(lock: &Arc<L>) -> Int {
        lock.lock_then(|n| n.get())
    }

    /// Evaluates that concurrent `lock` calls will serialize all mutations
    /// against the shared data, therefore no data races.
    pub fn lock_join<L>()
    where
        L: LockThen<Target = Cell<Int>> + Send + Sync + 'static,
    {
        model(|| {
            let data = Arc::new(L::new(Cell::new(0)));
            let handle = {
                let data = Arc::clone(&data);
                thread::spawn(move || inc(&data))
            };
            inc(&data);
            handle.join().unwrap();
            assert_eq!(get(&data), 2);
        });
    }

    /// Evaluates that reentrant acquisitions neither deadlock nor break
    /// the serialization of mutations.
    pub fn reentrant_join<L>()
    where
        L: LockThen<Target = Cell<Int>> + Send + Sync + 'static,
    {
        model(|| {
            let data = Arc::new(L::new(Cell::new(0)));
            let handle = {
                let data = Arc::clone(&data);
                thread::spawn(move || inc_reentrant(&data))
            };
            inc_reentrant(&data);
            handle.join().unwrap();
            assert_eq!(get(&data), 2);
        });
    }

    /// Evaluates that a failed `try_lock` leaves the lock in a state the
    /// holder can still release, and a successful one takes full effect.
    pub fn try_lock_join<L>()
    where
        L: LockThen<Target = Cell<Int>> + Send + Sync + 'static,
    {
        model(|| {
            let data = Arc::new(L::new(Cell::new(0)));
            let handle = {
                let data = Arc::clone(&data);
                thread::spawn(move || {
                    data.try_lock_then(|n| n.set(n.get() + 1)).is_some()
                })
            };
            inc(&data);
            let tried = handle.join().unwrap();
            let expected = 1 + usize::from(tried);
            assert_eq!(get(&data), expected);
        });
    }
}
