//! Acquisition throughput across lock variants and back-off policies.
//!
//! Three workloads, mirroring the situations the variants were built for:
//!
//! - `uncontended`: one thread, plain lock/unlock pairs. Measures the cost
//!   of the claim-and-release path itself.
//! - `reentrant`: one thread holding the lock, re-acquiring to depth 4.
//!   This is the path the fused word and the padded counter optimize; no
//!   atomic read-modify-write should appear here at all.
//! - `contended`: several threads hammering short critical sections around
//!   a shared counter. Dominated by the back-off policy and by how much
//!   coherence traffic the state layout produces.

#![allow(missing_docs)]

use std::cell::Cell;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use criterion::measurement::WallTime;
use criterion::{criterion_group, criterion_main, Bencher, BenchmarkGroup, BenchmarkId, Criterion};

use relock::relax::{Exponential, NoSleep, Yield};
use relock::{padded, queue, sameline, RawLock};

const REENTRANT_DEPTH: usize = 4;
const CONTENDED_THREADS: usize = 4;
const CONTENDED_PAIRS: usize = 1_000;

fn uncontended<L: RawLock>(b: &mut Bencher<'_>) {
    let lock = L::new();
    b.iter(|| {
        lock.lock();
        // SAFETY: acquired on the previous line.
        unsafe { lock.unlock() };
    });
}

fn reentrant<L: RawLock>(b: &mut Bencher<'_>) {
    let lock = L::new();
    lock.lock();
    b.iter(|| {
        for _ in 0..REENTRANT_DEPTH {
            lock.lock();
        }
        for _ in 0..REENTRANT_DEPTH {
            // SAFETY: each release balances one acquisition just above.
            unsafe { lock.unlock() };
        }
    });
    // SAFETY: balances the acquisition before the measurement loop.
    unsafe { lock.unlock() };
}

/// The shared counter crosses thread boundaries only while the lock
/// serializes access to it.
struct SendCell(Arc<Cell<u64>>);

// SAFETY: every access in the workload happens inside a critical section.
unsafe impl Send for SendCell {}

fn contended<L>(b: &mut Bencher<'_>)
where
    L: RawLock + Send + Sync + 'static,
{
    b.iter_custom(|iters| {
        let lock = Arc::new(L::new());
        let counter = Arc::new(Cell::new(0_u64));
        let start = Instant::now();
        for _ in 0..iters {
            let handles: Vec<_> = (0..CONTENDED_THREADS)
                .map(|_| {
                    let lock = Arc::clone(&lock);
                    let counter = SendCell(Arc::clone(&counter));
                    thread::spawn(move || {
                        let counter = counter;
                        for _ in 0..CONTENDED_PAIRS {
                            lock.lock();
                            counter.0.set(counter.0.get() + 1);
                            // SAFETY: acquired just above.
                            unsafe { lock.unlock() };
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        }
        let elapsed = start.elapsed();
        assert_eq!(
            counter.get(),
            iters * (CONTENDED_THREADS * CONTENDED_PAIRS) as u64
        );
        elapsed
    });
}

// Criterion closures cannot be generic, so the variant/policy matrix is
// spelled out once and shared by the three workloads.
macro_rules! dispatch {
    ($run:ident, $variant:expr, $policy:expr) => {
        match ($variant, $policy) {
            ("sameline", "nosleep") => $run::<sameline::SamelineLock<NoSleep>>,
            ("sameline", "yields") => $run::<sameline::SamelineLock<Yield>>,
            ("sameline", "exponential") => $run::<sameline::SamelineLock<Exponential>>,
            ("padded", "nosleep") => $run::<padded::PaddedLock<NoSleep>>,
            ("padded", "yields") => $run::<padded::PaddedLock<Yield>>,
            ("padded", "exponential") => $run::<padded::PaddedLock<Exponential>>,
            ("queue", "nosleep") => $run::<queue::QueueLock<NoSleep>>,
            ("queue", "yields") => $run::<queue::QueueLock<Yield>>,
            ("queue", "exponential") => $run::<queue::QueueLock<Exponential>>,
            _ => unreachable!("unknown variant/policy pair"),
        }
    };
}

fn bench_matrix<M>(g: &mut BenchmarkGroup<'_, WallTime>, select: M)
where
    M: Fn(&'static str, &'static str) -> fn(&mut Bencher<'_>),
{
    for variant in ["sameline", "padded", "queue"] {
        for policy in ["nosleep", "yields", "exponential"] {
            let run = select(variant, policy);
            g.bench_function(BenchmarkId::new(variant, policy), |b| run(b));
        }
    }
}

fn bench_uncontended(c: &mut Criterion) {
    let mut g = c.benchmark_group("uncontended");
    bench_matrix(&mut g, |variant, policy| dispatch!(uncontended, variant, policy));
    g.finish();
}

fn bench_reentrant(c: &mut Criterion) {
    let mut g = c.benchmark_group("reentrant");
    bench_matrix(&mut g, |variant, policy| dispatch!(reentrant, variant, policy));
    g.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut g = c.benchmark_group("contended");
    bench_matrix(&mut g, |variant, policy| dispatch!(contended, variant, policy));
    g.finish();
}

criterion_group!(benches, bench_uncontended, bench_reentrant, bench_contended);
criterion_main!(benches);
