//! Lock and condition-variable primitives used by the process table and the
//! intersection synchronizer.
//!
//! The teacher already reaches for `spin::Mutex` for every piece of shared
//! kernel state (`PHYS_MEM_ALLOC`, `CAPABILITY_REGISTRY`, ...), so this crate
//! keeps using it as the `Lock` type rather than inventing a new one. `spin`
//! has no condition variable, and a real one needs a scheduler to deschedule
//! waiters, which is explicitly out of scope here (see spec.md §1, "thread
//! scheduler" under external collaborators). `SpinCondvar` instead uses a
//! generation counter: `wait` drops the caller's guard, spins until the
//! counter changes, then reacquires the lock, exactly like the `while
//! (!exited) cv_wait(...)` loops in the original C, just without a real
//! blocking primitive underneath. A concrete kernel binary with a real
//! scheduler is free to swap in a descheduling condvar behind the same
//! `wait`/`notify_one`/`notify_all` shape.

pub use spin::{Mutex, MutexGuard};

use core::sync::atomic::{AtomicUsize, Ordering};

/// A condition variable usable from `#![no_std]` without a scheduler.
///
/// `notify_one` and `notify_all` are equivalent here (both simply bump the
/// generation counter, waking every current waiter to recheck its
/// predicate); this is a legal implementation of both because every caller
/// in this crate waits in a `while !predicate { cv.wait(...) }` loop, which
/// tolerates spurious wakeups.
pub struct SpinCondvar {
    generation: AtomicUsize,
}

impl SpinCondvar {
    /// Create a new, unsignaled condition variable.
    pub const fn new() -> Self {
        SpinCondvar {
            generation: AtomicUsize::new(0),
        }
    }

    /// Release `guard`, wait for a notification, then reacquire `lock`.
    ///
    /// As with a standard condvar, the caller must recheck its predicate
    /// after `wait` returns.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>, lock: &'a Mutex<T>) -> MutexGuard<'a, T> {
        let seen = self.generation.load(Ordering::Acquire);
        drop(guard);
        while self.generation.load(Ordering::Acquire) == seen {
            core::hint::spin_loop();
        }
        lock.lock()
    }

    /// Wake at least one waiter.
    pub fn notify_one(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for SpinCondvar {
    fn default() -> Self {
        Self::new()
    }
}
