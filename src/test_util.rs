//! Test-only helpers shared by modules whose tests touch this crate's
//! process-wide singletons (the coremap, the process table). `cargo test`
//! runs test functions concurrently by default, but `COREMAP` and
//! `PROC_TABLE` are each a single global `static`, so tests that reset or
//! read them need to be serialized against each other the same way a real
//! kernel would serialize boot-time reinitialization against itself.

#![cfg(test)]

extern crate std;

use std::sync::{Mutex, MutexGuard};

static GLOBAL_STATE_LOCK: Mutex<()> = Mutex::new(());

/// Hold this for the duration of any test that resets or depends on a
/// crate-wide singleton, so concurrently-running tests in the same binary
/// don't observe each other's resets.
pub fn lock_globals() -> MutexGuard<'static, ()> {
    GLOBAL_STATE_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
