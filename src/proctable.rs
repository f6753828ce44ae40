//! The global process table: one slot per PID, each carrying just enough
//! state to implement `waitpid`/`_exit` rendezvous.
//!
//! Grounded on `proctable.c`'s `proctable_add`/`proctable_get`/
//! `proctable_update`/`proctable_remove`, and on the teacher's
//! `cap::CAPABILITY_REGISTRY` for the "global `Mutex<Option<_>>`, explicit
//! `init`" shape (see `frame.rs`'s `COREMAP` for the same idiom). Per
//! spec.md §9's cyclic-ownership note, a node does *not* own the process it
//! describes: it only ever holds the PID, the parent PID, and the exit
//! rendezvous. The process itself (`process::Process`) is owned by whatever
//! called into this table.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::config::{PID_MAX, PID_MIN, PID_TABLE_SIZE};
use crate::error::{Errno, Result};
use crate::sync::{Mutex, MutexGuard, SpinCondvar};

/// The fields guarded together by a node's exit-lock (spec.md §4.4). `exited`
/// itself lives outside this struct, as a lock-free `AtomicBool` on the node
/// (see `ProcTableNode::exited` below): `proctable::update` needs to read a
/// child's exit flag while already holding the table lock and, for a parent
/// and child racing through exit concurrently, the parent must never have to
/// take the child's exit-lock to do it (that would invert spec.md §5's
/// mandated lock order, table-lock then per-node exit-lock, into an ABBA
/// deadlock). The original's `proctable_update` reads `proctable[i]->exited`
/// the same way, with no lock at all (`proctable.c`).
pub struct ExitState {
    pub exitcode: i32,
}

/// One process table slot. PIDs are reused once a node is removed, so this
/// type carries no identity beyond what's needed for the wait/exit
/// protocol.
pub struct ProcTableNode {
    pid: i32,
    parent_pid: AtomicI32,
    exited: AtomicBool,
    exit: Mutex<ExitState>,
    exitcv: SpinCondvar,
}

impl ProcTableNode {
    /// This node's own PID (fixed for the node's lifetime).
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// This node's current parent PID, or `-1` if orphaned.
    pub fn parent_pid(&self) -> i32 {
        self.parent_pid.load(Ordering::Acquire)
    }

    pub(crate) fn set_parent(&self, parent_pid: i32) {
        self.parent_pid.store(parent_pid, Ordering::Release);
    }

    /// Has this process exited yet? A lock-free read of the atomic flag, not
    /// a second node's exit-lock, so `proctable::update` can call this while
    /// still holding the table lock without risking an ABBA deadlock against
    /// that child concurrently exiting and holding its own exit-lock.
    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Block until this node is marked exited, then return its exit code.
    /// Tolerant of the spurious wakeups `SpinCondvar` can produce (loops on
    /// the predicate, per spec.md §4.4's "waiters hold the exit-lock across
    /// the wait").
    pub fn wait_for_exit(&self) -> i32 {
        let mut guard = self.exit.lock();
        while !self.is_exited() {
            guard = self.exitcv.wait(guard, &self.exit);
        }
        guard.exitcode
    }

    /// Acquire the exit-lock. Exposed (crate-private) so `process::exit` can
    /// set `exitcode`, mark the node exited, call `proctable::update`, and
    /// broadcast, all while holding it, exactly the nesting `sys__exit` uses.
    pub(crate) fn exit_lock(&self) -> MutexGuard<'_, ExitState> {
        self.exit.lock()
    }

    /// Mark this node exited. Called by `process::exit` while still holding
    /// `exit_lock()`'s guard, so spec.md §5's ordering invariant ("`exited`
    /// must become visible under the exit-lock before broadcasting") holds:
    /// the store below and the `exitcode` write made under the same guard
    /// are both visible to any waiter by the time `notify_exit` runs.
    pub(crate) fn mark_exited(&self) {
        self.exited.store(true, Ordering::Release);
    }

    pub(crate) fn notify_exit(&self) {
        self.exitcv.notify_all();
    }
}

struct Table {
    slots: Vec<Option<Arc<ProcTableNode>>>,
}

/// The process table singleton. `None` until [`init`] runs.
static PROC_TABLE: Mutex<Option<Table>> = Mutex::new(None);

/// Initialize an empty process table. Called once during boot, before any
/// process is created.
pub fn init() {
    let slots = alloc::vec![None; PID_TABLE_SIZE];
    *PROC_TABLE.lock() = Some(Table { slots });
}

fn index_of(pid: i32) -> Option<usize> {
    if pid < PID_MIN || pid > PID_MAX {
        None
    } else {
        Some((pid - PID_MIN) as usize)
    }
}

/// Allocate a fresh PID and register a node for it, parent unset (`-1`).
/// First-fit linear scan over the slot array, matching `proctable_add`.
pub fn add() -> Result<Arc<ProcTableNode>> {
    let mut guard = PROC_TABLE.lock();
    let table = guard.as_mut().expect("proctable::init must run before proctable::add");

    for (i, slot) in table.slots.iter_mut().enumerate() {
        if slot.is_none() {
            let node = Arc::new(ProcTableNode {
                pid: PID_MIN + i as i32,
                parent_pid: AtomicI32::new(-1),
                exited: AtomicBool::new(false),
                exit: Mutex::new(ExitState { exitcode: -1 }),
                exitcv: SpinCondvar::new(),
            });
            *slot = Some(node.clone());
            return Ok(node);
        }
    }

    Err(Errno::NoFreePid)
}

/// Look up the node for `pid`, if any (bounds-checked).
pub fn get(pid: i32) -> Option<Arc<ProcTableNode>> {
    let idx = index_of(pid)?;
    let guard = PROC_TABLE.lock();
    let table = guard.as_ref()?;
    table.slots.get(idx)?.clone()
}

/// Called by a process as it exits: reap every child whose `parent == pid`
/// and which has already exited (it was never `waitpid`'d), and orphan
/// (`parent = -1`) every child that's still running, so that child frees
/// its own PID at its own exit instead of leaking it (spec.md §4.4,
/// scenarios S2/S3).
pub fn update(pid: i32) {
    let mut guard = PROC_TABLE.lock();
    let table = guard.as_mut().expect("proctable::init must run before proctable::update");

    for slot in table.slots.iter_mut() {
        let reap = match slot.as_ref() {
            Some(node) if node.parent_pid() == pid => {
                if node.is_exited() {
                    true
                } else {
                    node.set_parent(-1);
                    false
                }
            }
            _ => false,
        };
        if reap {
            *slot = None;
        }
    }
}

/// Remove `pid`'s node outright, reclaiming the PID. A no-op if `pid` has no
/// node (already removed, or out of range).
pub fn remove(pid: i32) {
    if let Some(idx) = index_of(pid) {
        let mut guard = PROC_TABLE.lock();
        if let Some(table) = guard.as_mut() {
            table.slots[idx] = None;
        }
    }
}
