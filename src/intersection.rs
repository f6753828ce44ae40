//! The traffic-intersection synchronization exercise: a pairwise
//! compatibility predicate enforced by one mutex and one broadcast condvar.
//!
//! Grounded on `traffic_synch.c` (`check_constraints`/`right_turn`/
//! `intersection_before_entry`/`intersection_after_exit`). spec.md §9 drops
//! the original's `volatile`-qualified hand-rolled doubly-linked list in
//! favor of relying solely on the mutex's acquire/release ordering, so the
//! queue here is a plain `Vec` guarded by the same lock.

use alloc::vec::Vec;

use crate::config::MAX_VEHICLES;
use crate::sync::{Mutex, SpinCondvar};

/// One of the four compass directions a vehicle can arrive from or head
/// toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

/// A vehicle currently inside (or trying to enter) the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vehicle {
    pub origin: Direction,
    pub destination: Direction,
}

/// Is `v` making one of the four legal right turns?
fn is_right_turn(v: &Vehicle) -> bool {
    use Direction::*;
    matches!(
        (v.origin, v.destination),
        (West, South) | (South, East) | (East, North) | (North, West)
    )
}

/// May `a` and `b` share the intersection simultaneously (spec.md §4.6)?
fn compatible(a: &Vehicle, b: &Vehicle) -> bool {
    a.origin == b.origin
        || (a.origin == b.destination && b.origin == a.destination)
        || ((is_right_turn(a) || is_right_turn(b)) && a.destination != b.destination)
}

struct State {
    queue: Vec<Vehicle>,
}

/// One intersection: a mutex-guarded queue of vehicles currently inside,
/// plus a condvar broadcast on every exit.
pub struct Intersection {
    state: Mutex<Option<State>>,
    cv: SpinCondvar,
}

impl Intersection {
    pub const fn new() -> Self {
        Intersection {
            state: Mutex::new(None),
            cv: SpinCondvar::new(),
        }
    }

    /// Create the (initially empty) vehicle queue. Called once before the
    /// simulation starts.
    pub fn init(&self) {
        *self.state.lock() = Some(State { queue: Vec::new() });
    }

    /// Tear down the queue. Rust's ownership model frees the `Vec` the
    /// moment `state` is set back to `None`, so there's no separate
    /// lock/condvar-destruction step the way `intersection_sync_cleanup`
    /// has in C (noted in DESIGN.md).
    pub fn cleanup(&self) {
        *self.state.lock() = None;
    }

    /// Block until `(origin, destination)` may safely enter, then add it to
    /// the queue.
    pub fn before_entry(&self, origin: Direction, destination: Direction) {
        let vehicle = Vehicle { origin, destination };
        let mut guard = self.state.lock();
        loop {
            {
                let state = guard.as_ref().expect("Intersection::init must run first");
                if state.queue.iter().all(|other| compatible(other, &vehicle)) {
                    break;
                }
            }
            guard = self.cv.wait(guard, &self.state);
        }
        let state = guard.as_mut().expect("Intersection::init must run first");
        debug_assert!(state.queue.len() < MAX_VEHICLES);
        state.queue.push(vehicle);
    }

    /// Remove the first queue entry matching `(origin, destination)` and
    /// wake every blocked arrival to recheck compatibility.
    pub fn after_exit(&self, origin: Direction, destination: Direction) {
        {
            let mut guard = self.state.lock();
            let state = guard.as_mut().expect("Intersection::init must run first");
            if let Some(pos) = state
                .queue
                .iter()
                .position(|v| v.origin == origin && v.destination == destination)
            {
                state.queue.remove(pos);
            }
        }
        self.cv.notify_all();
    }
}

impl Default for Intersection {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide intersection singleton, matching the process-wide
/// coremap and process table (spec.md §9, "Global mutable state").
pub static INTERSECTION: Intersection = Intersection::new();
