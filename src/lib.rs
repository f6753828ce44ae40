//! Core virtual memory manager, address-space model, process table, and
//! process syscalls for a small teaching kernel, plus the traffic-intersection
//! synchronization exercise that exercises the same lock/condvar primitives.
//!
//! This crate stays `no_std` the way a kernel component must; a concrete
//! kernel binary supplies `alloc`'s global allocator and implements the
//! `hal` traits against its real hardware (interrupts, a software TLB, a
//! VFS, ELF loading, and carrying a forked child into user mode). Everything
//! below that boundary (frame allocation, address spaces, page faults, the
//! process table, fork/exec/wait/exit, and the intersection) is implemented
//! and tested here.

#![no_std]

extern crate alloc;

#[macro_use]
pub mod debug;

pub mod config;
pub mod error;
pub mod hal;
pub mod sync;

pub mod frame;
pub mod addrspace;
pub mod fault;

pub mod proctable;
pub mod process;

pub mod intersection;

#[cfg(test)]
mod test_util;
