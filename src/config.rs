//! Machine geometry and table-size constants.
//!
//! The teacher hardcodes values like this rather than reading them from a
//! config file (see `memory::paging::KERNEL_HEAP_START` upstream); this crate
//! follows suit; these constants describe *spec-mandated* geometry, not
//! something a deployer would tune.

/// Size of one physical/virtual page frame, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Mask that clears the intra-page offset from an address.
pub const PAGE_FRAME_MASK: usize = !(PAGE_SIZE - 1);

/// Number of fixed-size pages backing every process's user stack.
pub const STACKPAGES: usize = 12;

/// Top of user address space; the user stack occupies
/// `[USERSTACK - STACKPAGES*PAGE_SIZE, USERSTACK)`.
pub const USERSTACK: usize = 0x8000_0000;

/// Lowest valid PID.
pub const PID_MIN: i32 = 2;

/// Highest valid PID (inclusive).
pub const PID_MAX: i32 = 2048;

/// Number of PID slots in the process table.
pub const PID_TABLE_SIZE: usize = (PID_MAX - PID_MIN + 1) as usize;

/// Maximum total byte length of an `execv` argv, mirroring `ARG_MAX`.
pub const ARG_MAX: usize = 64 * 1024;

/// Maximum byte length of an `execv` program path, mirroring `PATH_MAX`.
pub const PATH_MAX: usize = 1024;

/// Number of hardware TLB slots a `Tlb` implementation is expected to expose.
pub const NUM_TLB: usize = 64;

/// Upper bound on vehicles simultaneously inside the intersection
/// (`NumThreads` in the original synchronization problem).
pub const MAX_VEHICLES: usize = 10;

/// Round `addr` down to the nearest page boundary.
pub const fn page_align_down(addr: usize) -> usize {
    addr & PAGE_FRAME_MASK
}

/// Round `size` up to a whole number of pages.
pub const fn page_align_up(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & PAGE_FRAME_MASK
}
