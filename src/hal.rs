//! Trait boundaries for the machine-specific collaborators spec.md §6 lists
//! as "must exist, not specified here": the TLB, interrupt masking, the VFS,
//! the ELF loader, and spawning a child's kernel thread into user mode.
//!
//! The teacher's own code leans on concrete external crates for the parts of
//! the machine it doesn't implement itself (`x86_64` for registers,
//! `elfloader` for ELF parsing); this crate does the analogous thing but
//! expresses the boundary as a Rust trait instead of a concrete crate,
//! because the real collaborator here (a MIPS software TLB, a VFS, a thread
//! scheduler) isn't one of the teacher's dependencies. A concrete kernel
//! binary implements these traits against its real hardware and passes them
//! in; `hal::mock` (test-only) implements them in memory so this crate's own
//! tests can exercise `vm`, `process`, and `proctable` end to end.

use crate::addrspace::AddressSpace;
use crate::error::{Errno, Result};

/// One TLB entry: `vaddr -> paddr`, plus the flags `vm_fault` cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub vaddr: usize,
    pub paddr: usize,
    pub valid: bool,
    /// Clear for region-1 (text) pages once `complete_load` has run.
    pub writable: bool,
}

impl TlbEntry {
    /// A TLB entry with no valid translation, used to invalidate a slot.
    pub const INVALID: TlbEntry = TlbEntry {
        vaddr: 0,
        paddr: 0,
        valid: false,
        writable: false,
    };
}

/// Stands in for `tlb_read`/`tlb_write`/`tlb_random`.
///
/// Implementations must guarantee that `read`/`write`/`write_random` are
/// atomic with respect to each other; this crate's callers mask interrupts
/// around the scan-then-write sequence (see [`InterruptGuard`]) but rely on
/// the implementation not to reenter from an interrupt handler on the same
/// CPU while a `Tlb` method is in progress.
pub trait Tlb {
    /// Number of slots this TLB exposes.
    fn num_entries(&mut self) -> usize;
    /// Read the entry at `index`.
    fn read(&mut self, index: usize) -> TlbEntry;
    /// Overwrite the entry at `index`.
    fn write(&mut self, index: usize, entry: TlbEntry);
    /// Overwrite a hardware-chosen victim slot.
    fn write_random(&mut self, entry: TlbEntry);
}

/// Stands in for `splhigh`/`splx`: an RAII guard that masks interrupts for
/// its lifetime and restores the prior mask on drop.
pub trait InterruptGuard {
    /// Mask interrupts at the highest priority level, returning a guard that
    /// restores the previous level when dropped.
    fn mask_high() -> Self
    where
        Self: Sized;
}

/// An open file handle, opaque to this crate.
pub struct VfsHandle(pub usize);

/// Stands in for `vfs_open`/`vfs_close`.
pub trait Vfs {
    fn open_read(&mut self, path: &str) -> Result<VfsHandle>;
    fn close(&mut self, handle: VfsHandle);
}

/// Stands in for `load_elf`: loads an already-open executable's segments
/// into `target` (defining its two loadable regions and populating them,
/// the way `load_elf` calls `as_define_region`/`as_prepare_load` internally
/// in the original) and reports the entry point. Does *not* call
/// `complete_load`, since that stays `execv`'s job: marking text read-only
/// is a property of the address space, not of loading bytes into it.
pub trait ElfLoader {
    fn load(&mut self, handle: &VfsHandle, target: &mut AddressSpace) -> Result<usize>;
}

/// What a freshly forked child's first instruction must observe: the
/// register pair `(v0, a3) = (0, 0)` and the program counter advanced past
/// the `fork` syscall instruction (`child_forkentry` in the original C).
#[derive(Debug, Clone, Copy)]
pub struct ChildEntry {
    pub return_regs: (usize, usize),
    pub pc_offset: usize,
}

/// Stands in for `thread_fork` + `curproc_setas` + `as_activate` +
/// `mips_usermode`: spawns the kernel thread that will carry the forked
/// child into user mode.
pub trait ProcessHost {
    fn spawn_child(&mut self, entry: ChildEntry) -> Result<()>;
}
