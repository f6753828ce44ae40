//! Error kinds shared by every subsystem in this crate.
//!
//! Mirrors the conventional UNIX errno values a real kernel binary would
//! return to user space; the mapping is fixed so a concrete `execv`/`waitpid`
//! syscall shim can hand `i32::from(err)` straight back to the trapframe.

/// An error kind common to the VM manager, address-space model, process
/// table and process syscalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// `EINVAL`: an argument was structurally invalid (bad fault type, bad
    /// `waitpid` options, ...).
    InvalidArgument,
    /// `EFAULT`: a user pointer was null or otherwise unusable.
    BadPointer,
    /// `ESRCH`: no process exists with the given PID.
    NoSuchProcess,
    /// `ECHILD`: the given PID is not a child of the calling process.
    NotAChild,
    /// `ENOMEM`: the frame allocator or a `kmalloc`-alike ran out of space.
    OutOfMemory,
    /// `E2BIG`: an argv buffer or path exceeded its maximum length.
    TooBig,
    /// A third `define_region` call, or any other operation this design
    /// deliberately limits to a fixed count.
    Unimplemented,
    /// A write fault on a page made read-only by `complete_load`.
    AccessViolation,
    /// A fault address does not fall in any region of the current address
    /// space.
    FaultUnmapped,
    /// The process table has no free PID slots (`ENPROC`).
    NoFreePid,
    /// `ENOENT`: a VFS path did not resolve.
    NoSuchFile,
}

impl Errno {
    /// The conventional UNIX errno value for this error kind.
    pub const fn to_raw(self) -> i32 {
        match self {
            Errno::InvalidArgument => 22,
            Errno::BadPointer => 14,
            Errno::NoSuchProcess => 3,
            Errno::NotAChild => 10,
            Errno::OutOfMemory => 12,
            Errno::TooBig => 7,
            Errno::Unimplemented => 89,
            Errno::AccessViolation => 13,
            Errno::FaultUnmapped => 14,
            Errno::NoFreePid => 19,
            Errno::NoSuchFile => 2,
        }
    }
}

impl From<Errno> for i32 {
    fn from(e: Errno) -> i32 {
        e.to_raw()
    }
}

impl core::fmt::Display for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Errno::InvalidArgument => "invalid argument",
            Errno::BadPointer => "bad pointer",
            Errno::NoSuchProcess => "no such process",
            Errno::NotAChild => "not a child of the calling process",
            Errno::OutOfMemory => "out of memory",
            Errno::TooBig => "argument list too long",
            Errno::Unimplemented => "unimplemented",
            Errno::AccessViolation => "access violation",
            Errno::FaultUnmapped => "fault address not mapped",
            Errno::NoFreePid => "no free pid",
            Errno::NoSuchFile => "no such file",
        };
        f.write_str(msg)
    }
}

/// Convenient alias used throughout this crate.
pub type Result<T> = core::result::Result<T, Errno>;
