//! Physical frame allocator and coremap.
//!
//! Grounded on the teacher's `memory::paging::phys` module (a global
//! `Mutex<Option<Allocator>>`, bootstrapped once from a boot-reported
//! physical range) and on `dumbvm.c`'s `getppageIndex`/`free_kpages` for the
//! exact first-fit-with-run-length algorithm spec.md §4.1 requires.

use spin::Mutex;

use crate::config::PAGE_SIZE;
use crate::error::{Errno, Result};

/// An index into the coremap / managed frame range. Bounded arithmetic only
/// (spec.md §9, "Raw pointer arithmetic on frames"): every constructor takes
/// the coremap's length and refuses to build an index past it, and the only
/// way to move between indices is [`FrameIndex::advance`], which is bounded
/// the same way. `Coremap` never indexes its entry vector with a bare
/// `usize` once one of these has been constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameIndex(usize);

impl FrameIndex {
    /// Build the index for frame `idx`, or `None` if `idx` is not below
    /// `len` (the coremap's entry count).
    fn new(idx: usize, len: usize) -> Option<Self> {
        if idx < len {
            Some(FrameIndex(idx))
        } else {
            None
        }
    }

    /// Recover the index of the frame that starts at physical address
    /// `paddr` within a managed region based at `map_start`, bounded by
    /// `len`. `None` if `paddr` is not page-aligned to `map_start`, lies
    /// before it, or would land at or past `len`.
    fn from_addr(paddr: usize, map_start: usize, len: usize) -> Option<Self> {
        if paddr < map_start {
            return None;
        }
        let delta = paddr - map_start;
        if delta % PAGE_SIZE != 0 {
            return None;
        }
        FrameIndex::new(delta / PAGE_SIZE, len)
    }

    /// `self` advanced by `delta` frames, or `None` if that would run at or
    /// past `len`. The only arithmetic this type supports.
    fn advance(self, delta: usize, len: usize) -> Option<Self> {
        FrameIndex::new(self.0 + delta, len)
    }

    fn as_usize(self) -> usize {
        self.0
    }

    /// The physical base address of this frame, given the managed region's
    /// base address.
    pub fn base_addr(self, map_start: usize) -> usize {
        map_start + self.0 * PAGE_SIZE
    }
}

#[derive(Debug, Clone, Copy)]
struct CoremapEntry {
    available: bool,
    /// Meaningful only on the first frame of a run: the run's length.
    /// `-1` on free frames and on non-first frames of an allocated run.
    run_length: i64,
}

impl CoremapEntry {
    const fn free() -> Self {
        CoremapEntry {
            available: true,
            run_length: -1,
        }
    }
}

struct Coremap {
    entries: alloc::vec::Vec<CoremapEntry>,
    map_start: usize,
}

impl Coremap {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, idx: FrameIndex) -> &CoremapEntry {
        &self.entries[idx.as_usize()]
    }

    fn entry_mut(&mut self, idx: FrameIndex) -> &mut CoremapEntry {
        &mut self.entries[idx.as_usize()]
    }

    /// First-fit scan for a run of `n` contiguous available entries.
    fn find_run(&self, n: usize) -> Option<FrameIndex> {
        if n == 0 {
            return None;
        }
        let len = self.len();
        let mut run_start = None;
        let mut run_len = 0;
        let mut idx = FrameIndex::new(0, len);
        while let Some(i) = idx {
            if self.entry(i).available {
                if run_len == 0 {
                    run_start = Some(i);
                }
                run_len += 1;
                if run_len == n {
                    return run_start;
                }
            } else {
                run_len = 0;
            }
            idx = i.advance(1, len);
        }
        None
    }
}

/// The kernel's physical frame allocator. `None` until [`bootstrap`] runs;
/// before that, allocation is expected to fall through to the boot-time
/// `ram_stealmem` bump allocator, which lives outside this crate (spec.md
/// §4.1).
static COREMAP: Mutex<Option<Coremap>> = Mutex::new(None);

/// Initialize the frame allocator over the physical range `[low, high)`.
/// Reserves the leading frames needed to hold the coremap itself. Called
/// once, after RAM discovery, before any other frame-allocator function.
pub fn bootstrap(low: usize, high: usize) {
    let total_frames = (high - low) / PAGE_SIZE;

    let entry_size = core::mem::size_of::<CoremapEntry>();
    let reserved = (total_frames * entry_size + PAGE_SIZE - 1) / PAGE_SIZE;
    let managed_frames = total_frames - reserved;

    let map_start = low + reserved * PAGE_SIZE;

    let entries = alloc::vec![CoremapEntry::free(); managed_frames];

    *COREMAP.lock() = Some(Coremap { entries, map_start });
}

/// Has [`bootstrap`] run yet?
pub fn is_ready() -> bool {
    COREMAP.lock().is_some()
}

/// Allocate `n` contiguous frames. Returns the physical base address of the
/// run, or `Err(Errno::OutOfMemory)` if no run of that length is free.
/// Memory is *not* zeroed; callers that need zero pages must zero them
/// explicitly (spec.md §4.1).
pub fn alloc_frames(n: usize) -> Result<usize> {
    let mut guard = COREMAP.lock();
    let map = guard.as_mut().ok_or(Errno::OutOfMemory)?;

    let start = map.find_run(n).ok_or(Errno::OutOfMemory)?;
    let len = map.len();

    map.entry_mut(start).run_length = n as i64;
    for k in 0..n {
        let idx = start.advance(k, len).expect("run found by find_run fits within bounds");
        map.entry_mut(idx).available = false;
        if k > 0 {
            map.entry_mut(idx).run_length = -1;
        }
    }

    Ok(start.base_addr(map.map_start))
}

/// Free the run of frames starting at physical address `paddr`, which must
/// be the address previously returned by [`alloc_frames`] for that run.
///
/// # Panics
///
/// Panics if `paddr` is not page-aligned to the managed region, or is not
/// the base of a currently-allocated run. spec.md §4.1 calls this a fatal
/// assertion error, not a recoverable one.
pub fn free_frames(paddr: usize) {
    let mut guard = COREMAP.lock();
    let map = guard.as_mut().expect("free_frames before bootstrap");

    let len = map.len();
    let index = match FrameIndex::from_addr(paddr, map.map_start, len) {
        Some(i) => i,
        None => panic!(
            "free_frames: address {:#x} is not a frame base of the managed region",
            paddr
        ),
    };

    let entry = *map.entry(index);
    assert!(
        !entry.available && entry.run_length >= 1,
        "free_frames: address {:#x} (index {}) is not the base of a known run",
        paddr,
        index.as_usize()
    );

    let n = entry.run_length as usize;
    for k in 0..n {
        let idx = index.advance(k, len).expect("run recorded in the coremap fits within bounds");
        *map.entry_mut(idx) = CoremapEntry::free();
    }
}

/// Reset the coremap to `frames` free entries, backed by a real heap
/// allocation rather than [`bootstrap`]'s RAM-range arithmetic. Used by other
/// modules' tests (e.g. `addrspace`) that need a populated allocator but
/// don't care about the reserved-frames-for-the-coremap-itself computation.
///
/// Unlike real kernel physical addresses, the "physical" addresses this
/// allocator hands out during a host test run must actually be writable from
/// this process (`zero_frame`/`write_user_bytes` do raw pointer stores
/// through them), so this leaks a real `frames * PAGE_SIZE` buffer and points
/// `map_start` at it instead of a fixed low address no test process could
/// actually map.
#[cfg(test)]
pub fn bootstrap_for_test(frames: usize) {
    let entries = alloc::vec![CoremapEntry::free(); frames];
    let backing: &'static mut [u8] = alloc::vec![0u8; frames * PAGE_SIZE].leak();
    *COREMAP.lock() = Some(Coremap {
        entries,
        map_start: backing.as_mut_ptr() as usize,
    });
}
