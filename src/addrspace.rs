//! The per-process address space: two loadable regions plus a fixed-size
//! user stack, each backed by a page table of owned physical frames.
//!
//! Grounded on `dumbvm.c`'s `as_*` family (exact algorithms: region slot
//! assignment, zero-on-`prepare_load`, copy-via-`prepare_load`+memcpy) and on
//! the teacher's `memory::paging::VirtualMemoryRegion` for the
//! capability-ish "region with a start and a length" shape.

use alloc::vec;
use alloc::vec::Vec;

use crate::config::{page_align_down, page_align_up, PAGE_SIZE, STACKPAGES, USERSTACK};
use crate::error::{Errno, Result};
use crate::frame::{alloc_frames, free_frames};
use crate::hal::{InterruptGuard, Tlb, TlbEntry};

/// One virtual page's mapping: the kernel-accessible physical base of the
/// frame backing it. `None` until `prepare_load` (or `define_stack`)
/// allocates the frame.
#[derive(Debug, Clone, Copy)]
pub struct PageTableEntry {
    pub paddr: Option<usize>,
}

impl PageTableEntry {
    const fn empty() -> Self {
        PageTableEntry { paddr: None }
    }
}

/// One of the two loadable segments (`region1` is conventionally "text",
/// `region2` "data").
#[derive(Debug)]
pub struct Region {
    pub vbase: usize,
    pub npages: usize,
    pub ptable: Vec<PageTableEntry>,
}

/// Which region of an address space a faulting (or otherwise referenced)
/// virtual address falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Region1,
    Region2,
    Stack,
}

/// A process's view of virtual memory: two loadable regions and a fixed
/// stack region, each an owning page table over frames loaned by the frame
/// allocator (spec.md §3).
pub struct AddressSpace {
    pub region1: Option<Region>,
    pub region2: Option<Region>,
    pub stack: Vec<PageTableEntry>,
    /// False until `complete_load`; true thereafter. Once true, region1's
    /// pages are installed read-only.
    pub readonly_after_load: bool,
}

impl AddressSpace {
    /// A fresh, empty address space with neither region defined yet.
    pub fn create() -> Self {
        AddressSpace {
            region1: None,
            region2: None,
            stack: Vec::new(),
            readonly_after_load: false,
        }
    }

    /// Define a loadable region at `[vaddr, vaddr+size)`. May be called at
    /// most twice per address space; `r`/`w`/`x` are recorded as advisory
    /// only (spec.md §4.2: all pages are read/write until `complete_load`).
    pub fn define_region(
        &mut self,
        vaddr: usize,
        size: usize,
        _r: bool,
        _w: bool,
        _x: bool,
    ) -> Result<()> {
        let extra = vaddr & !page_align_down(vaddr);
        let vbase = page_align_down(vaddr);
        let npages = page_align_up(size + extra) / PAGE_SIZE;

        let region = Region {
            vbase,
            npages,
            ptable: vec![PageTableEntry::empty(); npages],
        };

        if self.region1.is_none() {
            self.region1 = Some(region);
            Ok(())
        } else if self.region2.is_none() {
            self.region2 = Some(region);
            Ok(())
        } else {
            Err(Errno::Unimplemented)
        }
    }

    /// Allocate and zero one frame for every page of `region1` and
    /// `region2`. Both regions must already be defined.
    pub fn prepare_load(&mut self) -> Result<()> {
        let r1 = self.region1.as_mut().ok_or(Errno::InvalidArgument)?;
        populate_and_zero(r1)?;
        let r2 = self.region2.as_mut().ok_or(Errno::InvalidArgument)?;
        populate_and_zero(r2)?;
        Ok(())
    }

    /// Mark region1 read-only from now on and flush the TLB so no stale
    /// writable entry for it survives.
    pub fn complete_load<G: InterruptGuard, T: Tlb>(&mut self, tlb: &mut T) {
        self.readonly_after_load = true;
        self.activate::<G, T>(tlb);
    }

    /// Allocate and zero the fixed-size user stack, returning the initial
    /// stack pointer (`USERSTACK`).
    ///
    /// Writes directly into `self.stack` (pre-sized to `STACKPAGES` empty
    /// entries) as each frame is allocated, rather than building a local
    /// table and assigning it on success: if `alloc_frames` fails partway
    /// through, the frames already recorded stay reachable through
    /// `self.stack`, so a caller's subsequent `destroy()` still frees them
    /// (spec.md §4.2) instead of leaking them.
    pub fn define_stack(&mut self) -> Result<usize> {
        self.stack = vec![PageTableEntry::empty(); STACKPAGES];
        for entry in self.stack.iter_mut() {
            let paddr = alloc_frames(1)?;
            zero_frame(paddr);
            entry.paddr = Some(paddr);
        }
        Ok(USERSTACK)
    }

    /// Invalidate every TLB entry. Called on `complete_load` and whenever
    /// this address space becomes the current one.
    ///
    /// Masks interrupts for the scan-and-write loop, matching `as_activate`/
    /// `as_complete_load` in `dumbvm.c`, both of which wrap the identical
    /// `tlb_write` loop in `splhigh()`/`splx()` (spec.md §5: "the TLB is
    /// mutated only with interrupts masked at maximum priority").
    pub fn activate<G: InterruptGuard, T: Tlb>(&self, tlb: &mut T) {
        let _guard = G::mask_high();
        let n = tlb.num_entries();
        for i in 0..n {
            tlb.write(i, TlbEntry::INVALID);
        }
    }

    /// No-op: dumbvm has nothing to do when an address space stops being
    /// current (spec.md §4.2).
    pub fn deactivate(&self) {}

    /// Free every frame owned by this address space's three page tables.
    pub fn destroy(self) {
        if let Some(r) = &self.region1 {
            for e in &r.ptable {
                if let Some(p) = e.paddr {
                    free_frames(p);
                }
            }
        }
        if let Some(r) = &self.region2 {
            for e in &r.ptable {
                if let Some(p) = e.paddr {
                    free_frames(p);
                }
            }
        }
        for e in &self.stack {
            if let Some(p) = e.paddr {
                free_frames(p);
            }
        }
    }

    /// Build a new address space mirroring `self`'s layout, with freshly
    /// allocated frames whose contents are byte-for-byte copies of `self`'s.
    pub fn copy(&self) -> Result<AddressSpace> {
        let mut new = AddressSpace::create();

        if let Some(r) = &self.region1 {
            new.region1 = Some(Region {
                vbase: r.vbase,
                npages: r.npages,
                ptable: vec![PageTableEntry::empty(); r.npages],
            });
        }
        if let Some(r) = &self.region2 {
            new.region2 = Some(Region {
                vbase: r.vbase,
                npages: r.npages,
                ptable: vec![PageTableEntry::empty(); r.npages],
            });
        }

        // `prepare_load` (mis)used to allocate the backing frames, just as
        // in the original `as_copy`.
        if new.region1.is_some() && new.region2.is_some() {
            if let Err(e) = new.prepare_load() {
                new.destroy();
                return Err(e);
            }
        }
        if let Err(e) = new.define_stack() {
            new.destroy();
            return Err(e);
        }

        copy_region_contents(self.region1.as_ref(), new.region1.as_ref());
        copy_region_contents(self.region2.as_ref(), new.region2.as_ref());
        copy_page_table(&self.stack, &new.stack);

        new.readonly_after_load = self.readonly_after_load;

        Ok(new)
    }

    /// Write `bytes` starting at user virtual address `vaddr`, via the
    /// kernel-visible alias of whichever frame(s) back it. Used by `execv`
    /// to lay out argv on a freshly defined stack before the process has
    /// ever run; this is not the same thing as a `copyout` into a *running*
    /// process's own pointer, which stays out of this crate's scope.
    pub fn write_user_bytes(&self, vaddr: usize, bytes: &[u8]) -> Result<()> {
        for (i, &b) in bytes.iter().enumerate() {
            let (_, paddr) = self.translate(vaddr + i).ok_or(Errno::FaultUnmapped)?;
            unsafe {
                core::ptr::write(paddr as *mut u8, b);
            }
        }
        Ok(())
    }

    /// Locate which region (if any) contains `vaddr`, and the physical
    /// address it currently maps to. `None` if `vaddr` falls outside every
    /// region (spec.md §4.3).
    pub fn translate(&self, vaddr: usize) -> Option<(RegionKind, usize)> {
        if let Some(r) = &self.region1 {
            if let Some(p) = region_translate(r, vaddr) {
                return Some((RegionKind::Region1, p));
            }
        }
        if let Some(r) = &self.region2 {
            if let Some(p) = region_translate(r, vaddr) {
                return Some((RegionKind::Region2, p));
            }
        }
        let stack_base = USERSTACK - STACKPAGES * PAGE_SIZE;
        if vaddr >= stack_base && vaddr < USERSTACK {
            let page = (vaddr - stack_base) / PAGE_SIZE;
            let entry = self.stack.get(page)?;
            let paddr = entry.paddr?;
            return Some((RegionKind::Stack, paddr + vaddr % PAGE_SIZE));
        }
        None
    }
}

fn region_translate(region: &Region, vaddr: usize) -> Option<usize> {
    let vtop = region.vbase + region.npages * PAGE_SIZE;
    if vaddr < region.vbase || vaddr >= vtop {
        return None;
    }
    let page = (vaddr - region.vbase) / PAGE_SIZE;
    let entry = region.ptable.get(page)?;
    let paddr = entry.paddr?;
    Some(paddr + vaddr % PAGE_SIZE)
}

fn populate_and_zero(region: &mut Region) -> Result<()> {
    for entry in region.ptable.iter_mut() {
        let paddr = alloc_frames(1)?;
        zero_frame(paddr);
        entry.paddr = Some(paddr);
    }
    Ok(())
}

/// Zero one frame's worth of memory at kernel-visible physical address
/// `paddr`. The allocator never zeroes on our behalf (spec.md §4.1), so
/// every call site that needs a clean page does this explicitly.
fn zero_frame(paddr: usize) {
    unsafe {
        core::ptr::write_bytes(paddr as *mut u8, 0, PAGE_SIZE);
    }
}

fn copy_page_table(old: &[PageTableEntry], new: &[PageTableEntry]) {
    debug_assert_eq!(old.len(), new.len());
    for (o, n) in old.iter().zip(new.iter()) {
        if let (Some(op), Some(np)) = (o.paddr, n.paddr) {
            unsafe {
                core::ptr::copy_nonoverlapping(op as *const u8, np as *mut u8, PAGE_SIZE);
            }
        }
    }
}

fn copy_region_contents(old: Option<&Region>, new: Option<&Region>) {
    if let (Some(o), Some(n)) = (old, new) {
        copy_page_table(&o.ptable, &n.ptable);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::hal::mock::{NoopGuard, VecTlb};

    fn fresh_coremap(frames: usize) {
        crate::frame::bootstrap_for_test(frames);
    }

    #[test]
    fn define_region_accepts_exactly_two() {
        let _g = crate::test_util::lock_globals();
        fresh_coremap(64);
        let mut as1 = AddressSpace::create();
        as1.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        as1.define_region(0x2000, PAGE_SIZE, true, true, false).unwrap();
        assert_eq!(
            as1.define_region(0x3000, PAGE_SIZE, true, true, false),
            Err(Errno::Unimplemented)
        );
    }

    #[test]
    fn prepare_load_yields_distinct_nonzero_frames() {
        let _g = crate::test_util::lock_globals();
        fresh_coremap(64);
        let mut as1 = AddressSpace::create();
        as1.define_region(0x1000, 2 * PAGE_SIZE, true, false, true).unwrap();
        as1.define_region(0x10000, 3 * PAGE_SIZE, true, true, false).unwrap();
        as1.prepare_load().unwrap();
        as1.define_stack().unwrap();

        let mut seen = alloc::vec::Vec::new();
        for r in [as1.region1.as_ref().unwrap(), as1.region2.as_ref().unwrap()] {
            for e in &r.ptable {
                let p = e.paddr.expect("populated");
                assert!(!seen.contains(&p));
                seen.push(p);
            }
        }
        for e in &as1.stack {
            let p = e.paddr.expect("populated");
            assert!(!seen.contains(&p));
            seen.push(p);
        }
    }

    #[test]
    fn copy_is_byte_identical_and_independent() {
        let _g = crate::test_util::lock_globals();
        fresh_coremap(64);
        let mut as1 = AddressSpace::create();
        as1.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        as1.define_region(0x10000, PAGE_SIZE, true, true, false).unwrap();
        as1.prepare_load().unwrap();
        as1.define_stack().unwrap();

        let p = as1.region1.as_ref().unwrap().ptable[0].paddr.unwrap();
        unsafe {
            core::ptr::write_bytes(p as *mut u8, 0xAB, PAGE_SIZE);
        }

        let as2 = as1.copy().unwrap();
        let p2 = as2.region1.as_ref().unwrap().ptable[0].paddr.unwrap();
        assert_ne!(p, p2);
        unsafe {
            for i in 0..PAGE_SIZE {
                assert_eq!(*(p as *const u8).add(i), *(p2 as *const u8).add(i));
            }
        }
    }

    #[test]
    fn complete_load_marks_region1_readonly_in_faults() {
        let _g = crate::test_util::lock_globals();
        fresh_coremap(64);
        let mut as1 = AddressSpace::create();
        as1.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        as1.define_region(0x10000, PAGE_SIZE, true, true, false).unwrap();
        as1.prepare_load().unwrap();
        as1.define_stack().unwrap();

        assert!(!as1.readonly_after_load);
        let mut tlb = VecTlb::new(4);
        as1.complete_load::<NoopGuard, _>(&mut tlb);
        assert!(as1.readonly_after_load);
    }

    #[test]
    fn fault_at_userstack_minus_one_is_stack_at_userstack_is_outside() {
        let _g = crate::test_util::lock_globals();
        fresh_coremap(64);
        let mut as1 = AddressSpace::create();
        as1.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        as1.define_region(0x10000, PAGE_SIZE, true, true, false).unwrap();
        as1.prepare_load().unwrap();
        as1.define_stack().unwrap();

        assert!(as1.translate(USERSTACK - 1).is_some());
        assert!(as1.translate(USERSTACK).is_none());
    }
}
