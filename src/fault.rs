//! The VM fault handler: translates a faulting virtual address through the
//! current address space and installs a TLB entry.
//!
//! Grounded on `dumbvm.c::vm_fault` (exact dispatch on fault type, the
//! scan-for-invalid-slot-else-random-victim TLB install, and masking the
//! dirty bit for post-`complete_load` region-1 faults).

use crate::addrspace::{AddressSpace, RegionKind};
use crate::config::PAGE_FRAME_MASK;
use crate::error::{Errno, Result};
use crate::hal::{InterruptGuard, Tlb, TlbEntry};

/// The three fault kinds `vm_fault` dispatches on (spec.md §4.3). Modeling
/// this as a closed enum rather than a raw int (as the original's
/// `VM_FAULT_READ`/`_WRITE`/`_READONLY` constants are) means there is no
/// "otherwise -> invalid argument" case left to handle in Rust: the type
/// system rules out any fault type the original's `default:` switch arm
/// existed to catch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    Read,
    Write,
    ReadOnly,
}

/// Handle a page fault at `fault_addr` against `addrspace` (the current
/// address space, if any), installing a translation into `tlb`.
///
/// A `None` address space returns [`Errno::FaultUnmapped`] rather than
/// panicking, so a very early kernel fault (no process, no address space
/// yet) aborts cleanly instead of looping (spec.md §7).
pub fn vm_fault<G: InterruptGuard, T: Tlb>(
    fault_type: FaultType,
    fault_addr: usize,
    addrspace: Option<&AddressSpace>,
    tlb: &mut T,
) -> Result<()> {
    if fault_type == FaultType::ReadOnly {
        // We always create pages read/write until `complete_load`, so this
        // can only mean a write to an already-read-only text page.
        return Err(Errno::AccessViolation);
    }

    let page_addr = fault_addr & PAGE_FRAME_MASK;

    let addrspace = addrspace.ok_or(Errno::FaultUnmapped)?;
    let (region, paddr) = addrspace.translate(page_addr).ok_or(Errno::FaultUnmapped)?;

    let readonly = region == RegionKind::Region1 && addrspace.readonly_after_load;

    let entry = TlbEntry {
        vaddr: page_addr,
        paddr,
        valid: true,
        writable: !readonly,
    };

    // TLB mutation must be atomic with respect to the scan for an empty
    // slot (spec.md §5); interrupts are masked for exactly that long.
    let _guard = G::mask_high();
    install(tlb, entry);

    Ok(())
}

fn install<T: Tlb>(tlb: &mut T, entry: TlbEntry) {
    let n = tlb.num_entries();
    for i in 0..n {
        if !tlb.read(i).valid {
            tlb.write(i, entry);
            return;
        }
    }
    tlb.write_random(entry);
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::PAGE_SIZE;
    use crate::hal::mock::{NoopGuard, VecTlb};

    fn fresh_addrspace() -> AddressSpace {
        crate::frame::bootstrap_for_test(64);
        let mut as1 = AddressSpace::create();
        as1.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        as1.define_region(0x10000, PAGE_SIZE, true, true, false).unwrap();
        as1.prepare_load().unwrap();
        as1.define_stack().unwrap();
        as1
    }

    #[test]
    fn readonly_fault_is_always_an_access_violation() {
        let _g = crate::test_util::lock_globals();
        let as1 = fresh_addrspace();
        let mut tlb = VecTlb::new(4);
        let result = vm_fault::<NoopGuard, _>(FaultType::ReadOnly, 0x1000, Some(&as1), &mut tlb);
        assert_eq!(result, Err(Errno::AccessViolation));
    }

    #[test]
    fn fault_with_no_addrspace_returns_fault_unmapped_not_panic() {
        let mut tlb = VecTlb::new(4);
        let result = vm_fault::<NoopGuard, _>(FaultType::Read, 0x1000, None, &mut tlb);
        assert_eq!(result, Err(Errno::FaultUnmapped));
    }

    #[test]
    fn fault_outside_every_region_is_fault_unmapped() {
        let _g = crate::test_util::lock_globals();
        let as1 = fresh_addrspace();
        let mut tlb = VecTlb::new(4);
        let result = vm_fault::<NoopGuard, _>(FaultType::Read, 0x5000_0000, Some(&as1), &mut tlb);
        assert_eq!(result, Err(Errno::FaultUnmapped));
    }

    #[test]
    fn successful_fault_installs_a_valid_tlb_entry() {
        let _g = crate::test_util::lock_globals();
        let as1 = fresh_addrspace();
        let mut tlb = VecTlb::new(4);
        vm_fault::<NoopGuard, _>(FaultType::Read, 0x1000, Some(&as1), &mut tlb).unwrap();

        let entry = tlb.read(0);
        assert!(entry.valid);
        assert_eq!(entry.vaddr, 0x1000);
    }

    #[test]
    fn readonly_after_load_clears_writable_only_for_region1() {
        let _g = crate::test_util::lock_globals();
        let mut as1 = fresh_addrspace();
        let mut tlb = VecTlb::new(4);
        as1.complete_load::<NoopGuard, _>(&mut tlb);

        vm_fault::<NoopGuard, _>(FaultType::Write, 0x1000, Some(&as1), &mut tlb).unwrap();
        assert!(!tlb.read(0).writable);

        vm_fault::<NoopGuard, _>(FaultType::Write, 0x10000, Some(&as1), &mut tlb).unwrap();
        assert!(tlb.read(1).writable);
    }

    #[test]
    fn fills_invalid_slots_before_falling_back_to_random_victim() {
        let _g = crate::test_util::lock_globals();
        let as1 = fresh_addrspace();
        let mut tlb = VecTlb::new(2);
        vm_fault::<NoopGuard, _>(FaultType::Read, 0x1000, Some(&as1), &mut tlb).unwrap();
        vm_fault::<NoopGuard, _>(FaultType::Read, 0x10000, Some(&as1), &mut tlb).unwrap();
        assert!(tlb.read(0).valid);
        assert!(tlb.read(1).valid);

        // Both slots are full now; this must land via write_random rather
        // than panicking or silently dropping the translation.
        let stack_addr = crate::config::USERSTACK - 1;
        vm_fault::<NoopGuard, _>(FaultType::Read, stack_addr, Some(&as1), &mut tlb).unwrap();
    }
}
