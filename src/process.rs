//! Process syscalls: `fork`, `execv`, `waitpid`, `_exit`, `getpid`.
//!
//! Grounded on `proc_syscalls.c`'s `OPT_A2` implementations of each syscall,
//! using `proctable.rs` for PID lifecycle and `addrspace.rs` for the
//! per-process memory image. Collaborators `proc_syscalls.c` reaches into
//! directly, such as `curproc`, `copyin`/`copyout`, `vfs_open`, `load_elf`,
//! and `thread_fork`/`mips_usermode`, are all out of this crate's scope
//! (spec.md §1) and appear here only as the `hal.rs` trait boundaries.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::addrspace::AddressSpace;
use crate::config::{ARG_MAX, PATH_MAX};
use crate::error::{Errno, Result};
use crate::hal::{ChildEntry, ElfLoader, InterruptGuard, ProcessHost, Tlb, Vfs};
use crate::proctable;

/// Encode a raw exit code the way `_MKWAIT_EXIT` does: the low byte lands in
/// bits `[15:8]` of the wait status (spec.md §6).
pub const fn mkwait_exit(code: i32) -> i32 {
    (code & 0xff) << 8
}

/// A user process: its PID, a display name (cloned into children by
/// `fork`), and its address space.
///
/// Owns its [`AddressSpace`] directly. spec.md §9 keeps the process table
/// node non-owning with respect to the live process specifically to break
/// this cycle: the process owns its memory image, and its table node
/// survives the process only to carry the exit status.
pub struct Process {
    pid: i32,
    name: String,
    addrspace: Option<AddressSpace>,
}

impl Process {
    /// Register a brand-new, parentless process (no address space yet).
    /// Mirrors `proc_create_runprogram` minus the VFS/ELF work that
    /// `execv` performs separately; a concrete kernel binary calls this for
    /// the very first process, then `execv`s a program into it.
    pub fn create(name: &str) -> Result<Process> {
        let node = proctable::add()?;
        Ok(Process {
            pid: node.pid(),
            name: name.to_string(),
            addrspace: None,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addrspace(&self) -> Option<&AddressSpace> {
        self.addrspace.as_ref()
    }

    pub fn addrspace_mut(&mut self) -> Option<&mut AddressSpace> {
        self.addrspace.as_mut()
    }

    pub fn set_addrspace(&mut self, addrspace: AddressSpace) {
        self.addrspace = Some(addrspace);
    }
}

/// `getpid`: the caller's own PID. Cannot fail.
pub fn getpid(proc: &Process) -> i32 {
    proc.pid
}

/// `fork`: copy `parent`'s address space and name into a brand-new child
/// process registered as `parent`'s child, then hand the spawn request to
/// `host` so it can carry the child into user mode with `(v0, a3) = (0, 0)`
/// and the program counter past the `fork` instruction.
///
/// Any failure rolls back everything allocated so far and returns the first
/// error encountered, matching `sys_fork`'s cleanup chain.
pub fn fork<H: ProcessHost>(parent: &Process, host: &mut H) -> Result<Process> {
    let child_as = parent
        .addrspace
        .as_ref()
        .ok_or(Errno::InvalidArgument)?
        .copy()?;

    let child_node = match proctable::add() {
        Ok(node) => node,
        Err(e) => {
            child_as.destroy();
            return Err(e);
        }
    };
    child_node.set_parent(parent.pid);

    let entry = ChildEntry {
        return_regs: (0, 0),
        pc_offset: 4,
    };
    if let Err(e) = host.spawn_child(entry) {
        proctable::remove(child_node.pid());
        child_as.destroy();
        return Err(e);
    }

    Ok(Process {
        pid: child_node.pid(),
        name: parent.name.clone(),
        addrspace: Some(child_as),
    })
}

/// `_exit`: record `code` as this process's exit status, wake any
/// `waitpid`er, reap/orphan its own children, then free its address space.
///
/// Consumes `proc` (there is no process left to use afterward). Detaching
/// the kernel thread and actually terminating it is the caller's job
/// (`thread_exit`/`proc_remthread` are out of this crate's scope).
pub fn exit(proc: Process, code: i32) {
    let status = mkwait_exit(code);
    let node = proctable::get(proc.pid).expect("own proctable node must exist at _exit");

    {
        // Mirrors sys__exit: set the exit state, reap/orphan children, and
        // broadcast, all while still holding our own exit-lock. `mark_exited`
        // only ever touches this node's own atomic flag, and `update` only
        // ever reads *other* nodes' flags the same lock-free way, so this
        // never needs a second node's exit-lock while our own is held.
        let mut guard = node.exit_lock();
        guard.exitcode = status;
        node.mark_exited();
        proctable::update(proc.pid);
        node.notify_exit();
    }

    if node.parent_pid() == -1 {
        proctable::remove(proc.pid);
    }

    if let Some(addrspace) = proc.addrspace {
        addrspace.destroy();
    }
}

/// `waitpid`: block until `pid` (which must be `caller`'s child) exits,
/// write its status to `*status_out`, and reclaim its PID.
///
/// Unlike the original (which leaves a waited-on child's slot in the table
/// until the *parent* itself exits), this crate reclaims the PID as soon as
/// `waitpid` has read the status, matching spec.md §4.4's explicit
/// lifecycle: "destroyed ... by the parent's waitpid."
pub fn waitpid(caller: &Process, pid: i32, status_out: Option<&mut i32>, options: i32) -> Result<i32> {
    let status_out = status_out.ok_or(Errno::BadPointer)?;
    if options != 0 {
        return Err(Errno::InvalidArgument);
    }
    let child = proctable::get(pid).ok_or(Errno::NoSuchProcess)?;
    if child.parent_pid() != caller.pid {
        return Err(Errno::NotAChild);
    }

    *status_out = child.wait_for_exit();
    proctable::remove(pid);

    Ok(pid)
}

/// What `execv` hands back to the caller so it can warp into user mode
/// (`enter_new_process`/`mips_usermode`, both out of this crate's scope).
#[derive(Debug, Clone, Copy)]
pub struct ExecResult {
    pub entry_point: usize,
    pub user_sp: usize,
    pub argc: usize,
    pub argv_uaddr: usize,
}

/// `execv`: replace `proc`'s address space with a freshly loaded program and
/// lay out `argv` on its new user stack.
///
/// Per spec.md §9 Open Question (b) and `sys_execv`, the old address space
/// is destroyed immediately after the new one is installed, *before* the
/// ELF load completes, so a failure after that point leaves `proc` with a
/// half-initialized address space. Callers must treat any `Err` returned
/// after this point as process-fatal, exactly as the original does.
pub fn execv<G: InterruptGuard, V: Vfs, E: ElfLoader, T: Tlb>(
    proc: &mut Process,
    program_path: &str,
    argv: &[&str],
    vfs: &mut V,
    elf: &mut E,
    tlb: &mut T,
) -> Result<ExecResult> {
    if program_path.is_empty() {
        return Err(Errno::NoSuchFile);
    }
    if program_path.len() > PATH_MAX {
        return Err(Errno::TooBig);
    }
    let total_argv_bytes: usize = argv.iter().map(|s| s.len() + 1).sum();
    if total_argv_bytes > ARG_MAX {
        return Err(Errno::TooBig);
    }

    let handle = vfs.open_read(program_path)?;

    let new_as = AddressSpace::create();
    proc_swap_addrspace::<G, T>(proc, new_as, tlb);

    let entry_point = {
        let target = proc.addrspace.as_mut().expect("just installed above");
        match elf.load(&handle, target) {
            Ok(ep) => ep,
            Err(e) => {
                vfs.close(handle);
                return Err(e);
            }
        }
    };

    proc.addrspace
        .as_mut()
        .expect("just installed above")
        .complete_load::<G, T>(tlb);
    vfs.close(handle);

    let target = proc.addrspace.as_mut().expect("just installed above");
    let mut sp = target.define_stack()?;

    // Copy argv strings last-to-first, recording each one's new user
    // address, then copy the (forward-ordered, null-terminated) pointer
    // array on top of that (spec.md §6).
    let mut arg_addrs = alloc::vec![0usize; argv.len() + 1];
    for i in (0..argv.len()).rev() {
        let bytes = argv[i].as_bytes();
        sp -= round_up(bytes.len() + 1, 8);
        target.write_user_bytes(sp, bytes)?;
        target.write_user_bytes(sp + bytes.len(), &[0])?;
        arg_addrs[i] = sp;
    }
    arg_addrs[argv.len()] = 0;

    for i in (0..=argv.len()).rev() {
        sp -= round_up(4, 4);
        target.write_user_bytes(sp, &(arg_addrs[i] as u32).to_le_bytes())?;
    }

    Ok(ExecResult {
        entry_point,
        user_sp: sp,
        argc: argv.len(),
        argv_uaddr: sp,
    })
}

/// Swap in `new_as` as `proc`'s current address space, activating it, and
/// destroy whatever was there before, in that order, matching
/// `sys_execv`'s `curproc_setas`/`as_activate`/`as_destroy(old)` sequence.
fn proc_swap_addrspace<G: InterruptGuard, T: Tlb>(proc: &mut Process, new_as: AddressSpace, tlb: &mut T) {
    new_as.activate::<G, T>(tlb);
    let old = proc.addrspace.take();
    if let Some(old) = old {
        old.destroy();
    }
    proc.addrspace = Some(new_as);
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::{PAGE_SIZE, USERSTACK};
    use crate::hal::mock::{FakeElfLoader, FakeVfs, NoopGuard, RecordingProcessHost, VecTlb};
    use crate::test_util::lock_globals;

    fn fresh_tables(frames: usize) {
        crate::frame::bootstrap_for_test(frames);
        proctable::init();
    }

    fn loaded_process(name: &str) -> Process {
        let mut proc = Process::create(name).unwrap();
        let mut as1 = AddressSpace::create();
        as1.define_region(0x1000, PAGE_SIZE, true, false, true).unwrap();
        as1.define_region(0x10000, PAGE_SIZE, true, true, false).unwrap();
        as1.prepare_load().unwrap();
        as1.define_stack().unwrap();
        proc.set_addrspace(as1);
        proc
    }

    #[test]
    fn getpid_returns_own_pid() {
        let _g = lock_globals();
        fresh_tables(128);
        let proc = loaded_process("init");
        assert_eq!(getpid(&proc), proc.pid());
    }

    #[test]
    fn fork_wait_round_trip_s1() {
        let _g = lock_globals();
        fresh_tables(128);
        let parent = loaded_process("parent");

        let mut host = RecordingProcessHost::new();
        let child = fork(&parent, &mut host).unwrap();
        assert_eq!(host.spawned.len(), 1);
        assert_eq!(host.spawned[0].return_regs, (0, 0));

        let child_node = proctable::get(child.pid()).unwrap();
        assert_eq!(child_node.parent_pid(), parent.pid());

        exit(child, 7);

        let mut status = 0;
        let got = waitpid(&parent, child_node.pid(), Some(&mut status), 0).unwrap();
        assert_eq!(got, child_node.pid());
        assert_eq!(status, 1792); // 7 << 8
    }

    #[test]
    fn orphan_child_reaps_itself_on_its_own_exit_s2() {
        let _g = lock_globals();
        fresh_tables(128);
        let parent = loaded_process("parent");
        let mut host = RecordingProcessHost::new();
        let child = fork(&parent, &mut host).unwrap();
        let child_pid = child.pid();

        exit(parent, 0); // proctable_update orphans the still-running child

        assert_eq!(proctable::get(child_pid).unwrap().parent_pid(), -1);

        exit(child, 0);

        assert!(proctable::get(child_pid).is_none());
    }

    #[test]
    fn parent_exit_reaps_already_exited_child_s3() {
        let _g = lock_globals();
        fresh_tables(128);
        let parent = loaded_process("parent");
        let mut host = RecordingProcessHost::new();
        let child = fork(&parent, &mut host).unwrap();
        let child_pid = child.pid();

        exit(child, 3);
        assert!(proctable::get(child_pid).is_some());

        exit(parent, 0);

        assert!(proctable::get(child_pid).is_none());
    }

    #[test]
    fn waitpid_rejects_non_children() {
        let _g = lock_globals();
        fresh_tables(128);
        let a = loaded_process("a");
        let b = loaded_process("b");
        let mut host = RecordingProcessHost::new();
        let child = fork(&a, &mut host).unwrap();

        let mut status = 0;
        assert_eq!(
            waitpid(&b, child.pid(), Some(&mut status), 0),
            Err(Errno::NotAChild)
        );

        exit(child, 0);
    }

    #[test]
    fn waitpid_rejects_unknown_pid_and_bad_options_and_null_status() {
        let _g = lock_globals();
        fresh_tables(128);
        let proc = loaded_process("solo");

        assert_eq!(
            waitpid(&proc, 9999, None, 0),
            Err(Errno::BadPointer)
        );
        let mut status = 0;
        assert_eq!(
            waitpid(&proc, 9999, Some(&mut status), 1),
            Err(Errno::InvalidArgument)
        );
        assert_eq!(
            waitpid(&proc, 9999, Some(&mut status), 0),
            Err(Errno::NoSuchProcess)
        );
    }

    #[test]
    fn execv_builds_expected_argv_layout_s6() {
        let _g = lock_globals();
        fresh_tables(128);
        let mut proc = loaded_process("a");

        let mut vfs = FakeVfs::new();
        vfs.files.push((alloc::string::String::from("/bin/x"), alloc::vec![]));
        let mut elf = FakeElfLoader::new(0x4000_0000);
        let mut tlb = VecTlb::new(8);

        let result = execv::<NoopGuard, _, _, _>(
            &mut proc,
            "/bin/x",
            &["a", "bb"],
            &mut vfs,
            &mut elf,
            &mut tlb,
        )
        .unwrap();

        assert_eq!(result.argc, 2);
        assert_eq!(result.entry_point, 0x4000_0000);
        assert!(result.user_sp < USERSTACK);

        let as1 = proc.addrspace().unwrap();

        let mut ptr_bytes = [0u8; 4];
        let sp = result.user_sp;
        for i in 0..4 {
            let (_, paddr) = as1.translate(sp + i).unwrap();
            ptr_bytes[i] = unsafe { *(paddr as *const u8) };
        }
        let argv0_addr = u32::from_le_bytes(ptr_bytes) as usize;

        let mut byte = [0u8; 1];
        let (_, paddr) = as1.translate(argv0_addr).unwrap();
        byte[0] = unsafe { *(paddr as *const u8) };
        assert_eq!(byte[0], b'a');

        let (_, paddr2) = as1.translate(argv0_addr + 1).unwrap();
        let next = unsafe { *(paddr2 as *const u8) };
        assert_eq!(next, 0);
    }
}
