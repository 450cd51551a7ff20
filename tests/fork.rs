use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chilena_ulib::api::fork::{fork, fork_status, pgfault, resume_child, Forked};
use chilena_ulib::api::pgfault::set_pgfault_handler;
use chilena_ulib::api::uvpt;
use chilena_ulib::sim::{Config, Machine, SimEnv};
use chilena_ulib::sys::memlayout::{uxstack_page, UTEXT, UTOP};
use chilena_ulib::sys::mmu::{page_va, pgnum, Pde, Pte};
use chilena_ulib::sys::syscall::{EnvTable, Exofork, Kernel, PageTableView, Syscall, UserMemory};
use chilena_ulib::sys::trap::{Trap, UpcallEntry};
use chilena_ulib::{EnvId, EnvInfo, EnvStatus, EnvType, Error, Perm, Process};
use x86_64::VirtAddr;

const HEAP: u64 = 0x1000_0000;
const RODATA: u64 = 0x2000_0000;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn boot(config: Config) -> (Arc<Machine>, Process<SimEnv>) {
    init_log();
    let machine = Machine::boot(config);
    let id = machine.create_env(EnvType::User).unwrap();
    let proc = Process::start(machine.attach(id).unwrap());
    (machine, proc)
}

fn alloc<K: Kernel>(proc: &Process<K>, va: u64, perm: Perm) {
    proc.kernel().page_alloc(EnvId::SELF, VirtAddr::new(va), perm).unwrap();
}

fn child_of(forked: Forked) -> EnvId {
    match forked {
        Forked::Parent { child } => child,
        Forked::Child => panic!("host fork always returns in the parent"),
    }
}

#[test]
fn child_write_is_private() {
    let (machine, parent) = boot(Config::default());
    let a = VirtAddr::new(HEAP);
    alloc(&parent, HEAP, Perm::RW);
    parent.write_u32(a, 7);

    let child = child_of(fork(&parent).unwrap());
    assert_eq!(machine.env_info(child).unwrap().status, EnvStatus::Runnable);
    let child = resume_child(machine.attach(child).unwrap());

    assert_eq!(child.read_u32(a), 7);
    child.write_u32(a, 42);
    assert_eq!(child.read_u32(a), 42);
    assert_eq!(parent.read_u32(a), 7);

    // Child now owns a writable copy; parent is still copy-on-write
    let mine = uvpt::pte(child.kernel(), a).unwrap();
    assert_eq!(mine.perm(), Ok(Perm::RW));
    let theirs = uvpt::pte(parent.kernel(), a).unwrap();
    assert_eq!(theirs.perm(), Ok(Perm::COW_RO));
    assert_ne!(mine.frame_addr(), theirs.frame_addr());

    parent.write_u32(a, 9);
    assert_eq!(parent.read_u32(a), 9);
    assert_eq!(child.read_u32(a), 42);
}

#[test]
fn child_mirrors_parent_except_exception_stack() {
    let (machine, parent) = boot(Config::default());
    alloc(&parent, UTEXT, Perm::RW);
    alloc(&parent, HEAP, Perm::RW);
    alloc(&parent, HEAP + 0x5000, Perm::RW);
    alloc(&parent, RODATA, Perm::RO);
    parent.write(VirtAddr::new(UTEXT), b"text");

    let child_id = child_of(fork(&parent).unwrap());
    let child = resume_child(machine.attach(child_id).unwrap());

    let uxstack = pgnum(VirtAddr::new(uxstack_page()));
    let limit = VirtAddr::new(UTOP);
    let pages: Vec<_> = uvpt::present_pages(parent.kernel(), limit).collect();
    assert_eq!(pages.len(), 5);

    for (pn, pte) in pages {
        let va = page_va(pn);
        let theirs = uvpt::pte(child.kernel(), va).unwrap();
        if pn == uxstack {
            assert_eq!(pte.perm(), Ok(Perm::RW));
            assert_eq!(theirs.perm(), Ok(Perm::RW));
            assert_ne!(theirs.frame_addr(), pte.frame_addr());
        } else if va.as_u64() == RODATA {
            assert_eq!(pte.perm(), Ok(Perm::RO));
            assert_eq!(theirs.perm(), Ok(Perm::RO));
            assert_eq!(theirs.frame_addr(), pte.frame_addr());
        } else {
            assert_eq!(pte.perm(), Ok(Perm::COW_RO));
            assert_eq!(theirs.perm(), Ok(Perm::COW_RO));
            assert_eq!(theirs.frame_addr(), pte.frame_addr());
        }
    }

    let mut text = [0u8; 4];
    child.read(VirtAddr::new(UTEXT), &mut text);
    assert_eq!(&text, b"text");
}

#[test]
fn children_do_not_see_each_other() {
    let (machine, parent) = boot(Config::default());
    let a = VirtAddr::new(HEAP);
    alloc(&parent, HEAP, Perm::RW);
    parent.write_u32(a, 1000);

    let children: Vec<_> = (0..3)
        .map(|_| {
            let id = child_of(fork(&parent).unwrap());
            resume_child(machine.attach(id).unwrap())
        })
        .collect();

    for (i, child) in children.iter().enumerate() {
        child.write_u32(a, i as u32);
    }
    for (i, child) in children.iter().enumerate() {
        assert_eq!(child.read_u32(a), i as u32);
    }
    assert_eq!(parent.read_u32(a), 1000);
}

#[test]
fn fork_binds_child_identity_lazily() {
    let (machine, parent) = boot(Config::default());
    let child_id = child_of(fork(&parent).unwrap());
    let child = resume_child(machine.attach(child_id).unwrap());

    assert_eq!(child.env_id(), child_id);
    assert_eq!(child.this_env().parent_id, parent.env_id());
}

#[test]
fn out_of_memory_tears_child_down() {
    // parent: two data pages + exception stack, each in its own table
    let (machine, parent) = boot(Config::default().with_max_frames(7));
    alloc(&parent, UTEXT, Perm::RW);
    alloc(&parent, HEAP, Perm::RW);
    parent.write_u32(VirtAddr::new(HEAP), 5);
    set_pgfault_handler(&parent, pgfault::<SimEnv>).unwrap();
    assert_eq!(machine.frames_in_use(), 6);

    let res = fork(&parent);
    assert_eq!(res, Err(Error::NoMem));
    assert_eq!(fork_status(res), -4);

    assert!(machine.env_info(EnvId(0x1001)).is_none());
    assert_eq!(machine.frames_in_use(), 6);
    assert_eq!(parent.read_u32(VirtAddr::new(HEAP)), 5);
}

#[test]
fn env_table_full() {
    let (_machine, parent) = boot(Config::default().with_max_envs(1));
    assert_eq!(fork(&parent), Err(Error::NoFreeEnv));
}

#[test]
#[should_panic(expected = "unresolvable page fault")]
fn read_fault_is_fatal() {
    let (_machine, proc) = boot(Config::default());
    set_pgfault_handler(&proc, pgfault::<SimEnv>).unwrap();
    proc.read_u32(VirtAddr::new(HEAP));
}

#[test]
#[should_panic(expected = "unresolvable page fault")]
fn write_to_read_only_page_is_fatal() {
    let (_machine, parent) = boot(Config::default());
    alloc(&parent, RODATA, Perm::RO);
    fork(&parent).unwrap();
    parent.write_u32(VirtAddr::new(RODATA), 1);
}

#[test]
#[should_panic(expected = "destroyed by the kernel")]
fn fault_without_upcall_kills() {
    let (_machine, proc) = boot(Config::default());
    proc.write_u32(VirtAddr::new(HEAP), 1);
}

// ---------------------------------------------------------------------------
// Kernel with injected failures
// ---------------------------------------------------------------------------

/// Which privileged calls misbehave
#[derive(Clone, Copy, Default)]
struct Faults {
    /// `exofork` lands in the child, as on real hardware
    exofork_child: bool,
    destroy:       bool,
    upcall:        bool,
    set_status:    bool,
}

struct Scripted {
    env:      SimEnv,
    faults:   Faults,
    getenvid: AtomicUsize,
}

impl Syscall for Scripted {
    fn getenvid(&self) -> EnvId {
        self.getenvid.fetch_add(1, Ordering::SeqCst);
        self.env.getenvid()
    }

    fn exofork(&self) -> chilena_ulib::Result<Exofork> {
        if self.faults.exofork_child {
            return Ok(Exofork::Child);
        }
        self.env.exofork()
    }

    fn page_alloc(&self, env: EnvId, va: VirtAddr, perm: Perm) -> chilena_ulib::Result<()> {
        self.env.page_alloc(env, va, perm)
    }

    fn page_map(
        &self,
        src: EnvId, src_va: VirtAddr,
        dst: EnvId, dst_va: VirtAddr,
        perm: Perm,
    ) -> chilena_ulib::Result<()> {
        self.env.page_map(src, src_va, dst, dst_va, perm)
    }

    fn page_unmap(&self, env: EnvId, va: VirtAddr) -> chilena_ulib::Result<()> {
        self.env.page_unmap(env, va)
    }

    fn env_set_pgfault_upcall(&self, env: EnvId, entry: UpcallEntry) -> chilena_ulib::Result<()> {
        if self.faults.upcall {
            return Err(Error::BadEnv);
        }
        self.env.env_set_pgfault_upcall(env, entry)
    }

    fn env_set_status(&self, env: EnvId, status: EnvStatus) -> chilena_ulib::Result<()> {
        if self.faults.set_status {
            return Err(Error::Invalid);
        }
        self.env.env_set_status(env, status)
    }

    fn env_destroy(&self, env: EnvId) -> chilena_ulib::Result<()> {
        if self.faults.destroy {
            return Err(Error::BadEnv);
        }
        self.env.env_destroy(env)
    }

    fn ipc_recv(&self, dstva: VirtAddr) -> chilena_ulib::Result<()> {
        self.env.ipc_recv(dstva)
    }

    fn ipc_try_send(&self, to: EnvId, value: u32, srcva: VirtAddr, perm: Perm) -> chilena_ulib::Result<()> {
        self.env.ipc_try_send(to, value, srcva, perm)
    }

    fn yield_cpu(&self) {
        self.env.yield_cpu()
    }
}

impl PageTableView for Scripted {
    fn uvpd(&self, pdx: usize) -> Pde { self.env.uvpd(pdx) }
    fn uvpt(&self, pn: usize) -> Pte { self.env.uvpt(pn) }
}

impl EnvTable for Scripted {
    fn env_slot(&self, idx: usize) -> EnvInfo { self.env.env_slot(idx) }
}

impl UserMemory for Scripted {
    fn load(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), Trap> { self.env.load(va, buf) }
    fn store(&self, va: VirtAddr, buf: &[u8]) -> Result<(), Trap> { self.env.store(va, buf) }
}

fn boot_scripted(config: Config, faults: Faults) -> (Arc<Machine>, Process<Scripted>) {
    init_log();
    let machine = Machine::boot(config);
    let id = machine.create_env(EnvType::User).unwrap();
    let env = machine.attach(id).unwrap();
    let proc = Process::start(Scripted { env, faults, getenvid: AtomicUsize::new(0) });
    (machine, proc)
}

#[test]
fn child_side_of_fork_rebinds_identity() {
    let faults = Faults { exofork_child: true, ..Faults::default() };
    let (_machine, proc) = boot_scripted(Config::default(), faults);
    let me = proc.env_id();

    let forked = fork(&proc);
    assert_eq!(forked, Ok(Forked::Child));
    assert_eq!(fork_status(forked), 0);

    let asked = proc.kernel().getenvid.load(Ordering::SeqCst);
    assert_eq!(proc.env_id(), me);
    assert_eq!(proc.kernel().getenvid.load(Ordering::SeqCst), asked + 1);
}

#[test]
#[should_panic(expected = "pgfault: page_alloc")]
fn resolver_out_of_memory_is_fatal() {
    // heap page + exception stack, then the child's table and stack
    let (machine, parent) = boot(Config::default().with_max_frames(7));
    alloc(&parent, HEAP, Perm::RW);
    set_pgfault_handler(&parent, pgfault::<SimEnv>).unwrap();
    child_of(fork(&parent).unwrap());
    assert_eq!(machine.frames_in_use(), 7);

    parent.write_u32(VirtAddr::new(HEAP), 1);
}

#[test]
#[should_panic(expected = "cannot destroy half-built child")]
fn failed_teardown_is_fatal() {
    let faults = Faults { destroy: true, ..Faults::default() };
    let (_machine, proc) = boot_scripted(Config::default().with_max_frames(3), faults);
    let _ = fork(&proc);
}

#[test]
fn child_exception_stack_out_of_memory() {
    // only the parent's exception stack and its table fit
    let (machine, parent) = boot(Config::default().with_max_frames(3));
    assert_eq!(fork(&parent), Err(Error::NoMem));

    assert!(machine.env_info(EnvId(0x1001)).is_none());
    assert_eq!(machine.frames_in_use(), 2);
}

#[test]
fn activation_failure_tears_child_down() {
    let faults = Faults { set_status: true, ..Faults::default() };
    let (machine, proc) = boot_scripted(Config::default(), faults);
    alloc(&proc, HEAP, Perm::RW);

    assert_eq!(fork(&proc), Err(Error::Invalid));
    assert!(machine.env_info(EnvId(0x1001)).is_none());
    // parent: heap page and exception stack, each with a table
    assert_eq!(machine.frames_in_use(), 4);
}

#[test]
fn failed_upcall_releases_exception_stack() {
    let faults = Faults { upcall: true, ..Faults::default() };
    let (machine, proc) = boot_scripted(Config::default(), faults);

    assert_eq!(set_pgfault_handler(&proc, pgfault::<Scripted>), Err(Error::BadEnv));
    assert!(uvpt::pte(proc.kernel(), VirtAddr::new(uxstack_page())).is_none());
    // the empty page table stays behind
    assert_eq!(machine.frames_in_use(), 1);
}
