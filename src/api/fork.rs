//! Copy-on-write fork, built entirely in user space
//!
//! The parent walks its own page tables and shares every present page
//! with the child. Writable pages become copy-on-write in *both*
//! processes; the first write on either side faults into [`pgfault`],
//! which gives the writer a private copy.
//!
//! The exception stack page is never shared: the child gets a fresh one.

use log::{debug, warn};
use x86_64::VirtAddr;

use crate::api::pgfault::{set_pgfault_handler, upcall_entry};
use crate::api::process::Process;
use crate::api::uvpt;
use crate::sys::env::{EnvId, EnvStatus};
use crate::sys::error::Result;
use crate::sys::memlayout::{uxstack_page, PFTEMP, UTOP};
use crate::sys::mmu::{page_va, pgnum, round_down, Perm, PGSIZE};
use crate::sys::syscall::{Exofork, Kernel};
use crate::sys::trap::UTrapframe;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkStage {
    /// Handler installed, asking the kernel for a blank child
    Initiating,
    /// Sharing the parent's pages with the child
    Duplicating,
    /// Exception stack and upcall for the child
    ProvisioningChild,
    /// Marking the child runnable
    Activating,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Forked {
    Parent { child: EnvId },
    Child,
}

impl Forked {
    /// Classic return value: child id in the parent, 0 in the child
    pub fn status(self) -> i32 {
        match self {
            Forked::Parent { child } => child.0,
            Forked::Child => 0,
        }
    }
}

/// Status convention of `fork()` as seen by C-style callers:
/// negative error code on failure
pub fn fork_status(res: Result<Forked>) -> i32 {
    match res {
        Ok(forked) => forked.status(),
        Err(err) => err.code(),
    }
}

// ---------------------------------------------------------------------------
// fork
// ---------------------------------------------------------------------------

pub fn fork<K: Kernel>(proc: &Process<K>) -> Result<Forked> {
    debug!("[{}] fork: {:?}", proc.env_id(), ForkStage::Initiating);
    set_pgfault_handler(proc, pgfault::<K>)?;

    let k = proc.kernel();
    let child = match k.exofork()? {
        Exofork::Child => {
            // Context came over copy-on-write from the parent
            proc.rebind();
            return Ok(Forked::Child);
        }
        Exofork::Parent(child) => child,
    };

    if let Err(err) = build_child(k, child) {
        warn!("[{}] fork: child {} failed ({}), destroying it", proc.env_id(), child, err);
        if let Err(teardown) = k.env_destroy(child) {
            fatal!("fork: cannot destroy half-built child {}: {}", child, teardown);
        }
        return Err(err);
    }
    Ok(Forked::Parent { child })
}

/// Steps after the child exists; the first failure aborts the rest
fn build_child<K: Kernel>(k: &K, child: EnvId) -> Result<()> {
    debug!("fork {}: {:?}", child, ForkStage::Duplicating);
    let uxstack = pgnum(VirtAddr::new(uxstack_page()));
    for (pn, _) in uvpt::present_pages(k, VirtAddr::new(UTOP)) {
        if pn == uxstack {
            continue;
        }
        duppage(k, child, pn)?;
    }

    debug!("fork {}: {:?}", child, ForkStage::ProvisioningChild);
    k.page_alloc(child, VirtAddr::new(uxstack_page()), Perm::RW)?;
    k.env_set_pgfault_upcall(child, upcall_entry::<K>())?;

    debug!("fork {}: {:?}", child, ForkStage::Activating);
    k.env_set_status(child, EnvStatus::Runnable)
}

/// Share page `pn` with `child` at the same address.
///
/// Writable or copy-on-write pages end up `P|U|COW` on both sides, the
/// child first. Anything else is shared with its current permission.
pub fn duppage<K: Kernel>(k: &K, child: EnvId, pn: usize) -> Result<()> {
    let va = page_va(pn);
    let perm = k.uvpt(pn).perm()?;

    if perm.is_writable() || perm.is_cow() {
        debug!("duppage {:#x}: {:?} -> COW", va.as_u64(), perm);
        k.page_map(EnvId::SELF, va, child, va, Perm::COW_RO)?;
        k.page_map(EnvId::SELF, va, EnvId::SELF, va, Perm::COW_RO)?;
    } else {
        k.page_map(EnvId::SELF, va, child, va, perm & Perm::SYSCALL)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Copy-on-write fault resolver
// ---------------------------------------------------------------------------

/// Gives the faulting process a private, writable copy of a
/// copy-on-write page. Any other fault halts the process.
pub fn pgfault<K: Kernel>(proc: &Process<K>, utf: &UTrapframe) {
    let k = proc.kernel();
    let addr = utf.fault_va;

    let cow = match uvpt::pte(k, addr).map(|pte| pte.perm()) {
        Some(Ok(perm)) => perm.is_cow(),
        _ => false,
    };
    if !utf.is_write() || !cow {
        fatal!(
            "[{}] unresolvable page fault at {:#x} (err {:?})",
            proc.env_id(), addr.as_u64(), utf.err
        );
    }

    let page = round_down(addr);
    let tmp = VirtAddr::new(PFTEMP);

    if let Err(err) = k.page_alloc(EnvId::SELF, tmp, Perm::RW) {
        fatal!("pgfault: page_alloc: {}", err);
    }

    let mut copy = [0u8; PGSIZE as usize];
    proc.read(page, &mut copy);
    proc.write(tmp, &copy);

    if let Err(err) = k.page_map(EnvId::SELF, tmp, EnvId::SELF, page, Perm::RW) {
        fatal!("pgfault: page_map: {}", err);
    }
    if let Err(err) = k.page_unmap(EnvId::SELF, tmp) {
        fatal!("pgfault: page_unmap: {}", err);
    }
}

/// The child's side of a fork on hosts where the child starts in a
/// fresh execution context: resolver installed, identity not yet bound.
/// Its exception stack and upcall were set up by the parent.
pub fn resume_child<K: Kernel>(kernel: K) -> Process<K> {
    let proc = Process::start(kernel);
    proc.pgfault().install(pgfault::<K>);
    proc
}
