//! Page-fault handler registry
//!
//! One slot per process. The first registration also gives the process
//! an exception stack and points the kernel at [`Process::upcall`];
//! later registrations only swap the handler.

use spin::Mutex;
use x86_64::VirtAddr;

use crate::api::process::Process;
use crate::sys::env::EnvId;
use crate::sys::error::Result;
use crate::sys::memlayout::uxstack_page;
use crate::sys::mmu::Perm;
use crate::sys::syscall::Kernel;
use crate::sys::trap::{UTrapframe, UpcallEntry};

/// Handlers either resolve the fault and return, or halt the process.
pub type PgfaultHandler<K> = fn(&Process<K>, &UTrapframe);

pub struct Registry<K> {
    slot: Mutex<Option<PgfaultHandler<K>>>,
}

impl<K> Registry<K> {
    pub const fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    pub fn handler(&self) -> Option<PgfaultHandler<K>> {
        *self.slot.lock()
    }

    /// Set the slot without touching the kernel (the exception stack and
    /// upcall must already be in place)
    pub(crate) fn install(&self, handler: PgfaultHandler<K>) {
        *self.slot.lock() = Some(handler);
    }
}

impl<K> Default for Registry<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point handed to `env_set_pgfault_upcall`
pub fn upcall_entry<K: Kernel>() -> UpcallEntry {
    let entry: fn(&Process<K>, &UTrapframe) = Process::<K>::upcall;
    UpcallEntry(entry as usize)
}

/// Install `handler` for the calling process.
///
/// On first use this allocates the exception stack page and registers
/// the upcall; if either call fails the handler is not installed and
/// the exception stack is unmapped again.
pub fn set_pgfault_handler<K: Kernel>(proc: &Process<K>, handler: PgfaultHandler<K>) -> Result<()> {
    let mut slot = proc.pgfault().slot.lock();
    if slot.is_none() {
        let k = proc.kernel();
        let uxstack = VirtAddr::new(uxstack_page());
        k.page_alloc(EnvId::SELF, uxstack, Perm::RW)?;
        if let Err(err) = k.env_set_pgfault_upcall(EnvId::SELF, upcall_entry::<K>()) {
            // Unmapping our own page only fails if we're already gone
            let _ = k.page_unmap(EnvId::SELF, uxstack);
            return Err(err);
        }
    }
    *slot = Some(handler);
    Ok(())
}
