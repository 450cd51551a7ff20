//! Privileged calls — the kernel interface as consumed by user space
//!
//! Every call that names an environment accepts [`EnvId::SELF`], which the
//! kernel resolves to whichever environment is executing the call. The
//! library always uses it for "myself" so a freshly forked child works
//! before it knows its own identifier.
//!
//! Split into four traits:
//!   - [`Syscall`]       — the calls proper
//!   - [`PageTableView`] — read-only window onto the caller's own tables
//!   - [`EnvTable`]      — read-only window onto the global env table
//!   - [`UserMemory`]    — loads/stores subject to the caller's mappings

use x86_64::VirtAddr;

use super::env::{EnvId, EnvInfo, EnvStatus};
use super::error::Result;
use super::mmu::{Pde, Perm, Pte};
use super::trap::{Trap, UpcallEntry};

/// Result of `exofork`, which returns once in each environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exofork {
    /// Running in the creator; carries the new child's identifier
    Parent(EnvId),
    /// Running in the new child
    Child,
}

pub trait Syscall {
    fn getenvid(&self) -> EnvId;

    /// Create a blank, not-yet-runnable child with no mappings
    fn exofork(&self) -> Result<Exofork>;

    /// Allocate a zeroed frame and map it at `va` in `env`
    fn page_alloc(&self, env: EnvId, va: VirtAddr, perm: Perm) -> Result<()>;

    /// Map the frame behind `src_va` in `src` at `dst_va` in `dst`
    fn page_map(
        &self,
        src: EnvId, src_va: VirtAddr,
        dst: EnvId, dst_va: VirtAddr,
        perm: Perm,
    ) -> Result<()>;

    /// Unmapping an absent page is not an error
    fn page_unmap(&self, env: EnvId, va: VirtAddr) -> Result<()>;

    fn env_set_pgfault_upcall(&self, env: EnvId, entry: UpcallEntry) -> Result<()>;

    /// Only `Runnable` and `NotRunnable` are accepted
    fn env_set_status(&self, env: EnvId, status: EnvStatus) -> Result<()>;

    fn env_destroy(&self, env: EnvId) -> Result<()>;

    /// Block until a message arrives. `dstva >= UTOP` means no page wanted.
    fn ipc_recv(&self, dstva: VirtAddr) -> Result<()>;

    /// Non-blocking; `Error::IpcNotRecv` if `to` isn't waiting.
    /// `srcva >= UTOP` means no page is sent.
    fn ipc_try_send(&self, to: EnvId, value: u32, srcva: VirtAddr, perm: Perm) -> Result<()>;

    fn yield_cpu(&self);
}

pub trait PageTableView {
    /// Directory entry `pdx` of the caller's page directory
    fn uvpd(&self, pdx: usize) -> Pde;

    /// Table entry for page number `pn`; only meaningful when the
    /// covering directory entry is present
    fn uvpt(&self, pn: usize) -> Pte;
}

pub trait EnvTable {
    /// Snapshot of slot `idx` (`idx < NENV`)
    fn env_slot(&self, idx: usize) -> EnvInfo;
}

pub trait UserMemory {
    fn load(&self, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), Trap>;
    fn store(&self, va: VirtAddr, buf: &[u8]) -> core::result::Result<(), Trap>;
}

/// Everything a process needs from the kernel
pub trait Kernel: Syscall + PageTableView + EnvTable + UserMemory {}

impl<T: Syscall + PageTableView + EnvTable + UserMemory> Kernel for T {}
