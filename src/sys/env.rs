//! Environments — identifiers, roles, run status and the table snapshot
//!
//! The kernel keeps a fixed table of `NENV` slots and exposes it
//! read-only to every process. An identifier packs a generation counter
//! above the slot index so a recycled slot never answers to a stale id.

use bit_field::BitField;
use core::fmt;
use x86_64::VirtAddr;

use super::memlayout::{LOG2NENV, UTOP};
use super::mmu::Perm;

// ---------------------------------------------------------------------------
// EnvId
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvId(pub i32);

impl EnvId {
    /// Reserved: "whichever environment is executing this call".
    /// Resolved by the kernel, never by the caller.
    pub const SELF: EnvId = EnvId(0);

    /// Returned by discovery when nothing matches
    pub const NONE: EnvId = EnvId(0);

    /// Slot index in the environment table
    pub fn envx(self) -> usize {
        (self.0 as u32).get_bits(0..LOG2NENV) as usize
    }

    pub const fn is_self(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({:08x})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Role and status
// ---------------------------------------------------------------------------

/// Role tag used to locate well-known services
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EnvType {
    #[default]
    User,
    /// File system server
    Fs,
    /// Network server
    Ns,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EnvStatus {
    #[default]
    Free,
    Dying,
    Runnable,
    Running,
    /// Blocked, e.g. waiting in `ipc_recv`
    NotRunnable,
}

// ---------------------------------------------------------------------------
// EnvInfo — one slot of the read-only table
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvInfo {
    pub id:          EnvId,
    pub parent_id:   EnvId,
    pub env_type:    EnvType,
    pub status:      EnvStatus,

    // IPC inbox
    pub ipc_recving: bool,
    /// Where a transferred page lands (`UTOP` = none wanted)
    pub ipc_dstva:   VirtAddr,
    pub ipc_value:   u32,
    pub ipc_from:    EnvId,
    /// Permission of the transferred page; empty if none was mapped
    pub ipc_perm:    Perm,
}

impl EnvInfo {
    pub fn free() -> Self {
        EnvInfo {
            id:          EnvId::NONE,
            parent_id:   EnvId::NONE,
            env_type:    EnvType::User,
            status:      EnvStatus::Free,
            ipc_recving: false,
            ipc_dstva:   VirtAddr::new(UTOP),
            ipc_value:   0,
            ipc_from:    EnvId::NONE,
            ipc_perm:    Perm::empty(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.status == EnvStatus::Free
    }
}
