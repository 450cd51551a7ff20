//! IPC — one 32-bit value plus an optional page per rendezvous
//!
//! Built on two privileged calls:
//!   - `ipc_recv`     — blocks until a sender delivers
//!   - `ipc_try_send` — fails with `IpcNotRecv` unless the target waits
//!
//! "No page" is always encoded as `UTOP`: address 0 is a perfectly valid
//! place to receive a page.

use x86_64::VirtAddr;

use crate::api::process::Process;
use crate::sys::env::{EnvId, EnvType};
use crate::sys::error::{Error, Result};
use crate::sys::memlayout::{NENV, UTOP};
use crate::sys::mmu::Perm;
use crate::sys::syscall::Kernel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Received {
    pub value: u32,
    pub from:  EnvId,
    /// Empty unless a page was actually mapped
    pub perm:  Perm,
}

fn sentinel(va: Option<VirtAddr>) -> VirtAddr {
    va.unwrap_or(VirtAddr::new(UTOP))
}

// ---------------------------------------------------------------------------
// recv
// ---------------------------------------------------------------------------

/// Wait for a message. With `Some(pg)` a page sent along is mapped at `pg`.
pub fn recv<K: Kernel>(proc: &Process<K>, pg: Option<VirtAddr>) -> Result<Received> {
    proc.kernel().ipc_recv(sentinel(pg))?;

    let env = proc.this_env();
    Ok(Received {
        value: env.ipc_value,
        from:  env.ipc_from,
        perm:  env.ipc_perm,
    })
}

/// Out-parameter form of [`recv`]: sender and permission are zeroed
/// on failure.
pub fn recv_into<K: Kernel>(
    proc: &Process<K>,
    pg: Option<VirtAddr>,
    from: Option<&mut EnvId>,
    perm: Option<&mut Perm>,
) -> Result<u32> {
    let res = recv(proc, pg);
    let (sender, p) = match res {
        Ok(msg) => (msg.from, msg.perm),
        Err(_) => (EnvId::NONE, Perm::empty()),
    };
    if let Some(out) = from {
        *out = sender;
    }
    if let Some(out) = perm {
        *out = p;
    }
    res.map(|msg| msg.value)
}

// ---------------------------------------------------------------------------
// send
// ---------------------------------------------------------------------------

/// Deliver `value` (and the page at `pg`, if any) to `to`, yielding
/// until it is ready to receive. Errors other than "not receiving" halt
/// the process.
pub fn send<K: Kernel>(proc: &Process<K>, to: EnvId, value: u32, pg: Option<VirtAddr>, perm: Perm) {
    let k = proc.kernel();
    let srcva = sentinel(pg);
    loop {
        match k.ipc_try_send(to, value, srcva, perm) {
            Ok(()) => return,
            Err(Error::IpcNotRecv) => k.yield_cpu(),
            Err(err) => fatal!("[{}] ipc send to {}: {}", proc.env_id(), to, err),
        }
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// First live environment of type `ty`, or `EnvId::NONE`
pub fn find_env<K: Kernel>(proc: &Process<K>, ty: EnvType) -> EnvId {
    let k = proc.kernel();
    (0..NENV)
        .map(|idx| k.env_slot(idx))
        .find(|env| !env.is_free() && env.env_type == ty)
        .map_or(EnvId::NONE, |env| env.id)
}
