//! pingpong — parent and child bounce a counter over IPC
//!
//! The parent opens with 0; each side adds one and sends it back until
//! the counter reaches `LIMIT`. Parent ends on the last odd value it
//! got, the child on `LIMIT`.

use log::info;

use crate::api::fork::{fork, Forked};
use crate::api::ipc::{recv, send};
use crate::api::process::Process;
use crate::sys::error::Result;
use crate::sys::mmu::Perm;
use crate::sys::syscall::Kernel;

pub const LIMIT: u32 = 10;

/// Program entry: fork, then play this process's side
pub fn umain<K: Kernel>(proc: &Process<K>) -> Result<u32> {
    let forked = fork(proc)?;
    run(proc, forked)
}

/// One side of the game; returns the last value received
pub fn run<K: Kernel>(proc: &Process<K>, forked: Forked) -> Result<u32> {
    if let Forked::Parent { child } = forked {
        info!("send 0 from {} to {}", proc.env_id(), child);
        send(proc, child, 0, None, Perm::empty());
    }

    loop {
        let msg = recv(proc, None)?;
        info!("{} got {} from {}", proc.env_id(), msg.value, msg.from);
        if msg.value == LIMIT {
            return Ok(msg.value);
        }
        let next = msg.value + 1;
        send(proc, msg.from, next, None, Perm::empty());
        if next == LIMIT {
            return Ok(msg.value);
        }
    }
}

