//! chilena_ulib — Chilena user library
//!
//! Process duplication and IPC implemented entirely in user space on top
//! of a handful of privileged calls (page alloc/map/unmap, fault upcall
//! registration, environment lifecycle, IPC try-send/recv).
//!
//! Struktur:
//!   sys/  — the privileged boundary: layout, MMU bits, env model, errors
//!   api/  — user library: process context, fault handler, fork, IPC
//!   usr/  — small programs built on api/
//!   sim/  — hosted machine model (feature `std`)

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Unrecoverable condition: log the diagnostic, then panic with it.
/// The process's panic handler is responsible for halting it.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}

pub mod sys;
pub mod api;
pub mod usr;

#[cfg(feature = "std")]
pub mod sim;

pub use api::fork::{fork, Forked};
pub use api::ipc::{find_env, recv, send, Received};
pub use api::process::Process;
pub use sys::env::{EnvId, EnvInfo, EnvStatus, EnvType};
pub use sys::error::{Error, Result};
pub use sys::mmu::Perm;
