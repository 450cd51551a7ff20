//! sim — hosted machine model of the privileged layer
//!
//! Runs user code on an ordinary host: one OS thread acts as each
//! environment through a [`SimEnv`] handle. Page tables, frame
//! reference counts, fault delivery and the IPC rendezvous follow the
//! kernel's contract, so the library above runs unmodified.
//!
//! Struktur:
//!   config  — slot and frame limits
//!   frame   — reference-counted physical frames
//!   machine — env table, page tables, fault delivery
//!   env     — per-env handle implementing the syscall traits
//!   ipc     — recv/try_send rendezvous

mod config;
mod env;
mod frame;
mod ipc;
mod machine;

pub use config::Config;
pub use env::SimEnv;
pub use machine::{Machine, ENVGENSHIFT};
