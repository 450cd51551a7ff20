//! sys — the privileged boundary as seen from user space
//!
//! Struktur:
//!   memlayout — fixed virtual address map
//!   mmu       — page geometry, permissions, raw table entries
//!   env       — environment identifiers and table snapshot
//!   error     — kernel error codes
//!   trap      — fault record and upcall entry
//!   syscall   — privileged-call traits

pub mod env;
pub mod error;
pub mod memlayout;
pub mod mmu;
pub mod syscall;
pub mod trap;
