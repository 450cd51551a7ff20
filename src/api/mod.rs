//! `api` — Layer abstraksi antara kernel dan userspace
//!
//! Program userspace harus menggunakan modul ini,
//! bukan akses langsung ke `sys/`.
//!
//!   process — per-process context and trap-aware memory access
//!   pgfault — page-fault handler registry
//!   uvpt    — read-only walk of the caller's page tables
//!   fork    — copy-on-write fork and its fault resolver
//!   ipc     — send/recv rendezvous and env discovery

pub mod fork;
pub mod ipc;
pub mod pgfault;
pub mod process;
pub mod uvpt;
