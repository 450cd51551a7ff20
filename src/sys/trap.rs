//! Trap plumbing between the kernel and a process's fault upcall

use x86_64::VirtAddr;

pub use x86_64::structures::idt::PageFaultErrorCode;

/// Fault record the kernel pushes onto the user exception stack
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UTrapframe {
    pub fault_va: VirtAddr,
    pub err:      PageFaultErrorCode,
}

impl UTrapframe {
    pub fn is_write(&self) -> bool {
        self.err.contains(PageFaultErrorCode::CAUSED_BY_WRITE)
    }

    /// Bytes pushed onto the exception stack: fault address, error code
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..8].copy_from_slice(&self.fault_va.as_u64().to_le_bytes());
        out[8..].copy_from_slice(&self.err.bits().to_le_bytes());
        out
    }
}

/// Entry point the kernel transfers to on a user page fault
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpcallEntry(pub usize);

/// Outcome of a user memory access the mappings did not allow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trap {
    /// Delivered to the process's upcall; retry after handling
    PageFault(UTrapframe),
    /// Kernel destroyed the process (no upcall, or no usable exception stack)
    Killed,
}
