//! Process context — "who am I" for user code
//!
//! One [`Process`] exists per environment, created at program entry and
//! threaded explicitly through every library call. It holds:
//!   - the kernel handle
//!   - the cached own identifier (bound lazily, reset in a fork child)
//!   - the page-fault handler registry
//!
//! Calls that target the running environment always pass
//! [`EnvId::SELF`]; the cached identifier is only used to look up this
//! environment's slot in the env table.

use core::sync::atomic::{AtomicI32, Ordering};
use x86_64::VirtAddr;

use crate::api::pgfault::Registry;
use crate::sys::env::{EnvId, EnvInfo};
use crate::sys::syscall::Kernel;
use crate::sys::trap::{Trap, UTrapframe};

pub struct Process<K> {
    kernel:  K,
    /// 0 = not bound yet
    env_id:  AtomicI32,
    pgfault: Registry<K>,
}

impl<K: Kernel> Process<K> {
    /// Program entry: wrap the kernel handle. No privileged call is made.
    pub fn start(kernel: K) -> Self {
        Self {
            kernel,
            env_id:  AtomicI32::new(0),
            pgfault: Registry::new(),
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub(crate) fn pgfault(&self) -> &Registry<K> {
        &self.pgfault
    }

    /// Own identifier, asking the kernel the first time
    pub fn env_id(&self) -> EnvId {
        let cached = self.env_id.load(Ordering::Acquire);
        if cached != 0 {
            return EnvId(cached);
        }
        let id = self.kernel.getenvid();
        self.env_id.store(id.0, Ordering::Release);
        id
    }

    /// Forget the cached identifier. A fork child inherits the parent's
    /// context and must look itself up again.
    pub(crate) fn rebind(&self) {
        self.env_id.store(0, Ordering::Release);
    }

    /// This environment's slot in the env table (IPC inbox lives here)
    pub fn this_env(&self) -> EnvInfo {
        self.kernel.env_slot(self.env_id().envx())
    }

    // -----------------------------------------------------------------------
    // Memory access — faults are dispatched to the handler, then retried
    // -----------------------------------------------------------------------

    pub fn read(&self, va: VirtAddr, buf: &mut [u8]) {
        loop {
            match self.kernel.load(va, buf) {
                Ok(()) => return,
                Err(trap) => self.on_trap(trap),
            }
        }
    }

    pub fn write(&self, va: VirtAddr, buf: &[u8]) {
        loop {
            match self.kernel.store(va, buf) {
                Ok(()) => return,
                Err(trap) => self.on_trap(trap),
            }
        }
    }

    pub fn read_u32(&self, va: VirtAddr) -> u32 {
        let mut raw = [0u8; 4];
        self.read(va, &mut raw);
        u32::from_le_bytes(raw)
    }

    pub fn write_u32(&self, va: VirtAddr, value: u32) {
        self.write(va, &value.to_le_bytes());
    }

    fn on_trap(&self, trap: Trap) {
        match trap {
            Trap::PageFault(utf) => self.upcall(&utf),
            Trap::Killed => fatal!("[{}] destroyed by the kernel", self.env_id()),
        }
    }

    /// Fault upcall: the kernel enters here with the fault record
    /// already on the exception stack.
    pub fn upcall(&self, utf: &UTrapframe) {
        match self.pgfault.handler() {
            Some(handler) => handler(self, utf),
            None => fatal!(
                "[{}] page fault at {:#x} with no handler installed",
                self.env_id(), utf.fault_va.as_u64()
            ),
        }
    }
}
