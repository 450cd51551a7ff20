//! SimEnv — one environment's view of the machine
//!
//! Implements the privileged-call traits for the env it was attached
//! to; `EnvId::SELF` always resolves to that env.

use std::sync::Arc;

use log::trace;
use x86_64::VirtAddr;

use super::frame::FrameId;
use super::machine::{check_va, Machine};
use crate::sys::env::{EnvId, EnvInfo, EnvStatus};
use crate::sys::error::{Error, Result};
use crate::sys::mmu::{entry_addr, Pde, Perm, Pte, NPDENTRIES, NPTENTRIES};
use crate::sys::syscall::{EnvTable, Exofork, PageTableView, Syscall, UserMemory};
use crate::sys::trap::{Trap, UpcallEntry};

pub struct SimEnv {
    machine: Arc<Machine>,
    id:      EnvId,
}

impl SimEnv {
    pub(super) fn new(machine: Arc<Machine>, id: EnvId) -> Self {
        Self { machine, id }
    }

    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }
}

impl Syscall for SimEnv {
    fn getenvid(&self) -> EnvId {
        self.id
    }

    fn exofork(&self) -> Result<Exofork> {
        let child = self.machine.exofork(self.id)?;
        trace!("[{}] exofork -> {}", self.id, child);
        Ok(Exofork::Parent(child))
    }

    fn page_alloc(&self, env: EnvId, va: VirtAddr, perm: Perm) -> Result<()> {
        trace!("[{}] page_alloc {} {:#x} {:?}", self.id, env, va.as_u64(), perm);
        let mut st = self.machine.lock();
        let idx = st.envid2env(self.id, env, true)?;
        check_va(va)?;
        if !perm.is_syscall_perm() {
            return Err(Error::Invalid);
        }
        let frame = st.frames.alloc()?;
        let res = st.page_insert(idx, frame, va, perm);
        // page_insert holds its own reference
        st.frames.decref(frame);
        res
    }

    fn page_map(
        &self,
        src: EnvId, src_va: VirtAddr,
        dst: EnvId, dst_va: VirtAddr,
        perm: Perm,
    ) -> Result<()> {
        trace!(
            "[{}] page_map {} {:#x} -> {} {:#x} {:?}",
            self.id, src, src_va.as_u64(), dst, dst_va.as_u64(), perm
        );
        let mut st = self.machine.lock();
        let s = st.envid2env(self.id, src, true)?;
        let d = st.envid2env(self.id, dst, true)?;
        check_va(src_va)?;
        check_va(dst_va)?;

        let raw = st.pte(s, src_va);
        let src_perm = Perm::from_bits(raw);
        if !src_perm.is_present() || !perm.is_syscall_perm() {
            return Err(Error::Invalid);
        }
        if perm.is_writable() && !src_perm.is_writable() {
            return Err(Error::Invalid);
        }
        st.page_insert(d, FrameId::from_paddr(entry_addr(raw)), dst_va, perm)
    }

    fn page_unmap(&self, env: EnvId, va: VirtAddr) -> Result<()> {
        trace!("[{}] page_unmap {} {:#x}", self.id, env, va.as_u64());
        let mut st = self.machine.lock();
        let idx = st.envid2env(self.id, env, true)?;
        check_va(va)?;
        st.page_remove(idx, va);
        Ok(())
    }

    fn env_set_pgfault_upcall(&self, env: EnvId, entry: UpcallEntry) -> Result<()> {
        trace!("[{}] set_pgfault_upcall {} {:#x}", self.id, env, entry.0);
        let mut st = self.machine.lock();
        let idx = st.envid2env(self.id, env, true)?;
        st.envs[idx].upcall = Some(entry);
        Ok(())
    }

    fn env_set_status(&self, env: EnvId, status: EnvStatus) -> Result<()> {
        trace!("[{}] set_status {} {:?}", self.id, env, status);
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(Error::Invalid);
        }
        let mut st = self.machine.lock();
        let idx = st.envid2env(self.id, env, true)?;
        st.envs[idx].status = status;
        self.machine.cond.notify_all();
        Ok(())
    }

    fn env_destroy(&self, env: EnvId) -> Result<()> {
        self.machine.env_destroy(self.id, env)
    }

    fn ipc_recv(&self, dstva: VirtAddr) -> Result<()> {
        trace!("[{}] ipc_recv {:#x}", self.id, dstva.as_u64());
        self.machine.ipc_recv(self.id, dstva)
    }

    fn ipc_try_send(&self, to: EnvId, value: u32, srcva: VirtAddr, perm: Perm) -> Result<()> {
        self.machine.ipc_try_send(self.id, to, value, srcva, perm)
    }

    fn yield_cpu(&self) {
        std::thread::yield_now();
    }
}

impl PageTableView for SimEnv {
    fn uvpd(&self, pdx: usize) -> Pde {
        let st = self.machine.lock();
        let Ok(idx) = st.lookup(self.id) else { return Pde::from_raw(0) };
        if pdx >= NPDENTRIES {
            return Pde::from_raw(0);
        }
        st.envs[idx]
            .pgdir
            .get(&pdx)
            .map_or(Pde::from_raw(0), |table| {
                Pde::from_raw(table.frame.paddr() | Perm::RW.bits())
            })
    }

    fn uvpt(&self, pn: usize) -> Pte {
        let st = self.machine.lock();
        let Ok(idx) = st.lookup(self.id) else { return Pte::from_raw(0) };
        st.envs[idx]
            .pgdir
            .get(&(pn / NPTENTRIES))
            .map_or(Pte::from_raw(0), |table| Pte::from_raw(table.entries[pn % NPTENTRIES]))
    }
}

impl EnvTable for SimEnv {
    fn env_slot(&self, idx: usize) -> EnvInfo {
        let st = self.machine.lock();
        st.envs.get(idx).map_or_else(EnvInfo::free, |env| env.info())
    }
}

impl UserMemory for SimEnv {
    fn load(&self, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), Trap> {
        self.machine.load(self.id, va, buf)
    }

    fn store(&self, va: VirtAddr, buf: &[u8]) -> core::result::Result<(), Trap> {
        self.machine.store(self.id, va, buf)
    }
}
