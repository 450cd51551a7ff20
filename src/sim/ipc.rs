//! IPC — rendezvous between a blocked receiver and a sender
//!
//!   - Receiver parks in `ipc_recv` until a sender fills its inbox
//!   - Sender never blocks: `IpcNotRecv` if nobody is waiting
//!   - One message per rendezvous, no queue

use log::trace;
use x86_64::VirtAddr;

use super::frame::FrameId;
use super::machine::Machine;
use crate::sys::env::{EnvId, EnvStatus};
use crate::sys::error::{Error, Result};
use crate::sys::memlayout::UTOP;
use crate::sys::mmu::{entry_addr, is_page_aligned, Perm};

impl Machine {
    // -----------------------------------------------------------------------
    // recv — block until a message lands in the caller's inbox
    // -----------------------------------------------------------------------

    pub(super) fn ipc_recv(&self, caller: EnvId, dstva: VirtAddr) -> Result<()> {
        let mut st = self.lock();
        let idx = st.lookup(caller)?;
        if dstva.as_u64() < UTOP && !is_page_aligned(dstva) {
            return Err(Error::Invalid);
        }

        let env = &mut st.envs[idx];
        env.ipc_recving = true;
        env.ipc_dstva = dstva;
        env.status = EnvStatus::NotRunnable;

        loop {
            // Destroyed while waiting
            let Ok(idx) = st.lookup(caller) else { return Err(Error::BadEnv) };
            if !st.envs[idx].ipc_recving {
                return Ok(());
            }
            self.cond.wait(&mut st);
        }
    }

    // -----------------------------------------------------------------------
    // try_send — deliver if the target is waiting, never block
    // -----------------------------------------------------------------------

    pub(super) fn ipc_try_send(
        &self,
        caller: EnvId,
        to: EnvId,
        value: u32,
        srcva: VirtAddr,
        perm: Perm,
    ) -> Result<()> {
        let mut st = self.lock();
        let me = st.lookup(caller)?;
        let dst = st.envid2env(caller, to, false)?;
        if !st.envs[dst].ipc_recving {
            return Err(Error::IpcNotRecv);
        }

        let mut moved = Perm::empty();
        if srcva.as_u64() < UTOP {
            if !is_page_aligned(srcva) || !perm.is_syscall_perm() {
                return Err(Error::Invalid);
            }
            let raw = st.pte(me, srcva);
            let src_perm = Perm::from_bits(raw);
            if !src_perm.is_present() {
                return Err(Error::Invalid);
            }
            if perm.is_writable() && !src_perm.is_writable() {
                return Err(Error::Invalid);
            }
            let dstva = st.envs[dst].ipc_dstva;
            if dstva.as_u64() < UTOP {
                st.page_insert(dst, FrameId::from_paddr(entry_addr(raw)), dstva, perm)?;
                moved = perm;
            }
        }

        let env = &mut st.envs[dst];
        env.ipc_recving = false;
        env.ipc_from = caller;
        env.ipc_value = value;
        env.ipc_perm = moved;
        env.status = EnvStatus::Runnable;
        trace!("[{}] ipc {} -> {} {:?}", caller, value, env.id, moved);

        self.cond.notify_all();
        Ok(())
    }
}
