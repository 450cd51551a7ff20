//! Machine — env table, physical frames and page tables
//!
//! All state sits behind one lock. Blocking calls (`ipc_recv`) wait on
//! the machine's condition variable, which is signalled on every status
//! change.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use x86_64::VirtAddr;

use super::config::Config;
use super::env::SimEnv;
use super::frame::{FrameArena, FrameId};
use crate::sys::env::{EnvId, EnvInfo, EnvStatus, EnvType};
use crate::sys::error::{Error, Result};
use crate::sys::memlayout::{uxstack_page, NENV, UTOP};
use crate::sys::mmu::{entry_addr, is_page_aligned, pdx, ptx, Perm, PGSIZE, NPTENTRIES};
use crate::sys::trap::{PageFaultErrorCode, Trap, UTrapframe, UpcallEntry};

/// Identifier bits above the slot index hold a generation counter
pub const ENVGENSHIFT: usize = 12;

// ---------------------------------------------------------------------------
// Environment slot
// ---------------------------------------------------------------------------

pub(super) struct PageTable {
    pub frame:   FrameId,
    pub entries: Box<[u64; NPTENTRIES]>,
}

pub(super) struct Env {
    pub id:          EnvId,
    pub parent_id:   EnvId,
    pub env_type:    EnvType,
    pub status:      EnvStatus,
    /// A thread is acting as this env
    pub attached:    bool,
    pub pgdir:       BTreeMap<usize, PageTable>,
    pub upcall:      Option<UpcallEntry>,

    pub ipc_recving: bool,
    pub ipc_dstva:   VirtAddr,
    pub ipc_value:   u32,
    pub ipc_from:    EnvId,
    pub ipc_perm:    Perm,
}

impl Env {
    fn free() -> Self {
        Self {
            id:          EnvId::NONE,
            parent_id:   EnvId::NONE,
            env_type:    EnvType::User,
            status:      EnvStatus::Free,
            attached:    false,
            pgdir:       BTreeMap::new(),
            upcall:      None,
            ipc_recving: false,
            ipc_dstva:   VirtAddr::new(UTOP),
            ipc_value:   0,
            ipc_from:    EnvId::NONE,
            ipc_perm:    Perm::empty(),
        }
    }

    pub fn info(&self) -> EnvInfo {
        EnvInfo {
            id:          self.id,
            parent_id:   self.parent_id,
            env_type:    self.env_type,
            status:      self.status,
            ipc_recving: self.ipc_recving,
            ipc_dstva:   self.ipc_dstva,
            ipc_value:   self.ipc_value,
            ipc_from:    self.ipc_from,
            ipc_perm:    self.ipc_perm,
        }
    }
}

// ---------------------------------------------------------------------------
// Machine state
// ---------------------------------------------------------------------------

pub(super) struct State {
    pub envs:   Vec<Env>,
    pub frames: FrameArena,
}

impl State {
    /// Slot of a live env with exactly this identifier
    pub fn lookup(&self, id: EnvId) -> Result<usize> {
        let idx = id.envx();
        match self.envs.get(idx) {
            Some(env) if env.status != EnvStatus::Free && env.id == id => Ok(idx),
            _ => Err(Error::BadEnv),
        }
    }

    /// Resolve `id` on behalf of `caller`. With `checkperm` the target
    /// must be the caller itself or one of its children.
    pub fn envid2env(&self, caller: EnvId, id: EnvId, checkperm: bool) -> Result<usize> {
        let me = self.lookup(caller)?;
        if id.is_self() {
            return Ok(me);
        }
        let idx = self.lookup(id)?;
        if checkperm && idx != me && self.envs[idx].parent_id != caller {
            return Err(Error::BadEnv);
        }
        Ok(idx)
    }

    fn env_alloc(&mut self, parent: EnvId, max_envs: usize) -> Result<usize> {
        let idx = (0..max_envs.min(self.envs.len()))
            .find(|&i| self.envs[i].status == EnvStatus::Free)
            .ok_or(Error::NoFreeEnv)?;

        // Same slot, new generation
        let mut generation = (self.envs[idx].id.0 + (1 << ENVGENSHIFT)) & !((NENV as i32) - 1);
        if generation <= 0 {
            generation = 1 << ENVGENSHIFT;
        }

        let mut env = Env::free();
        env.id = EnvId(generation | idx as i32);
        env.parent_id = parent;
        env.status = EnvStatus::NotRunnable;
        self.envs[idx] = env;
        Ok(idx)
    }

    /// Release every frame of env `idx` and free its slot
    pub fn env_free(&mut self, idx: usize) {
        let pgdir = core::mem::take(&mut self.envs[idx].pgdir);
        for table in pgdir.into_values() {
            for &raw in table.entries.iter() {
                if raw & Perm::P.bits() != 0 {
                    self.frames.decref(FrameId::from_paddr(entry_addr(raw)));
                }
            }
            self.frames.decref(table.frame);
        }
        let id = self.envs[idx].id;
        self.envs[idx] = Env::free();
        // Keep the id so the slot's next generation differs
        self.envs[idx].id = id;
    }

    // -----------------------------------------------------------------------
    // Page tables
    // -----------------------------------------------------------------------

    /// Raw entry for `va` in env `idx` (0 if unmapped)
    pub fn pte(&self, idx: usize, va: VirtAddr) -> u64 {
        self.envs[idx]
            .pgdir
            .get(&pdx(va))
            .map_or(0, |table| table.entries[ptx(va)])
    }

    /// Map `frame` at `va`, replacing whatever was there
    pub fn page_insert(&mut self, idx: usize, frame: FrameId, va: VirtAddr, perm: Perm) -> Result<()> {
        let dir = pdx(va);
        if !self.envs[idx].pgdir.contains_key(&dir) {
            let table_frame = self.frames.alloc()?;
            self.envs[idx].pgdir.insert(dir, PageTable {
                frame:   table_frame,
                entries: Box::new([0; NPTENTRIES]),
            });
        }
        // incref first: remapping a frame onto itself must not free it
        self.frames.incref(frame);
        self.page_remove(idx, va);
        if let Some(table) = self.envs[idx].pgdir.get_mut(&dir) {
            table.entries[ptx(va)] = frame.paddr() | perm.bits();
        }
        Ok(())
    }

    pub fn page_remove(&mut self, idx: usize, va: VirtAddr) {
        let Some(table) = self.envs[idx].pgdir.get_mut(&pdx(va)) else { return };
        let raw = core::mem::replace(&mut table.entries[ptx(va)], 0);
        if raw & Perm::P.bits() != 0 {
            self.frames.decref(FrameId::from_paddr(entry_addr(raw)));
        }
    }

    /// Frame behind `va` if the access is allowed, else the fault cause
    pub fn translate(&self, idx: usize, va: u64, write: bool) -> core::result::Result<FrameId, PageFaultErrorCode> {
        let mut err = PageFaultErrorCode::USER_MODE;
        if write {
            err |= PageFaultErrorCode::CAUSED_BY_WRITE;
        }
        if va >= UTOP {
            return Err(err);
        }
        let raw = self.pte(idx, VirtAddr::new(va));
        let perm = Perm::from_bits(raw);
        if !perm.contains(Perm::P | Perm::U) {
            return Err(err);
        }
        if write && !perm.is_writable() {
            return Err(err | PageFaultErrorCode::PROTECTION_VIOLATION);
        }
        Ok(FrameId::from_paddr(entry_addr(raw)))
    }
}

/// Addresses handed to page calls must be user, page-aligned
pub(super) fn check_va(va: VirtAddr) -> Result<()> {
    if va.as_u64() >= UTOP || !is_page_aligned(va) {
        return Err(Error::Invalid);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub struct Machine {
    config:           Config,
    pub(super) state: Mutex<State>,
    pub(super) cond:  Condvar,
}

impl Machine {
    pub fn boot(config: Config) -> Arc<Machine> {
        debug!("machine: {} env slots, {} frames", config.max_envs, config.max_frames);
        Arc::new(Machine {
            config,
            state: Mutex::new(State {
                envs:   (0..NENV).map(|_| Env::free()).collect(),
                frames: FrameArena::new(config.max_frames),
            }),
            cond: Condvar::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    /// Boot-time environment creation; the new env is runnable
    pub fn create_env(&self, env_type: EnvType) -> Result<EnvId> {
        let mut st = self.lock();
        let idx = st.env_alloc(EnvId::NONE, self.config.max_envs)?;
        let env = &mut st.envs[idx];
        env.env_type = env_type;
        env.status = EnvStatus::Runnable;
        debug!("[00000000] new env {}", env.id);
        Ok(env.id)
    }

    /// Hand out the handle through which the calling thread acts as `id`.
    /// The env must be runnable and not attached yet.
    pub fn attach(self: &Arc<Self>, id: EnvId) -> Result<SimEnv> {
        let mut st = self.lock();
        let idx = st.lookup(id)?;
        let env = &mut st.envs[idx];
        let ready = matches!(env.status, EnvStatus::Runnable | EnvStatus::Running);
        if !ready || env.attached {
            return Err(Error::BadEnv);
        }
        env.attached = true;
        env.status = EnvStatus::Running;
        Ok(SimEnv::new(Arc::clone(self), id))
    }

    pub(super) fn exofork(&self, parent: EnvId) -> Result<EnvId> {
        let mut st = self.lock();
        st.lookup(parent)?;
        let idx = st.env_alloc(parent, self.config.max_envs)?;
        Ok(st.envs[idx].id)
    }

    pub fn env_destroy(&self, caller: EnvId, id: EnvId) -> Result<()> {
        let mut st = self.lock();
        let idx = st.envid2env(caller, id, true)?;
        let target = st.envs[idx].id;
        if target == caller {
            debug!("[{}] exiting gracefully", caller);
        } else {
            debug!("[{}] destroying {}", caller, target);
        }
        st.env_free(idx);
        self.cond.notify_all();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // User memory and fault delivery
    // -----------------------------------------------------------------------

    pub(super) fn load(&self, caller: EnvId, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), Trap> {
        let mut st = self.lock();
        let idx = st.lookup(caller).map_err(|_| Trap::Killed)?;
        let mut done = 0;
        while done < buf.len() {
            let cur = va.as_u64() + done as u64;
            let off = (cur % PGSIZE) as usize;
            let n = (PGSIZE as usize - off).min(buf.len() - done);
            match st.translate(idx, cur, false) {
                Ok(frame) => buf[done..done + n].copy_from_slice(&st.frames.bytes(frame)[off..off + n]),
                Err(err) => return Err(self.deliver_fault(&mut st, idx, cur, err)),
            }
            done += n;
        }
        Ok(())
    }

    pub(super) fn store(&self, caller: EnvId, va: VirtAddr, buf: &[u8]) -> core::result::Result<(), Trap> {
        let mut st = self.lock();
        let idx = st.lookup(caller).map_err(|_| Trap::Killed)?;
        let mut done = 0;
        while done < buf.len() {
            let cur = va.as_u64() + done as u64;
            let off = (cur % PGSIZE) as usize;
            let n = (PGSIZE as usize - off).min(buf.len() - done);
            match st.translate(idx, cur, true) {
                Ok(frame) => st.frames.bytes_mut(frame)[off..off + n].copy_from_slice(&buf[done..done + n]),
                Err(err) => return Err(self.deliver_fault(&mut st, idx, cur, err)),
            }
            done += n;
        }
        Ok(())
    }

    /// Push the fault record on the exception stack and hand it to the
    /// upcall, or destroy the env if it has nowhere to take it
    fn deliver_fault(&self, st: &mut State, idx: usize, va: u64, err: PageFaultErrorCode) -> Trap {
        let id = st.envs[idx].id;
        let utf = UTrapframe { fault_va: VirtAddr::new(va), err };

        let uxstack = st.translate(idx, uxstack_page(), true);
        let frame = match (st.envs[idx].upcall, uxstack) {
            (Some(_), Ok(frame)) => frame,
            _ => {
                warn!("[{}] user fault va {:#010x} err {:?}, destroying", id, va, err);
                st.env_free(idx);
                self.cond.notify_all();
                return Trap::Killed;
            }
        };

        let top = PGSIZE as usize;
        st.frames.bytes_mut(frame)[top - UTrapframe::SIZE..top].copy_from_slice(&utf.to_bytes());
        log::trace!("[{}] fault va {:#010x} err {:?} -> upcall", id, va, err);
        Trap::PageFault(utf)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn env_info(&self, id: EnvId) -> Option<EnvInfo> {
        let st = self.lock();
        st.lookup(id).ok().map(|idx| st.envs[idx].info())
    }

    pub fn frames_in_use(&self) -> usize {
        self.lock().frames.in_use()
    }

    /// Wait until `parent` has a runnable child nobody has attached to
    pub fn wait_for_child(&self, parent: EnvId, timeout: Duration) -> Option<EnvId> {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        loop {
            let child = st.envs.iter().find(|env| {
                env.parent_id == parent
                    && env.status == EnvStatus::Runnable
                    && !env.attached
            });
            if let Some(env) = child {
                return Some(env.id);
            }
            if self.cond.wait_until(&mut st, deadline).timed_out() {
                return None;
            }
        }
    }
}
