//! Physical frames — reference-counted 4 KiB pages with a hard limit

use crate::sys::error::{Error, Result};
use crate::sys::mmu::{PGSHIFT, PGSIZE};

/// Index into the arena; physical address is `index << PGSHIFT`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub usize);

impl FrameId {
    pub fn from_paddr(pa: u64) -> Self {
        FrameId((pa >> PGSHIFT) as usize)
    }

    pub fn paddr(self) -> u64 {
        (self.0 as u64) << PGSHIFT
    }
}

struct Frame {
    data: Box<[u8; PGSIZE as usize]>,
    refs: usize,
}

pub struct FrameArena {
    frames: Vec<Option<Frame>>,
    free:   Vec<usize>,
    limit:  usize,
    in_use: usize,
}

impl FrameArena {
    pub fn new(limit: usize) -> Self {
        Self { frames: Vec::new(), free: Vec::new(), limit, in_use: 0 }
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Zero-filled frame with one reference
    pub fn alloc(&mut self) -> Result<FrameId> {
        if self.in_use >= self.limit {
            return Err(Error::NoMem);
        }
        let frame = Frame { data: Box::new([0; PGSIZE as usize]), refs: 1 };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.frames[idx] = Some(frame);
                idx
            }
            None => {
                self.frames.push(Some(frame));
                self.frames.len() - 1
            }
        };
        self.in_use += 1;
        Ok(FrameId(idx))
    }

    pub fn incref(&mut self, id: FrameId) {
        if let Some(frame) = self.frames.get_mut(id.0).and_then(Option::as_mut) {
            frame.refs += 1;
        }
    }

    /// Drop one reference; the frame is freed with its last one
    pub fn decref(&mut self, id: FrameId) {
        let Some(slot) = self.frames.get_mut(id.0) else { return };
        let last = match slot.as_mut() {
            Some(frame) => {
                frame.refs -= 1;
                frame.refs == 0
            }
            None => false,
        };
        if last {
            *slot = None;
            self.free.push(id.0);
            self.in_use -= 1;
        }
    }

    #[cfg(test)]
    pub fn refs(&self, id: FrameId) -> usize {
        self.frames.get(id.0).and_then(Option::as_ref).map_or(0, |f| f.refs)
    }

    pub fn bytes(&self, id: FrameId) -> &[u8] {
        match self.frames.get(id.0).and_then(Option::as_ref) {
            Some(frame) => &frame.data[..],
            None => &[],
        }
    }

    pub fn bytes_mut(&mut self, id: FrameId) -> &mut [u8] {
        match self.frames.get_mut(id.0).and_then(Option::as_mut) {
            Some(frame) => &mut frame.data[..],
            None => &mut [],
        }
    }
}
