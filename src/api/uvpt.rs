//! Page-table view — read-only walk of the caller's own mappings

use x86_64::VirtAddr;

use crate::sys::mmu::{first_pgnum, pdx, pgnum, Pte, NPTENTRIES};
use crate::sys::syscall::PageTableView;

/// Entry mapping `va`, if both levels are present
pub fn pte<K: PageTableView>(k: &K, va: VirtAddr) -> Option<Pte> {
    if !k.uvpd(pdx(va)).is_present() {
        return None;
    }
    let pte = k.uvpt(pgnum(va));
    pte.is_present().then_some(pte)
}

/// Every present page below `limit`, in address order.
/// Whole directory entries that are absent are skipped in one step.
pub fn present_pages<K: PageTableView>(k: &K, limit: VirtAddr) -> PresentPages<'_, K> {
    PresentPages { k, pn: 0, end: pgnum(limit) }
}

pub struct PresentPages<'a, K> {
    k:   &'a K,
    pn:  usize,
    end: usize,
}

impl<K: PageTableView> Iterator for PresentPages<'_, K> {
    type Item = (usize, Pte);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pn < self.end {
            let dir = self.pn / NPTENTRIES;
            if !self.k.uvpd(dir).is_present() {
                self.pn = first_pgnum(dir + 1);
                continue;
            }
            let pn = self.pn;
            self.pn += 1;
            let pte = self.k.uvpt(pn);
            if pte.is_present() {
                return Some((pn, pte));
            }
        }
        None
    }
}
