//! MMU — page geometry, address decomposition and typed permissions
//!
//! Two-level paging: a 1024-entry page directory of 1024-entry page
//! tables mapping 4 KiB pages.
//!
//! ```text
//!  31            22 21            12 11             0
//! +----------------+----------------+----------------+
//! |   dir index    |  table index   |  page offset   |
//! +----------------+----------------+----------------+
//!  \------- page number (pgnum) ---/
//! ```
//!
//! Permission bits reuse the x86 page-table flag layout. Bit 11 is one
//! of the three bits the hardware leaves to software; this library uses
//! it as the copy-on-write tag and the kernel passes it through untouched.

use bit_field::BitField;
use core::fmt;
use core::ops::{BitAnd, BitOr, Sub};
use x86_64::structures::paging::PageTableFlags;
use x86_64::VirtAddr;

use super::error::{Error, Result};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

pub const PGSHIFT:    usize = 12;
pub const PDXSHIFT:   usize = 22;

/// Bytes mapped by one page
pub const PGSIZE:     u64 = 1 << PGSHIFT;

pub const NPDENTRIES: usize = 1024;
pub const NPTENTRIES: usize = 1024;

/// Bytes mapped by one page directory entry
pub const PTSIZE:     u64 = PGSIZE * NPTENTRIES as u64;

/// Page-directory index of `va`
pub fn pdx(va: VirtAddr) -> usize {
    va.as_u64().get_bits(PDXSHIFT..32) as usize
}

/// Page-table index of `va`
pub fn ptx(va: VirtAddr) -> usize {
    va.as_u64().get_bits(PGSHIFT..PDXSHIFT) as usize
}

/// Linear page number of `va` (index into the self-mapped table window)
pub fn pgnum(va: VirtAddr) -> usize {
    va.as_u64().get_bits(PGSHIFT..32) as usize
}

/// First address of page number `pn`
pub fn page_va(pn: usize) -> VirtAddr {
    VirtAddr::new((pn as u64) << PGSHIFT)
}

/// First page number covered by directory entry `pdx`
pub fn first_pgnum(pdx: usize) -> usize {
    pdx * NPTENTRIES
}

pub fn round_down(va: VirtAddr) -> VirtAddr {
    va.align_down(PGSIZE)
}

pub fn is_page_aligned(va: VirtAddr) -> bool {
    va.is_aligned(PGSIZE)
}

/// Physical address bits of a raw entry
pub const fn entry_addr(raw: u64) -> u64 {
    raw & !0xFFF
}

// ---------------------------------------------------------------------------
// Perm — permission bitset understood by this layer
// ---------------------------------------------------------------------------

/// Mapping permissions as passed to and read back from the kernel.
///
/// `COW` never coexists with `W` on a mapping this library created;
/// [`Pte::perm`] rejects entries where it does.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Perm(PageTableFlags);

impl Perm {
    pub const P:       Perm = Perm(PageTableFlags::PRESENT);
    pub const W:       Perm = Perm(PageTableFlags::WRITABLE);
    pub const U:       Perm = Perm(PageTableFlags::USER_ACCESSIBLE);

    /// Copy-on-write tag (software-available bit 11)
    pub const COW:     Perm = Perm(PageTableFlags::BIT_11);

    /// All three software-available bits
    pub const AVAIL:   Perm = Perm::from_bits(
        PageTableFlags::BIT_9.bits()
        | PageTableFlags::BIT_10.bits()
        | PageTableFlags::BIT_11.bits()
    );

    /// The only bits a privileged mapping call accepts
    pub const SYSCALL: Perm = Perm::from_bits(
        Perm::P.bits() | Perm::U.bits() | Perm::W.bits() | Perm::AVAIL.bits()
    );

    /// Private writable user page
    pub const RW:      Perm = Perm::from_bits(Perm::P.bits() | Perm::U.bits() | Perm::W.bits());

    /// Shared copy-on-write user page
    pub const COW_RO:  Perm = Perm::from_bits(Perm::P.bits() | Perm::U.bits() | Perm::COW.bits());

    /// Read-only user page
    pub const RO:      Perm = Perm::from_bits(Perm::P.bits() | Perm::U.bits());

    pub const fn empty() -> Perm {
        Perm(PageTableFlags::empty())
    }

    /// Keeps the low flag bits of `bits`; frame address bits are dropped.
    pub const fn from_bits(bits: u64) -> Perm {
        Perm(PageTableFlags::from_bits_truncate(bits & 0xFFF))
    }

    pub const fn bits(self) -> u64 {
        self.0.bits()
    }

    pub fn flags(self) -> PageTableFlags {
        self.0
    }

    pub const fn union(self, other: Perm) -> Perm {
        Perm::from_bits(self.bits() | other.bits())
    }

    pub const fn difference(self, other: Perm) -> Perm {
        Perm::from_bits(self.bits() & !other.bits())
    }

    pub const fn contains(self, other: Perm) -> bool {
        self.bits() & other.bits() == other.bits()
    }

    pub const fn intersects(self, other: Perm) -> bool {
        self.bits() & other.bits() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.bits() == 0
    }

    pub const fn is_present(self) -> bool {
        self.contains(Perm::P)
    }

    pub const fn is_writable(self) -> bool {
        self.contains(Perm::W)
    }

    pub const fn is_cow(self) -> bool {
        self.contains(Perm::COW)
    }

    /// Acceptable to `page_alloc`/`page_map`/`ipc_try_send`:
    /// at least `P|U`, nothing outside `SYSCALL`.
    pub const fn is_syscall_perm(self) -> bool {
        self.contains(Perm::P.union(Perm::U))
            && self.difference(Perm::SYSCALL).is_empty()
    }
}

impl Default for Perm {
    fn default() -> Self {
        Perm::empty()
    }
}

impl BitOr for Perm {
    type Output = Perm;
    fn bitor(self, rhs: Perm) -> Perm { self.union(rhs) }
}

impl BitAnd for Perm {
    type Output = Perm;
    fn bitand(self, rhs: Perm) -> Perm { Perm::from_bits(self.bits() & rhs.bits()) }
}

impl Sub for Perm {
    type Output = Perm;
    fn sub(self, rhs: Perm) -> Perm { self.difference(rhs) }
}

impl fmt::Debug for Perm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Perm, &str); 4] = [
            (Perm::P, "P"), (Perm::U, "U"), (Perm::W, "W"), (Perm::COW, "COW"),
        ];
        write!(f, "Perm(")?;
        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first { write!(f, "|")?; }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        let rest = self.bits() & !(Perm::P | Perm::U | Perm::W | Perm::COW).bits();
        if rest != 0 {
            if !first { write!(f, "|")?; }
            write!(f, "{:#x}", rest)?;
        }
        write!(f, ")")
    }
}

// ---------------------------------------------------------------------------
// Raw entries as seen through the read-only table window
// ---------------------------------------------------------------------------

/// One page-directory entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pde(u64);

impl Pde {
    pub const fn from_raw(raw: u64) -> Self { Pde(raw) }
    pub const fn raw(self) -> u64 { self.0 }

    pub const fn is_present(self) -> bool {
        self.0 & Perm::P.bits() != 0
    }
}

/// One page-table entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pte(u64);

impl Pte {
    pub const fn from_raw(raw: u64) -> Self { Pte(raw) }
    pub const fn raw(self) -> u64 { self.0 }

    pub const fn is_present(self) -> bool {
        self.0 & Perm::P.bits() != 0
    }

    /// Physical address of the mapped frame
    pub const fn frame_addr(self) -> u64 {
        entry_addr(self.0)
    }

    /// Permission bits, validated: an entry that is both writable and
    /// copy-on-write is rejected as `Error::Invalid`.
    pub fn perm(self) -> Result<Perm> {
        let perm = Perm::from_bits(self.0);
        if perm.is_writable() && perm.is_cow() {
            return Err(Error::Invalid);
        }
        Ok(perm)
    }
}
