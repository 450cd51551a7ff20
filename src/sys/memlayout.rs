//! Memory layout — fixed virtual address map shared with the kernel
//!
//! ```text
//!  ULIM     0xEF80_0000  +------------------------------+
//!  UVPT     0xEF40_0000  |  read-only page tables       |
//!  UPAGES   0xEF00_0000  |  read-only page info         |
//!  UENVS    0xEEC0_0000  |  read-only env table         |
//!  UTOP, UXSTACKTOP ---> +------------------------------+
//!                        |  user exception stack (1 pg) |
//!                        +------------------------------+
//!                        |  empty guard page            |
//!  USTACKTOP 0xEEBF_E000 +------------------------------+
//!                        |  normal user stack           |
//!                        ~          ...                 ~
//!  UTEXT    0x0080_0000  +------------------------------+
//!  PFTEMP   0x007F_F000  |  copy-on-write staging slot  |
//!  UTEMP    0x0040_0000  +------------------------------+
//! ```
//!
//! Everything below `UTOP` belongs to the process; everything above is
//! mapped by the kernel and never touched by fork.

use super::mmu::{PGSIZE, PTSIZE};

/// Kernel/user split for read-only kernel structures
pub const ULIM:       u64 = 0xEF80_0000;

/// Self-mapped page directory window (read-only to user)
pub const UVPT:       u64 = ULIM - PTSIZE;

/// Read-only copy of the physical page info array
pub const UPAGES:     u64 = UVPT - PTSIZE;

/// Read-only copy of the global environment table
pub const UENVS:      u64 = UPAGES - PTSIZE;

/// Top of user-accessible memory
pub const UTOP:       u64 = UENVS;

/// Top of the one-page user exception stack
pub const UXSTACKTOP: u64 = UTOP;

/// Top of the normal user stack (one guard page below the exception stack)
pub const USTACKTOP:  u64 = UTOP - 2 * PGSIZE;

/// Where user programs are linked
pub const UTEXT:      u64 = 2 * PTSIZE;

/// Scratch area for temporary mappings
pub const UTEMP:      u64 = PTSIZE;

/// Staging page used while resolving a copy-on-write fault
pub const PFTEMP:     u64 = UTEMP + PTSIZE - PGSIZE;

/// log2 of the environment table size
pub const LOG2NENV:   usize = 10;

/// Number of slots in the global environment table
pub const NENV:       usize = 1 << LOG2NENV;

/// Page holding the exception stack
pub const fn uxstack_page() -> u64 {
    UXSTACKTOP - PGSIZE
}
