//! Data-Structures and Definitions for Sv39 Virtual-Addressing
//!
//! # Virtual Addressing Basics
//!
//! Sv39 implementations support a 39-bit virtual address space, divided into 4 KiB pages.
//! An Sv39 address is partitioned as shown in the below figure.
//!
//! ```text
//! 38           30 29          21 20          12 11            0
//! ┌──────────────┬──────────────┬──────────────┬───────────────┐
//! │    VPN[2]    │    VPN[1]    │    VPN[0]    │  page offset  │
//! └──────────────┴──────────────┴──────────────┴───────────────┘
//!      9bits          9bits          9bits           12bits
//!                      Sv39 Virtual Address
//! ```
//!
//! This virtual address is translated into a physical address by transforming the VPN (virtual page number) segments
//! into PPN (physical page number) segments via a three-level page table hierarchy.
//! The 12-bit page offset is untranslated and carried over into the physical address.
//!
//! ```text
//! 55                   30 29          21 20          12 11            0
//! ┌──────────────────────┬──────────────┬──────────────┬───────────────┐
//! │        PPN[2]        │    PPN[1]    │    PPN[0]    │  page offset  │
//! └──────────────────────┴──────────────┴──────────────┴───────────────┘
//!          26bits             9bits          9bits           12bits
//!                      Sv39 Phyiscal Address
//! ```
//!
//! Virtual addresses, which are 64 bits, must have bits 63–39 all equal to bit 38, or else a page-fault exception will occur.
//! To avoid having to sign-extend addresses, only the lower half of the address space is used which makes
//! [`MAXVA`] the first unusable virtual address.

mod paddr;
mod page_table;
mod page_table_entry;
mod vaddr;

use core::ops::{Deref, DerefMut};
pub use paddr::*;
pub use page_table::*;
pub use page_table_entry::*;
pub use vaddr::*;

/// How large each page in the memory of a riscv board is.
///
/// This effects the alignment and sizes of some data structures that directly interface with the CPU e.g. PageTables
pub const PAGESIZE: usize = 4096;

/// Type definition for a slice of bytes that is exactly one page large and aligned to it as well
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(C, align(4096))]
pub struct MemoryPage([u8; PAGESIZE]);

impl Deref for MemoryPage {
    type Target = [u8; PAGESIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for MemoryPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self([0u8; PAGESIZE])
    }
}

/// Round `addr` up to the next page boundary
#[inline]
pub const fn page_round_up(addr: u64) -> u64 {
    (addr + PAGESIZE as u64 - 1) & !(PAGESIZE as u64 - 1)
}

/// Round `addr` down to the start of the page it is located in
#[inline]
pub const fn page_round_down(addr: u64) -> u64 {
    addr & !(PAGESIZE as u64 - 1)
}
