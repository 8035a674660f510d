use crate::mem::{MemoryPage, PAddr, PageTableEntry, PAGESIZE};
use core::mem;
use static_assertions::{assert_eq_align, assert_eq_size};

/// A PageTable for configuring virtual memory mapping.
///
/// It exactly fills 4096 bytes which is also the size of mapped pages.
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [PageTableEntry; PAGE_TABLE_ENTRIES],
}

/// How many entries a single [`PageTable`] holds
pub const PAGE_TABLE_ENTRIES: usize = PAGESIZE / mem::size_of::<PageTableEntry>();

assert_eq_size!(PageTable, MemoryPage);
assert_eq_align!(PageTable, MemoryPage);

impl PageTable {
    /// Initialize the page located at `page` with an empty `PageTable`
    ///
    /// # Safety
    /// `page` must be the address of a page that is exclusively owned by the caller for the lifetime `'a` and that is
    /// accessible through its physical address.
    pub unsafe fn init<'a>(page: PAddr) -> &'a mut PageTable {
        log::trace!("initializing empty pagetable at {page:#x}");
        let table = Self::from_paddr_mut(page);
        table.clear();
        table
    }

    /// Interpret the page located at `page` as a `PageTable`
    ///
    /// # Safety
    /// `page` must hold an initialized page table which is not aliased for the lifetime `'a`.
    pub unsafe fn from_paddr_mut<'a>(page: PAddr) -> &'a mut PageTable {
        &mut *(page as usize as *mut PageTable)
    }

    /// Interpret the page located at `page` as a `PageTable`
    ///
    /// # Safety
    /// `page` must hold an initialized page table which is not mutated for the lifetime `'a`.
    pub unsafe fn from_paddr<'a>(page: PAddr) -> &'a PageTable {
        &*(page as usize as *const PageTable)
    }

    /// The physical address at which this table is located
    pub fn paddr(&self) -> PAddr {
        self as *const Self as PAddr
    }

    /// Invalidate all entries of this table
    pub fn clear(&mut self) {
        self.entries.fill_with(PageTableEntry::empty);
    }
}
