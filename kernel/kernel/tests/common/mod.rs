#![allow(dead_code)]

use allocators::buddy_allocator::{block_size, MAX_ORDER};
use allocators::{AllocInit, BuddyAllocator, PageInfo, PhysAddr};
use riscv::mem::{PageTable, PAGESIZE};
use std::alloc::{alloc_zeroed, dealloc, Layout};

/// The page size as an address offset
pub const PAGE: u64 = PAGESIZE as u64;

/// Host memory that plays the role of physical memory.
///
/// Host addresses are used as physical addresses which matches the direct mapping of RAM in the kernel.
pub struct PhysMemory {
    ptr: *mut u8,
    layout: Layout,
    page_infos: Vec<PageInfo>,
}

impl PhysMemory {
    pub fn new(pages: usize) -> Self {
        let layout = Layout::from_size_align(pages * PAGESIZE, block_size(MAX_ORDER)).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        Self {
            ptr,
            layout,
            page_infos: vec![PageInfo::default(); pages],
        }
    }

    pub fn start(&self) -> PhysAddr {
        self.ptr as PhysAddr
    }

    pub fn end(&self) -> PhysAddr {
        self.start() + self.layout.size() as PhysAddr
    }

    /// An allocator managing all of this memory
    pub fn allocator(&mut self) -> BuddyAllocator<'_> {
        let (start, end) = (self.start(), self.end());
        unsafe { BuddyAllocator::new(start, end, &mut self.page_infos) }
    }
}

impl Drop for PhysMemory {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) }
    }
}

/// Allocate an empty root page table
pub fn new_root<'a>(alloc: &BuddyAllocator) -> (PhysAddr, &'a mut PageTable) {
    let root = alloc.allocate_page(AllocInit::Zeroed).unwrap();
    (root, unsafe { PageTable::from_paddr_mut(root) })
}
