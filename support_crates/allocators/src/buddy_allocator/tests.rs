use super::*;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::BTreeSet;
use std::vec;
use std::vec::Vec;

/// Host memory that stands in for physical memory.
///
/// It is aligned to a `2^MAX_ORDER` page boundary so that block alignment on the host matches what the allocator
/// would see on real hardware.
struct TestMemory {
    ptr: *mut u8,
    layout: Layout,
}

impl TestMemory {
    fn new(pages: usize) -> Self {
        let layout = Layout::from_size_align(pages * PAGESIZE, block_size(MAX_ORDER)).unwrap();
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        Self { ptr, layout }
    }

    fn page(&self, index: usize) -> PhysAddr {
        self.ptr as PhysAddr + (index * PAGESIZE) as PhysAddr
    }

    fn bytes(&self, addr: PhysAddr, len: usize) -> &[u8] {
        unsafe { std::slice::from_raw_parts(addr as usize as *const u8, len) }
    }
}

impl Drop for TestMemory {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) }
    }
}

/// Create an allocator managing the pages `first..last` of `mem`
fn allocator<'a>(
    mem: &TestMemory,
    first: usize,
    last: usize,
    infos: &'a mut Vec<PageInfo>,
) -> BuddyAllocator<'a> {
    *infos = vec![PageInfo::default(); last - first];
    unsafe { BuddyAllocator::new(mem.page(first), mem.page(last), infos) }
}

fn free_blocks(alloc: &BuddyAllocator) -> Vec<(PhysAddr, usize)> {
    let mut blocks = Vec::new();
    alloc.visit_free_blocks(|addr, order| blocks.push((addr, order)));
    blocks.sort();
    blocks
}

/// Assert that the free blocks are aligned, do not overlap and lie inside the managed range
fn assert_free_lists_consistent(alloc: &BuddyAllocator) {
    let range = alloc.managed_range();
    let mut previous_end = range.start;
    for (addr, order) in free_blocks(alloc) {
        assert!(is_aligned_to_order(addr, order), "{addr:#x} is not aligned to order {order}");
        assert!(addr >= previous_end, "free block {addr:#x} overlaps its predecessor");
        previous_end = addr + block_size(order) as PhysAddr;
        assert!(previous_end <= range.end);
    }
}

#[test]
fn test_init_aligned_region_forms_single_block() {
    let mem = TestMemory::new(8);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 8, &mut infos);

    assert_eq!(alloc.free_pages(), 8);
    assert_eq!(alloc.free_block_counts(), [0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(free_blocks(&alloc), [(mem.page(0), 3)]);
}

#[test]
fn test_init_unaligned_region_is_partitioned_greedily() {
    let mem = TestMemory::new(16);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 1, 12, &mut infos);

    assert_eq!(alloc.free_pages(), 11);
    assert_eq!(
        free_blocks(&alloc),
        [
            (mem.page(1), 0),
            (mem.page(2), 1),
            (mem.page(4), 2),
            (mem.page(8), 2),
        ]
    );
    assert_free_lists_consistent(&alloc);
}

#[test]
fn test_init_rounds_range_to_page_boundaries() {
    let mem = TestMemory::new(4);
    let mut infos = vec![PageInfo::default(); 4];
    let alloc = unsafe { BuddyAllocator::new(mem.page(0) + 10, mem.page(4) - 10, &mut infos) };

    assert_eq!(alloc.managed_range(), mem.page(1)..mem.page(3));
    assert_eq!(alloc.free_pages(), 2);
}

#[test]
fn test_required_page_infos() {
    assert_eq!(BuddyAllocator::required_page_infos(0x1000, 0x5000), 4);
    assert_eq!(BuddyAllocator::required_page_infos(0x1001, 0x5fff), 3);
    assert_eq!(BuddyAllocator::required_page_infos(0x5000, 0x1000), 0);
}

#[test]
fn test_blocks_are_aligned_to_their_size() {
    let mem = TestMemory::new(64);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 64, &mut infos);

    for order in [0, 2, 1, 3, 0, 4] {
        let addr = alloc.alloc_order(order).unwrap();
        assert!(is_aligned_to_order(addr, order));
        assert_eq!(alloc.allocated_order(addr), Some(order));
    }
    assert_free_lists_consistent(&alloc);
}

#[test]
fn test_split_and_merge_ladder() {
    let mem = TestMemory::new(8);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 8, &mut infos);

    let pages: Vec<_> = (0..4).map(|_| alloc.alloc_order(0).unwrap()).collect();
    assert_eq!(pages, [mem.page(0), mem.page(1), mem.page(2), mem.page(3)]);
    // only the upper half of the original block remains
    assert_eq!(free_blocks(&alloc), [(mem.page(4), 2)]);

    alloc.free(pages[0]);
    assert_eq!(free_blocks(&alloc), [(mem.page(0), 0), (mem.page(4), 2)]);
    alloc.free(pages[1]);
    assert_eq!(free_blocks(&alloc), [(mem.page(0), 1), (mem.page(4), 2)]);
    alloc.free(pages[2]);
    assert_eq!(
        free_blocks(&alloc),
        [(mem.page(0), 1), (mem.page(2), 0), (mem.page(4), 2)]
    );
    alloc.free(pages[3]);
    assert_eq!(free_blocks(&alloc), [(mem.page(0), 3)]);
}

#[test]
fn test_split_merge_round_trip_restores_free_lists() {
    let mem = TestMemory::new(32);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 3, 29, &mut infos);
    let before = free_blocks(&alloc);

    for order in 0..=3 {
        let addr = alloc.alloc_order(order).unwrap();
        assert_ne!(free_blocks(&alloc), before);
        alloc.free(addr);
        assert_eq!(free_blocks(&alloc), before);
    }
}

#[test]
fn test_merge_does_not_cross_managed_range() {
    let mem = TestMemory::new(8);
    let mut infos = Vec::new();
    // pages 0..6 form an order 2 and an order 1 block whose buddy at page 6 is not managed
    let alloc = allocator(&mem, 0, 6, &mut infos);
    assert_eq!(free_blocks(&alloc), [(mem.page(0), 2), (mem.page(4), 1)]);

    let addr = alloc.alloc_order(1).unwrap();
    assert_eq!(addr, mem.page(4));
    alloc.free(addr);
    assert_eq!(free_blocks(&alloc), [(mem.page(0), 2), (mem.page(4), 1)]);
}

#[test]
fn test_pages_are_never_handed_out_twice() {
    let mem = TestMemory::new(16);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 13, &mut infos);

    let mut seen = BTreeSet::new();
    while let Some(addr) = alloc.alloc_page() {
        assert!(seen.insert(addr), "page {addr:#x} was allocated twice");
    }
    assert_eq!(seen.len(), 13);
    assert_eq!(alloc.free_pages(), 0);
    assert_eq!(alloc.alloc_order(0), None);

    for addr in seen {
        alloc.free(addr);
    }
    assert_eq!(alloc.free_pages(), 13);
}

#[test]
fn test_too_large_request_returns_none() {
    let mem = TestMemory::new(8);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 8, &mut infos);

    assert_eq!(alloc.alloc_order(4), None);
    assert_eq!(alloc.free_pages(), 8);
}

#[test]
fn test_conservation_under_mixed_workload() {
    let mem = TestMemory::new(64);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 5, 61, &mut infos);
    let initial = free_blocks(&alloc);
    let total = alloc.free_pages();

    let mut live: Vec<(PhysAddr, usize)> = Vec::new();
    let mut seed = 0x2545_f491_u32;
    for _ in 0..500 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        let choice = (seed >> 16) as usize;
        if choice % 3 != 0 || live.is_empty() {
            let order = choice % 4;
            if let Some(addr) = alloc.alloc_order(order) {
                live.push((addr, order));
            }
        } else {
            let (addr, _) = live.swap_remove(choice % live.len());
            alloc.free(addr);
        }

        let allocated: usize = live.iter().map(|(_, order)| 1 << order).sum();
        assert_eq!(alloc.free_pages() + allocated, total);
    }
    assert_free_lists_consistent(&alloc);

    for (addr, _) in live.drain(..) {
        alloc.free(addr);
    }
    assert_eq!(free_blocks(&alloc), initial);
}

#[test]
fn test_alloc_page_sets_refcount_and_junk() {
    let mem = TestMemory::new(4);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 4, &mut infos);

    let addr = alloc.alloc_page().unwrap();
    assert_eq!(alloc.getref(addr), 1);
    assert!(mem.bytes(addr, PAGESIZE).iter().all(|&b| b == ALLOC_JUNK));

    alloc.free(addr);
    assert_eq!(alloc.getref(addr), 0);
    // the beginning of a free block holds the free list link
    let junk = &mem.bytes(addr, PAGESIZE)[core::mem::size_of::<FreeBlock>()..];
    assert!(junk.iter().all(|&b| b == FREE_JUNK));
}

#[test]
fn test_allocate_page_zeroed() {
    let mem = TestMemory::new(2);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 2, &mut infos);

    let dirty = alloc.alloc_page().unwrap();
    alloc.free(dirty);
    let addr = alloc.allocate_page(AllocInit::Zeroed).unwrap();
    assert!(mem.bytes(addr, PAGESIZE).iter().all(|&b| b == 0));
    assert_eq!(alloc.getref(addr), 1);
}

#[test]
fn test_refcounting() {
    let mem = TestMemory::new(2);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 2, &mut infos);

    let addr = alloc.alloc_page().unwrap();
    alloc.incref(addr);
    alloc.incref(addr);
    assert_eq!(alloc.getref(addr), 3);
    assert!(!alloc.decref(addr));
    assert_eq!(alloc.getref(addr), 2);

    // a shared page only goes back to the free lists with its last reference
    let free_before = alloc.free_pages();
    alloc.free(addr);
    assert_eq!(alloc.getref(addr), 1);
    assert_eq!(alloc.free_pages(), free_before);
    alloc.free(addr);
    assert_eq!(alloc.free_pages(), free_before + 1);
}

#[test]
fn test_decref_reports_last_reference() {
    let mem = TestMemory::new(2);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 2, &mut infos);

    let addr = alloc.alloc_page().unwrap();
    assert!(alloc.decref(addr));
    // the page stays allocated until it is freed explicitly
    assert_eq!(alloc.allocated_order(addr), Some(0));
    alloc.free(addr);
    assert_eq!(alloc.allocated_order(addr), None);
}

#[test]
fn test_incref_saturates() {
    let mem = TestMemory::new(2);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 2, &mut infos);

    let addr = alloc.alloc_page().unwrap();
    for _ in 0..300 {
        alloc.incref(addr);
    }
    assert_eq!(alloc.getref(addr), u8::MAX);
}

#[test]
fn test_alloc_order_block_is_freed_immediately() {
    let mem = TestMemory::new(4);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 4, &mut infos);

    let addr = alloc.alloc_order(1).unwrap();
    assert_eq!(alloc.getref(addr), 0);
    alloc.free(addr);
    assert_eq!(alloc.free_pages(), 4);
}

#[test]
fn test_concurrent_alloc_and_free() {
    let mem = TestMemory::new(64);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 64, &mut infos);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for round in 0..200 {
                    let order = round % 3;
                    let addr = alloc.alloc_order(order).unwrap();
                    assert!(is_aligned_to_order(addr, order));
                    alloc.free(addr);
                }
            });
        }
    });

    assert_eq!(free_blocks(&alloc), [(mem.page(0), 6)]);
}

#[test]
#[should_panic(expected = "not page aligned")]
fn test_free_unaligned_address_panics() {
    let mem = TestMemory::new(2);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 2, &mut infos);
    let addr = alloc.alloc_page().unwrap();
    alloc.free(addr + 8);
}

#[test]
#[should_panic(expected = "outside of the managed range")]
fn test_free_foreign_address_panics() {
    let mem = TestMemory::new(4);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 2, &mut infos);
    alloc.free(mem.page(3));
}

#[test]
#[should_panic(expected = "not the base of an allocated block")]
fn test_double_free_panics() {
    let mem = TestMemory::new(2);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 2, &mut infos);
    let addr = alloc.alloc_page().unwrap();
    alloc.free(addr);
    alloc.free(addr);
}

#[test]
#[should_panic(expected = "refcount underflow")]
fn test_decref_underflow_panics() {
    let mem = TestMemory::new(2);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 2, &mut infos);
    let addr = alloc.alloc_order(0).unwrap();
    alloc.decref(addr);
}

#[test]
#[should_panic(expected = "exceeds the maximum order")]
fn test_alloc_order_above_maximum_panics() {
    let mem = TestMemory::new(2);
    let mut infos = Vec::new();
    let alloc = allocator(&mem, 0, 2, &mut infos);
    alloc.alloc_order(MAX_ORDER + 1);
}
