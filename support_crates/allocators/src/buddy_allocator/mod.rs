//! A buddy system allocator for physical memory pages.
//!
//! The allocator manages a contiguous range of physical memory which it partitions into naturally aligned *blocks*
//! of `2^order` pages.
//! Free blocks are kept in one intrusive singly linked list per order whose links are stored inside the free blocks
//! themselves.
//! Next to the free lists, a table of [`PageInfo`] records (one per managed page) tracks reference counts and the order
//! of every allocated block so that freeing needs nothing but the block's address.
//!
//! # Splitting and merging
//!
//! Two blocks of order `k` whose addresses only differ in bit `log2(PAGESIZE) + k` are *buddies*.
//! When a request cannot be served from the list of its order, a larger block is repeatedly halved and the unused
//! halves are put onto the lists of their respective orders.
//! When a block is freed, it is merged with its buddy for as long as the buddy is free as well.
//!
//! ```text
//!  order 2 │              block               │
//!  order 1 │     lower half   │   upper half  │
//!  order 0 │  page  │  page   │  page │  page │
//! ```
//!
//! # Memory access
//!
//! The allocator writes into the memory it manages (free list links and junk fill patterns).
//! It therefore requires that physical addresses of the managed range are directly dereferenceable, which is the case
//! when running with paging disabled or inside an address space that direct-maps physical memory.

mod page_info;

#[cfg(test)]
mod tests;

pub use page_info::*;

use crate::AllocInit;
use core::ops::Range;
use ksync::SpinLock;

/// Type alias for physical addresses handled by the allocator.
pub type PhysAddr = u64;

/// The size of one page in bytes.
pub const PAGESIZE: usize = 4096;

/// The largest order a block can have (inclusive).
///
/// A block of this order spans `PAGESIZE << MAX_ORDER` bytes (4 MiB).
pub const MAX_ORDER: usize = 10;

/// The number of free lists which is one per order.
pub const ORDER_COUNT: usize = MAX_ORDER + 1;

/// Byte pattern written into freshly allocated pages to make reads of uninitialized memory noticeable.
pub const ALLOC_JUNK: u8 = 0x05;

/// Byte pattern written into freed blocks to make dangling reads noticeable.
pub const FREE_JUNK: u8 = 0x01;

/// The link of the intrusive free list, stored at the beginning of each free block.
#[repr(C)]
struct FreeBlock {
    next: Option<PhysAddr>,
}

/// The number of bytes a block of the given order spans
#[inline]
pub const fn block_size(order: usize) -> usize {
    PAGESIZE << order
}

/// The address of the block which is the buddy of the block at `addr` with the given order
#[inline]
pub const fn buddy_of(addr: PhysAddr, order: usize) -> PhysAddr {
    addr ^ block_size(order) as PhysAddr
}

/// Whether `addr` is aligned to the size of a block of the given order
#[inline]
pub const fn is_aligned_to_order(addr: PhysAddr, order: usize) -> bool {
    addr & (block_size(order) as PhysAddr - 1) == 0
}

#[inline]
const fn page_round_up(addr: PhysAddr) -> PhysAddr {
    (addr + PAGESIZE as PhysAddr - 1) & !(PAGESIZE as PhysAddr - 1)
}

#[inline]
const fn page_round_down(addr: PhysAddr) -> PhysAddr {
    addr & !(PAGESIZE as PhysAddr - 1)
}

/// Everything that is protected by the allocator's lock
struct BuddyState<'mem> {
    start: PhysAddr,
    pages: &'mem mut [PageInfo],
    free_lists: [Option<PhysAddr>; ORDER_COUNT],
}

impl BuddyState<'_> {
    #[inline]
    fn index(&self, addr: PhysAddr) -> usize {
        ((addr - self.start) / PAGESIZE as PhysAddr) as usize
    }

    fn info(&self, addr: PhysAddr) -> &PageInfo {
        &self.pages[self.index(addr)]
    }

    fn info_mut(&mut self, addr: PhysAddr) -> &mut PageInfo {
        let i = self.index(addr);
        &mut self.pages[i]
    }

    /// Put the block at `addr` onto the free list of `order`
    fn push(&mut self, order: usize, addr: PhysAddr) {
        let link = FreeBlock {
            next: self.free_lists[order],
        };
        // Safety: the block is free and therefore owned by the allocator which has direct access to it
        unsafe { (addr as usize as *mut FreeBlock).write(link) };
        self.free_lists[order] = Some(addr);
        self.info_mut(addr).mark_free_head(order);
    }

    /// Take any block from the free list of `order`
    fn pop(&mut self, order: usize) -> Option<PhysAddr> {
        let addr = self.free_lists[order]?;
        // Safety: blocks on a free list always start with a valid link
        let link = unsafe { (addr as usize as *const FreeBlock).read() };
        self.free_lists[order] = link.next;
        self.info_mut(addr).clear();
        Some(addr)
    }

    /// Unlink the block at `addr` from the free list of `order`.
    ///
    /// The block must currently be on that list.
    fn remove(&mut self, order: usize, addr: PhysAddr) {
        let mut prev: Option<PhysAddr> = None;
        let mut cursor = self.free_lists[order];
        while let Some(current) = cursor {
            // Safety: blocks on a free list always start with a valid link
            let next = unsafe { (current as usize as *const FreeBlock).read() }.next;
            if current == addr {
                match prev {
                    None => self.free_lists[order] = next,
                    Some(prev) => unsafe {
                        (*(prev as usize as *mut FreeBlock)).next = next;
                    },
                }
                self.info_mut(addr).clear();
                return;
            }
            prev = Some(current);
            cursor = next;
        }
        panic!("buddy allocator: block {addr:#x} of order {order} is not on its free list");
    }

    /// Whether the block of `order` at `addr` is currently a free block of exactly that order
    fn is_free_block(&self, addr: PhysAddr, order: usize) -> bool {
        let info = self.info(addr);
        info.state() == PageState::FreeHead && info.order() == order
    }

    /// Remove one block of at least `order` from the free lists and split it down to exactly `order`
    fn take_block(&mut self, order: usize) -> Option<PhysAddr> {
        let found_order = (order..ORDER_COUNT).find(|&o| self.free_lists[o].is_some())?;
        let block = self.pop(found_order)?;

        for split_order in (order..found_order).rev() {
            let upper_half = buddy_of(block, split_order);
            log::trace!("splitting off {upper_half:#x} with order {split_order}");
            self.push(split_order, upper_half);
        }

        self.info_mut(block).mark_allocated_head(order);
        Some(block)
    }

    /// Insert the block at `addr` into the free lists, merging it with its buddies for as long as possible
    fn insert_coalescing(&mut self, end: PhysAddr, mut addr: PhysAddr, mut order: usize) {
        while order < MAX_ORDER {
            let buddy = buddy_of(addr, order);
            let buddy_in_range =
                buddy >= self.start && buddy + block_size(order) as PhysAddr <= end;
            if !buddy_in_range || !self.is_free_block(buddy, order) {
                break;
            }

            log::trace!("merging {addr:#x} with its buddy {buddy:#x} at order {order}");
            self.remove(order, buddy);
            addr = addr.min(buddy);
            order += 1;
        }

        let first = self.index(addr);
        for info in &mut self.pages[first..first + (1 << order)] {
            info.clear();
        }
        self.push(order, addr);
    }
}

/// A buddy system allocator for physical pages with per-page reference counting.
///
/// All operations lock the allocator for the duration of their bookkeeping which makes a shared reference sufficient
/// and allows the allocator to be used by all harts concurrently.
pub struct BuddyAllocator<'mem> {
    start: PhysAddr,
    end: PhysAddr,
    state: SpinLock<BuddyState<'mem>>,
}

impl<'mem> BuddyAllocator<'mem> {
    /// The number of [`PageInfo`] records that are required to manage the given memory range
    pub const fn required_page_infos(start: PhysAddr, end: PhysAddr) -> usize {
        let start = page_round_up(start);
        let end = page_round_down(end);
        if end <= start {
            0
        } else {
            ((end - start) / PAGESIZE as PhysAddr) as usize
        }
    }

    /// Create a new allocator which manages all pages between `start` and `end`.
    ///
    /// `start` is rounded up and `end` is rounded down to page boundaries.
    /// The range is then partitioned greedily into the largest naturally aligned blocks that fit, which are all put onto
    /// the free lists.
    ///
    /// # Panics
    /// This function panics if `page_infos` is too small to hold one record for each managed page.
    ///
    /// # Safety
    /// The memory between `start` and `end` must not be used by anything else for the lifetime `'mem` and must be
    /// accessible by dereferencing its physical addresses.
    pub unsafe fn new(start: PhysAddr, end: PhysAddr, page_infos: &'mem mut [PageInfo]) -> Self {
        let start = page_round_up(start);
        let end = page_round_down(end).max(start);
        let page_count = Self::required_page_infos(start, end);
        assert!(
            page_infos.len() >= page_count,
            "buddy allocator needs {page_count} page infos but only {} were given",
            page_infos.len()
        );
        page_infos.fill(PageInfo::default());

        let mut state = BuddyState {
            start,
            pages: &mut page_infos[..page_count],
            free_lists: [None; ORDER_COUNT],
        };

        let mut addr = start;
        while addr + PAGESIZE as PhysAddr <= end {
            let order = (0..=MAX_ORDER)
                .rev()
                .find(|&o| {
                    is_aligned_to_order(addr, o) && addr + block_size(o) as PhysAddr <= end
                })
                .unwrap_or(0);
            state.push(order, addr);
            addr += block_size(order) as PhysAddr;
        }

        log::debug!(
            "buddy allocator manages {page_count} pages between {start:#x} and {end:#x}"
        );
        Self {
            start,
            end,
            state: SpinLock::new(state),
        }
    }

    /// The physical address range managed by this allocator
    pub fn managed_range(&self) -> Range<PhysAddr> {
        self.start..self.end
    }

    /// Allocate a block of `2^order` pages.
    ///
    /// The returned address is aligned to the size of the block.
    /// The block's content is left as-is and its reference count is not touched.
    ///
    /// Returns `None` if no free block of at least the requested order exists.
    pub fn alloc_order(&self, order: usize) -> Option<PhysAddr> {
        assert!(
            order <= MAX_ORDER,
            "alloc_order: order {order} exceeds the maximum order {MAX_ORDER}"
        );
        let block = self.state.lock().take_block(order);
        match block {
            Some(addr) => log::trace!("allocated block {addr:#x} with order {order}"),
            None => log::debug!("out of memory while allocating a block of order {order}"),
        }
        block
    }

    /// Allocate a single page whose content is initialized according to `init` and whose reference count is 1
    pub fn allocate_page(&self, init: AllocInit) -> Option<PhysAddr> {
        let addr = self.alloc_order(0)?;

        // Safety: the page was just handed out to us so nobody else accesses it
        let content = unsafe { Self::block_bytes(addr, 0) };
        match init {
            AllocInit::Uninitialized => {}
            AllocInit::Zeroed => content.fill(0),
            AllocInit::Data(byte) => content.fill(byte),
        }

        self.state.lock().info_mut(addr).set_refcount(1);
        Some(addr)
    }

    /// Allocate a single page which is filled with [`ALLOC_JUNK`] and whose reference count is 1.
    ///
    /// Callers that need zeroed memory must zero it themselves.
    pub fn alloc_page(&self) -> Option<PhysAddr> {
        self.allocate_page(AllocInit::Data(ALLOC_JUNK))
    }

    /// Release one reference to the block at `addr`.
    ///
    /// If the block's reference count is nonzero, it is decremented and the block stays allocated for as long as the
    /// count remains above zero.
    /// Once the count is zero (or if it already was, as for blocks from [`alloc_order`](Self::alloc_order)), the block
    /// is filled with [`FREE_JUNK`] and returned to the free lists, merging it with its buddies.
    ///
    /// # Panics
    /// Panics if `addr` is not page aligned, lies outside the managed range or is not the base of an allocated block.
    pub fn free(&self, addr: PhysAddr) {
        self.check_addr("free", addr);

        let order = {
            let mut state = self.state.lock();
            let info = state.info_mut(addr);
            assert!(
                info.state() == PageState::AllocatedHead,
                "free: {addr:#x} is not the base of an allocated block"
            );
            if info.refcount() > 0 {
                info.set_refcount(info.refcount() - 1);
                if info.refcount() > 0 {
                    return;
                }
            }
            let order = info.order();
            info.clear();
            order
        };

        // Safety: the last reference is gone and the block is not yet on a free list so we are its only user
        unsafe { Self::block_bytes(addr, order) }.fill(FREE_JUNK);

        log::trace!("freeing block {addr:#x} with order {order}");
        self.state.lock().insert_coalescing(self.end, addr, order);
    }

    /// Increment the reference count of the page at `addr`, saturating at `u8::MAX`
    pub fn incref(&self, addr: PhysAddr) {
        self.check_addr("incref", addr);
        let mut state = self.state.lock();
        let info = state.info_mut(addr);
        info.set_refcount(info.refcount().saturating_add(1));
    }

    /// Decrement the reference count of the page at `addr` and return whether it reached zero.
    ///
    /// This does not free the page; a `true` result only tells the caller that the page may now be freed.
    pub fn decref(&self, addr: PhysAddr) -> bool {
        self.check_addr("decref", addr);
        let mut state = self.state.lock();
        let info = state.info_mut(addr);
        let refcount = info
            .refcount()
            .checked_sub(1)
            .unwrap_or_else(|| panic!("decref: refcount underflow of page {addr:#x}"));
        info.set_refcount(refcount);
        refcount == 0
    }

    /// Read the current reference count of the page at `addr`
    pub fn getref(&self, addr: PhysAddr) -> u8 {
        self.check_addr("getref", addr);
        self.state.lock().info(addr).refcount()
    }

    /// The order of the allocated block starting at `addr` or `None` if no allocated block starts there
    pub fn allocated_order(&self, addr: PhysAddr) -> Option<usize> {
        self.check_addr("allocated_order", addr);
        let state = self.state.lock();
        let info = state.info(addr);
        (info.state() == PageState::AllocatedHead).then(|| info.order())
    }

    /// The number of free blocks on each free list
    pub fn free_block_counts(&self) -> [usize; ORDER_COUNT] {
        let mut counts = [0; ORDER_COUNT];
        self.visit_free_blocks(|_, order| counts[order] += 1);
        counts
    }

    /// The total number of free pages
    pub fn free_pages(&self) -> usize {
        self.free_block_counts()
            .iter()
            .enumerate()
            .map(|(order, count)| count << order)
            .sum()
    }

    /// Call `f` with the address and order of every free block.
    ///
    /// The allocator is locked while doing so which means `f` must not call back into the allocator.
    pub fn visit_free_blocks(&self, mut f: impl FnMut(PhysAddr, usize)) {
        let state = self.state.lock();
        for (order, head) in state.free_lists.iter().enumerate() {
            let mut cursor = *head;
            while let Some(addr) = cursor {
                f(addr, order);
                // Safety: blocks on a free list always start with a valid link
                cursor = unsafe { (addr as usize as *const FreeBlock).read() }.next;
            }
        }
    }

    /// Assert that `addr` names a page managed by this allocator
    fn check_addr(&self, op: &str, addr: PhysAddr) {
        assert!(
            addr % PAGESIZE as PhysAddr == 0,
            "{op}: address {addr:#x} is not page aligned"
        );
        assert!(
            addr >= self.start && addr < self.end,
            "{op}: address {addr:#x} is outside of the managed range {:#x}..{:#x}",
            self.start,
            self.end
        );
    }

    /// # Safety
    /// The caller must have exclusive access to the block.
    unsafe fn block_bytes<'a>(addr: PhysAddr, order: usize) -> &'a mut [u8] {
        core::slice::from_raw_parts_mut(addr as usize as *mut u8, block_size(order))
    }
}
