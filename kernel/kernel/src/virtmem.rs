//! Walking and editing Sv39 page table trees
//!
//! All functions operate on a root [`PageTable`] and allocate (or free) intermediate tables through the given
//! [`BuddyAllocator`].
//! Page table pages are obtained zeroed with a reference count of one so that a single [`free`](BuddyAllocator::free)
//! returns them.

use crate::VmError;
use allocators::{AllocError, AllocInit, BuddyAllocator};
use riscv::mem::{
    vaddr_vpn_segment, EntryFlags, PAddr, PageTable, PageTableEntry, VAddr, MAXVA,
    PAGE_TABLE_LEVELS, PAGESIZE,
};

/// Return the leaf level entry responsible for `vaddr`.
///
/// Missing intermediate tables are allocated if `alloc` is given.
/// Otherwise, or if allocation fails, `None` is returned.
/// The returned entry itself may or may not be valid.
///
/// # Panics
/// Panics if `vaddr` is not below [`MAXVA`] or if a huge page mapping is encountered on the way.
pub fn walk<'t>(
    root: &'t mut PageTable,
    vaddr: VAddr,
    alloc: Option<&BuddyAllocator<'_>>,
) -> Option<&'t mut PageTableEntry> {
    assert!(vaddr < MAXVA, "walk: virtual address {vaddr:#x} is out of range");

    let mut table = root;
    for level in (1..PAGE_TABLE_LEVELS).rev() {
        let entry = &mut table.entries[vaddr_vpn_segment(vaddr, level)];
        if entry.is_valid() {
            assert!(
                !entry.is_leaf(),
                "walk: huge page mapping at level {level} for {vaddr:#x}"
            );
        } else {
            let page = alloc?.allocate_page(AllocInit::Zeroed)?;
            log::trace!("allocated level {} page table {page:#x}", level - 1);
            unsafe { entry.set(page, EntryFlags::empty()) };
        }

        let next = entry.get_addr().ok()?;
        table = unsafe { PageTable::from_paddr_mut(next) };
    }

    Some(&mut table.entries[vaddr_vpn_segment(vaddr, 0)])
}

/// Return the leaf level entry responsible for `vaddr` without modifying the tree.
///
/// Returns `None` if `vaddr` is out of range or an intermediate table is missing.
pub fn lookup(root: &PageTable, vaddr: VAddr) -> Option<&PageTableEntry> {
    if vaddr >= MAXVA {
        return None;
    }

    let mut table = root;
    for level in (1..PAGE_TABLE_LEVELS).rev() {
        let entry = &table.entries[vaddr_vpn_segment(vaddr, level)];
        if !entry.is_valid() || entry.is_leaf() {
            return None;
        }
        table = unsafe { PageTable::from_paddr(entry.get_addr().ok()?) };
    }

    Some(&table.entries[vaddr_vpn_segment(vaddr, 0)])
}

/// Look up the physical page that backs the user page at `vaddr`.
///
/// Only pages which are mapped with the [`User`](EntryFlags::User) flag are found.
/// The page's base address is returned; the offset of `vaddr` inside the page is not added.
pub fn translate(root: &PageTable, vaddr: VAddr) -> Option<PAddr> {
    let entry = lookup(root, vaddr)?;
    if !entry.get_flags().contains(EntryFlags::Valid | EntryFlags::User) {
        return None;
    }
    entry.get_addr().ok()
}

/// Map the `size` bytes starting at `vaddr` to the physical memory starting at `paddr`.
///
/// If an intermediate page table cannot be allocated, all leaf entries installed by this call are cleared again
/// before the error is returned.
/// The physical pages named by them are not freed since they belong to the caller.
///
/// # Panics
/// Panics if `vaddr` or `size` are not page aligned, if `size` is zero, if `flags` contain none of the
/// `R`, `W` or `X` permissions or if any page in the range is already mapped.
pub fn map_range(
    root: &mut PageTable,
    alloc: &BuddyAllocator<'_>,
    vaddr: VAddr,
    size: u64,
    paddr: PAddr,
    flags: EntryFlags,
) -> Result<(), VmError> {
    assert_ne!(size, 0, "map_range: size is zero");
    assert_eq!(
        vaddr % PAGESIZE as u64,
        0,
        "map_range: virtual address {vaddr:#x} is not page aligned"
    );
    assert_eq!(
        size % PAGESIZE as u64,
        0,
        "map_range: size {size:#x} is not page aligned"
    );
    assert!(
        flags.intersects(EntryFlags::RWX),
        "map_range: leaf mappings need at least one of R, W or X"
    );
    if vaddr.checked_add(size).map_or(true, |end| end > MAXVA) {
        return Err(VmError::AddressOutOfRange(vaddr));
    }

    log::trace!("mapping {vaddr:#x}..{:#x} to {paddr:#x} with {flags:?}", vaddr + size);
    let page_count = size / PAGESIZE as u64;
    for i in 0..page_count {
        let offset = i * PAGESIZE as u64;
        let Some(entry) = walk(root, vaddr + offset, Some(alloc)) else {
            log::warn!("could not allocate page table while mapping {:#x}", vaddr + offset);
            clear_leaves(root, vaddr, i);
            return Err(AllocError::InsufficientMemory.into());
        };
        assert!(!entry.is_valid(), "map_range: remap of {:#x}", vaddr + offset);
        unsafe { entry.set(paddr + offset, flags) };
    }

    Ok(())
}

/// Clear the leaf entries of `page_count` pages starting at `vaddr` without touching the pages they point to
fn clear_leaves(root: &mut PageTable, vaddr: VAddr, page_count: u64) {
    for i in 0..page_count {
        if let Some(entry) = walk(root, vaddr + i * PAGESIZE as u64, None) {
            unsafe { entry.clear() };
        }
    }
}

/// Remove the mappings of `page_count` pages starting at `vaddr`.
///
/// If `release` is set, the physical pages are given back to the allocator via [`free`](BuddyAllocator::free).
///
/// # Panics
/// Panics if `vaddr` is not page aligned or if any of the pages is not mapped by a leaf entry.
pub fn unmap_range(
    root: &mut PageTable,
    alloc: &BuddyAllocator<'_>,
    vaddr: VAddr,
    page_count: u64,
    release: bool,
) {
    assert_eq!(
        vaddr % PAGESIZE as u64,
        0,
        "unmap_range: virtual address {vaddr:#x} is not page aligned"
    );

    for i in 0..page_count {
        let page_vaddr = vaddr + i * PAGESIZE as u64;
        let entry = walk(root, page_vaddr, None)
            .unwrap_or_else(|| panic!("unmap_range: no page table for {page_vaddr:#x}"));
        assert!(entry.is_valid(), "unmap_range: {page_vaddr:#x} is not mapped");
        assert!(entry.is_leaf(), "unmap_range: {page_vaddr:#x} is not a leaf");

        if release {
            if let Ok(page) = entry.get_addr() {
                alloc.free(page);
            }
        }
        unsafe { entry.clear() };
    }
}

/// Free every intermediate page table below `root` that does not map anything anymore.
///
/// The root table itself is kept.
pub fn prune_page_tables(root: &mut PageTable, alloc: &BuddyAllocator<'_>) {
    prune(root, alloc);
}

/// Returns whether `table` is empty after pruning its children
fn prune(table: &mut PageTable, alloc: &BuddyAllocator<'_>) -> bool {
    for entry in table.entries.iter_mut() {
        if !entry.is_valid() || entry.is_leaf() {
            continue;
        }
        let Ok(child) = entry.get_addr() else {
            continue;
        };
        if prune(unsafe { PageTable::from_paddr_mut(child) }, alloc) {
            unsafe { entry.clear() };
            alloc.free(child);
        }
    }

    table.entries.iter().all(|entry| !entry.is_valid())
}

/// Recursively free the page table located at `table` and all tables below it.
///
/// All leaf mappings must have been removed beforehand.
///
/// # Panics
/// Panics if a leaf entry is encountered.
pub fn free_page_tables(table: PAddr, alloc: &BuddyAllocator<'_>) {
    {
        let table = unsafe { PageTable::from_paddr_mut(table) };
        for entry in table.entries.iter_mut() {
            if !entry.is_valid() {
                continue;
            }
            assert!(!entry.is_leaf(), "freewalk: leaf {entry:?}");
            if let Ok(child) = entry.get_addr() {
                free_page_tables(child, alloc);
            }
            unsafe { entry.clear() };
        }
    }
    alloc.free(table);
}
