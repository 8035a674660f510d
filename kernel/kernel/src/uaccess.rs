//! Copying data between kernel memory and the memory of a user address space.
//!
//! User memory is accessed through the direct mapping of the physical pages that back it, so neither function
//! requires the user address space to be active.

use crate::virtmem::lookup;
use crate::VmError;
use core::ptr;
use riscv::mem::{page_round_down, EntryFlags, PAddr, PageTable, VAddr, MAXVA, PAGESIZE};

/// Find the physical page backing the user page at `page_vaddr` and require `access` permissions on it
fn user_page(root: &PageTable, page_vaddr: VAddr, access: EntryFlags) -> Result<PAddr, VmError> {
    if page_vaddr >= MAXVA {
        return Err(VmError::AddressOutOfRange(page_vaddr));
    }
    let entry = lookup(root, page_vaddr)
        .filter(|entry| {
            entry
                .get_flags()
                .contains(EntryFlags::Valid | EntryFlags::User)
        })
        .ok_or(VmError::NotMapped(page_vaddr))?;
    if !entry.get_flags().contains(access) {
        return Err(VmError::PermissionDenied(page_vaddr));
    }
    entry.get_addr().map_err(|_| VmError::NotMapped(page_vaddr))
}

/// Copy `src` to the user virtual address `dst_vaddr`.
///
/// Every touched page must be mapped user accessible and writable.
/// On error, the pages before the failing one have already been written.
pub fn copy_out(root: &PageTable, dst_vaddr: VAddr, src: &[u8]) -> Result<(), VmError> {
    let mut src = src;
    let mut vaddr = dst_vaddr;
    while !src.is_empty() {
        let page_vaddr = page_round_down(vaddr);
        let page = user_page(root, page_vaddr, EntryFlags::Write)?;
        let offset = vaddr - page_vaddr;
        let n = (PAGESIZE - offset as usize).min(src.len());
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), (page + offset) as usize as *mut u8, n) };

        src = &src[n..];
        vaddr = page_vaddr + PAGESIZE as u64;
    }
    Ok(())
}

/// Fill `dst` with the bytes located at the user virtual address `src_vaddr`.
///
/// Every touched page must be mapped user accessible.
pub fn copy_in(root: &PageTable, dst: &mut [u8], src_vaddr: VAddr) -> Result<(), VmError> {
    let mut copied = 0;
    let mut vaddr = src_vaddr;
    while copied < dst.len() {
        let page_vaddr = page_round_down(vaddr);
        let page = user_page(root, page_vaddr, EntryFlags::empty())?;
        let offset = vaddr - page_vaddr;
        let n = (PAGESIZE - offset as usize).min(dst.len() - copied);
        unsafe {
            ptr::copy_nonoverlapping(
                (page + offset) as usize as *const u8,
                dst[copied..].as_mut_ptr(),
                n,
            )
        };

        copied += n;
        vaddr = page_vaddr + PAGESIZE as u64;
    }
    Ok(())
}

/// Copy a null terminated string from the user virtual address `src_vaddr` into `dst`.
///
/// At most `max` bytes (and never more than `dst` holds) are copied, including the terminator.
/// On success the terminator is part of `dst` and the length of the string without it is returned.
/// If no terminator is found within that budget, [`VmError::MissingTerminator`] is returned and the content of `dst`
/// must not be used.
pub fn copy_in_str(
    root: &PageTable,
    dst: &mut [u8],
    src_vaddr: VAddr,
    max: usize,
) -> Result<usize, VmError> {
    let max = max.min(dst.len());
    let mut copied = 0;
    let mut vaddr = src_vaddr;
    while copied < max {
        let page_vaddr = page_round_down(vaddr);
        let page = user_page(root, page_vaddr, EntryFlags::empty())?;
        let offset = (vaddr - page_vaddr) as usize;
        let available = (PAGESIZE - offset).min(max - copied);
        let bytes = unsafe {
            core::slice::from_raw_parts((page as usize + offset) as *const u8, available)
        };

        for &byte in bytes {
            dst[copied] = byte;
            if byte == 0 {
                return Ok(copied);
            }
            copied += 1;
        }
        vaddr = page_vaddr + PAGESIZE as u64;
    }

    Err(VmError::MissingTerminator { max })
}
