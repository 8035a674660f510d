//! Address spaces of user processes

use crate::uaccess;
use crate::virtmem::{self, free_page_tables, map_range, prune_page_tables, unmap_range};
use crate::VmError;
use allocators::{AllocError, AllocInit, BuddyAllocator};
use core::ptr;
use riscv::mem::{page_round_up, EntryFlags, PAddr, PageTable, VAddr, PAGESIZE};

/// The address space of a user process.
///
/// It owns a root page table, all intermediate tables below it and every page mapped between virtual address 0 and
/// [`size`](AddressSpace::size).
/// All of them are given back to the allocator by [`destroy`](AddressSpace::destroy).
pub struct AddressSpace<'a, 'mem> {
    alloc: &'a BuddyAllocator<'mem>,
    root: PAddr,
    size: u64,
}

impl<'a, 'mem> AddressSpace<'a, 'mem> {
    /// Create an empty address space
    pub fn create(alloc: &'a BuddyAllocator<'mem>) -> Result<Self, VmError> {
        let root = alloc
            .allocate_page(AllocInit::Zeroed)
            .ok_or(AllocError::InsufficientMemory)?;
        log::debug!("created address space with root page table {root:#x}");
        Ok(Self {
            alloc,
            root,
            size: 0,
        })
    }

    /// How many bytes of user memory are mapped, starting at virtual address 0
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The physical address of the root page table
    pub fn root(&self) -> PAddr {
        self.root
    }

    pub fn page_table(&self) -> &PageTable {
        unsafe { PageTable::from_paddr(self.root) }
    }

    /// Mutable access to the page table for installing mappings that this address space does not track, e.g. the
    /// trampoline.
    ///
    /// Mappings added this way must be removed again before the address space is destroyed.
    pub fn page_table_mut(&mut self) -> &mut PageTable {
        unsafe { PageTable::from_paddr_mut(self.root) }
    }

    /// Load the very first user program.
    ///
    /// The image is copied into a fresh zeroed page mapped at virtual address 0 with full user permissions.
    ///
    /// # Panics
    /// Panics if the address space is not empty or if `image` is larger than a page.
    pub fn load_first(&mut self, image: &[u8]) -> Result<(), VmError> {
        assert_eq!(self.size, 0, "load_first: address space is not empty");
        assert!(
            image.len() <= PAGESIZE,
            "load_first: image of {} bytes is larger than a page",
            image.len()
        );

        let page = self
            .alloc
            .allocate_page(AllocInit::Zeroed)
            .ok_or(AllocError::InsufficientMemory)?;
        let alloc = self.alloc;
        let flags = EntryFlags::RWX | EntryFlags::User;
        if let Err(e) = map_range(self.page_table_mut(), alloc, 0, PAGESIZE as u64, page, flags) {
            alloc.free(page);
            return Err(e);
        }
        unsafe { ptr::copy_nonoverlapping(image.as_ptr(), page as usize as *mut u8, image.len()) };

        self.size = PAGESIZE as u64;
        Ok(())
    }

    /// Grow the address space to `new_size` bytes by mapping zeroed pages that are user readable and additionally
    /// carry `extra_flags`.
    ///
    /// Growing is all or nothing: if any page cannot be allocated or mapped, everything allocated by this call is
    /// released again and the size stays unchanged.
    /// A `new_size` below the current size is not an error and leaves the address space as-is.
    pub fn grow(&mut self, new_size: u64, extra_flags: EntryFlags) -> Result<u64, VmError> {
        let old_size = self.size;
        if new_size < old_size {
            return Ok(old_size);
        }

        let flags = EntryFlags::Read | EntryFlags::User | extra_flags;
        let mut vaddr = page_round_up(old_size);
        while vaddr < new_size {
            if let Err(e) = self.map_fresh_page(vaddr, flags) {
                log::warn!("growing address space to {new_size:#x} failed at {vaddr:#x}: {e}");
                self.release(vaddr, old_size);
                return Err(e);
            }
            vaddr += PAGESIZE as u64;
        }

        log::debug!("grew address space {:#x} from {old_size:#x} to {new_size:#x}", self.root);
        self.size = new_size;
        Ok(new_size)
    }

    fn map_fresh_page(&mut self, vaddr: VAddr, flags: EntryFlags) -> Result<(), VmError> {
        let alloc = self.alloc;
        let page = alloc
            .allocate_page(AllocInit::Zeroed)
            .ok_or(AllocError::InsufficientMemory)?;
        map_range(self.page_table_mut(), alloc, vaddr, PAGESIZE as u64, page, flags).map_err(|e| {
            alloc.free(page);
            e
        })
    }

    /// Shrink the address space to `new_size` bytes.
    ///
    /// All pages that lie completely above the new size are unmapped and freed together with page tables that become
    /// empty.
    /// A `new_size` above the current size leaves the address space as-is.
    /// Returns the resulting size.
    pub fn shrink(&mut self, new_size: u64) -> u64 {
        if new_size >= self.size {
            return self.size;
        }

        self.release(self.size, new_size);
        log::debug!(
            "shrunk address space {:#x} from {:#x} to {new_size:#x}",
            self.root,
            self.size
        );
        self.size = new_size;
        new_size
    }

    /// Unmap and free the pages between `new_size` and `old_size`
    fn release(&mut self, old_size: u64, new_size: u64) {
        let alloc = self.alloc;
        let first = page_round_up(new_size);
        let end = page_round_up(old_size);
        if first < end {
            let page_count = (end - first) / PAGESIZE as u64;
            unmap_range(self.page_table_mut(), alloc, first, page_count, true);
        }
        prune_page_tables(self.page_table_mut(), alloc);
    }

    /// Grow or shrink the address space by `delta` bytes.
    ///
    /// New memory is mapped writable.
    /// Returns the size before the change.
    pub fn resize(&mut self, delta: i64) -> Result<u64, VmError> {
        let old_size = self.size;
        let new_size = old_size
            .checked_add_signed(delta)
            .ok_or(VmError::AddressOutOfRange(old_size))?;
        if delta > 0 {
            self.grow(new_size, EntryFlags::Write)?;
        } else {
            self.shrink(new_size);
        }
        Ok(old_size)
    }

    /// Copy the content of this address space into `dst`.
    ///
    /// Every page is copied into a freshly allocated one that is mapped at the same address with the same
    /// permissions in `dst`.
    /// If this fails midway, everything installed into `dst` so far is removed again.
    ///
    /// # Panics
    /// Panics if `dst` is not empty or if a page below [`size`](AddressSpace::size) is not mapped.
    pub fn clone_into(&self, dst: &mut AddressSpace<'_, '_>) -> Result<(), VmError> {
        assert_eq!(dst.size, 0, "clone: destination address space is not empty");

        let mut vaddr = 0;
        while vaddr < self.size {
            if let Err(e) = self.clone_page(dst, vaddr) {
                log::warn!("cloning address space {:#x} failed at {vaddr:#x}: {e}", self.root);
                dst.release(vaddr, 0);
                return Err(e);
            }
            vaddr += PAGESIZE as u64;
        }

        log::debug!("cloned address space {:#x} into {:#x}", self.root, dst.root);
        dst.size = self.size;
        Ok(())
    }

    fn clone_page(&self, dst: &mut AddressSpace<'_, '_>, vaddr: VAddr) -> Result<(), VmError> {
        let (src_page, flags) = virtmem::lookup(self.page_table(), vaddr)
            .filter(|entry| entry.is_leaf())
            .and_then(|entry| {
                let flags = entry.get_flags().difference(EntryFlags::Valid);
                Some((entry.get_addr().ok()?, flags))
            })
            .unwrap_or_else(|| panic!("clone: page {vaddr:#x} is not present"));

        let page = dst
            .alloc
            .allocate_page(AllocInit::Uninitialized)
            .ok_or(AllocError::InsufficientMemory)?;
        unsafe {
            ptr::copy_nonoverlapping(
                src_page as usize as *const u8,
                page as usize as *mut u8,
                PAGESIZE,
            )
        };
        let alloc = dst.alloc;
        map_range(dst.page_table_mut(), alloc, vaddr, PAGESIZE as u64, page, flags).map_err(|e| {
            alloc.free(page);
            e
        })
    }

    /// Create a copy of this address space that uses the same allocator
    pub fn try_clone(&self) -> Result<Self, VmError> {
        let mut copy = Self::create(self.alloc)?;
        match self.clone_into(&mut copy) {
            Ok(()) => Ok(copy),
            Err(e) => {
                copy.destroy();
                Err(e)
            }
        }
    }

    /// Remove the user permission from the page at `vaddr` so that it can serve as a guard page
    ///
    /// # Panics
    /// Panics if the page has no page table entry.
    pub fn revoke_user_access(&mut self, vaddr: VAddr) {
        let entry = virtmem::walk(self.page_table_mut(), vaddr, None)
            .filter(|entry| entry.is_valid())
            .unwrap_or_else(|| panic!("revoke_user_access: {vaddr:#x} is not mapped"));
        unsafe { entry.remove_flags(EntryFlags::User) };
    }

    /// Look up the physical page backing the user page at `vaddr`
    pub fn translate(&self, vaddr: VAddr) -> Option<PAddr> {
        virtmem::translate(self.page_table(), vaddr)
    }

    /// Copy `src` into user memory starting at `dst_vaddr`
    pub fn copy_out(&mut self, dst_vaddr: VAddr, src: &[u8]) -> Result<(), VmError> {
        uaccess::copy_out(self.page_table(), dst_vaddr, src)
    }

    /// Fill `dst` from user memory starting at `src_vaddr`
    pub fn copy_in(&self, dst: &mut [u8], src_vaddr: VAddr) -> Result<(), VmError> {
        uaccess::copy_in(self.page_table(), dst, src_vaddr)
    }

    /// Copy a null terminated string from user memory, see [`uaccess::copy_in_str`]
    pub fn copy_in_str(&self, dst: &mut [u8], src_vaddr: VAddr, max: usize) -> Result<usize, VmError> {
        uaccess::copy_in_str(self.page_table(), dst, src_vaddr, max)
    }

    /// Free all user pages and page tables of this address space
    ///
    /// # Panics
    /// Panics if mappings outside of `0..size` were left behind.
    pub fn destroy(mut self) {
        log::debug!("destroying address space {:#x} of size {:#x}", self.root, self.size);
        let end = page_round_up(self.size);
        if end > 0 {
            let root_table = unsafe { PageTable::from_paddr_mut(self.root) };
            unmap_range(root_table, self.alloc, 0, end / PAGESIZE as u64, true);
        }
        self.size = 0;
        free_page_tables(self.root, self.alloc);
    }
}
