//! The kernel address space

use crate::layout::KernelLayout;
use crate::virtmem::{lookup, map_range};
use crate::VmError;
use allocators::{AllocError, AllocInit, BuddyAllocator};
use riscv::cpu::SatpData;
use riscv::mem::{EntryFlags, PAddr, PageTable, VAddr, PAGESIZE};

/// The page table which is used by the kernel on all harts.
///
/// It direct-maps devices and RAM so that physical addresses can be dereferenced, maps the trampoline at the top of
/// the address space and holds one kernel stack per execution context.
pub struct KernelSpace<'a, 'mem> {
    alloc: &'a BuddyAllocator<'mem>,
    root: PAddr,
}

impl<'a, 'mem> KernelSpace<'a, 'mem> {
    /// Build the kernel page table for the given layout.
    ///
    /// Only the allocation of the root table is reported as an error.
    ///
    /// # Panics
    /// Panics if memory runs out while installing a mapping or allocating a kernel stack.
    pub fn make(alloc: &'a BuddyAllocator<'mem>, layout: &KernelLayout) -> Result<Self, VmError> {
        let root = alloc
            .allocate_page(AllocInit::Zeroed)
            .ok_or(AllocError::InsufficientMemory)?;
        let mut space = Self { alloc, root };
        let rw = EntryFlags::Read | EntryFlags::Write;
        let rx = EntryFlags::Read | EntryFlags::Execute;

        for window in layout.mmio_windows() {
            space.map_kernel_range(window.base, window.base, window.size, rw);
        }
        space.map_kernel_range(
            layout.kernel_base,
            layout.kernel_base,
            layout.text_end - layout.kernel_base,
            rx,
        );
        space.map_kernel_range(
            layout.text_end,
            layout.text_end,
            layout.phys_top - layout.text_end,
            rw,
        );
        space.map_kernel_range(
            layout.trampoline(),
            layout.trampoline_code,
            PAGESIZE as u64,
            rx,
        );

        for i in 0..layout.kernel_stacks {
            let stack = alloc
                .alloc_page()
                .unwrap_or_else(|| panic!("kvmmake: no memory for kernel stack {i}"));
            space.map_kernel_range(layout.kernel_stack(i), stack, PAGESIZE as u64, rw);
        }

        log::info!("kernel page table built at {root:#x}");
        Ok(space)
    }

    /// Map `size` bytes at `vaddr` to `paddr` during boot.
    ///
    /// No address translation caches are flushed; this is left to the caller if the table is already in use.
    ///
    /// # Panics
    /// Panics if the mapping cannot be installed.
    pub fn map_kernel_range(&mut self, vaddr: VAddr, paddr: PAddr, size: u64, flags: EntryFlags) {
        log::debug!("kernel mapping {vaddr:#x}..{:#x} -> {paddr:#x} {flags:?}", vaddr + size);
        let root = unsafe { PageTable::from_paddr_mut(self.root) };
        if let Err(e) = map_range(root, self.alloc, vaddr, size, paddr, flags) {
            panic!("kvmmap: could not map {vaddr:#x}: {e}");
        }
    }

    /// The physical address of the root page table
    pub fn root(&self) -> PAddr {
        self.root
    }

    pub fn page_table(&self) -> &PageTable {
        unsafe { PageTable::from_paddr(self.root) }
    }

    /// Look up the physical address that `vaddr` is mapped to, including its page offset
    pub fn translate(&self, vaddr: VAddr) -> Option<PAddr> {
        let entry = lookup(self.page_table(), vaddr)?;
        let page = entry.get_addr().ok()?;
        Some(page | (vaddr % PAGESIZE as u64))
    }

    /// The value of the `satp` register that selects this page table
    pub fn satp(&self) -> u64 {
        SatpData::sv39(self.root, 0).into()
    }

    /// Switch the executing hart to this page table.
    ///
    /// Must be done on every hart since address translation caches are per hart.
    ///
    /// # Safety
    /// The currently executing code and its stack must be mapped by the kernel page table.
    #[cfg(target_arch = "riscv64")]
    pub unsafe fn activate(&self) {
        log::debug!("enabling kernel page table {:#x}", self.root);
        riscv::cpu::Satp::write_raw(self.satp());
    }
}
