//! Boot time initialization of memory management
//!
//! The boot code calls [`init_log`] and [`kinit`] once, [`kvminit`] once afterwards and finally [`kvminithart`] on
//! every hart.

use crate::layout::KernelLayout;
use crate::kvm::KernelSpace;
use allocators::{BuddyAllocator, PageInfo};
use core::mem;
use klog::KernelLogger;
use ksync::SyncOnceCell;
use log::Level;
use riscv::mem::{page_round_up, PAddr};

/// The log level used during boot
const LOG_LEVEL: Level = Level::Debug;

static LOGGER: KernelLogger = KernelLogger::new(LOG_LEVEL);

static KERNEL_ALLOCATOR: SyncOnceCell<BuddyAllocator<'static>> = SyncOnceCell::new();

static KERNEL_SPACE: SyncOnceCell<KernelSpace<'static, 'static>> = SyncOnceCell::new();

/// Install the kernel logger.
///
/// Calling this more than once has no effect.
pub fn init_log() {
    if LOGGER.install().is_err() {
        log::warn!("kernel logger was already installed");
    }
}

/// Set up the physical page allocator to manage all memory between the end of the kernel image and `phys_top`.
///
/// The table of per-page metadata is placed at the beginning of that memory.
///
/// # Safety
/// The memory between `kernel_end` and `phys_top` must be unused and accessible through its physical addresses for
/// the rest of the kernels lifetime.
///
/// # Panics
/// Panics if called more than once.
pub unsafe fn kinit(kernel_end: PAddr, phys_top: PAddr) -> &'static BuddyAllocator<'static> {
    let meta_start = page_round_up(kernel_end);
    let page_count = BuddyAllocator::required_page_infos(meta_start, phys_top);
    let meta_size = (page_count * mem::size_of::<PageInfo>()) as u64;
    let managed_start = page_round_up(meta_start + meta_size);
    assert!(
        managed_start < phys_top,
        "kinit: no memory left after the page metadata at {meta_start:#x}"
    );

    let meta = meta_start as usize as *mut PageInfo;
    for i in 0..page_count {
        meta.add(i).write(PageInfo::default());
    }
    let page_infos = core::slice::from_raw_parts_mut(meta, page_count);

    let allocator = BuddyAllocator::new(managed_start, phys_top, page_infos);
    log::info!(
        "physical memory {managed_start:#x}..{phys_top:#x} with {} free pages",
        allocator.free_pages()
    );
    match KERNEL_ALLOCATOR.set(allocator) {
        Ok(allocator) => allocator,
        Err(_) => panic!("kinit: the kernel allocator is already initialized"),
    }
}

/// The kernel allocator if [`kinit`] has been called
pub fn kernel_allocator() -> Option<&'static BuddyAllocator<'static>> {
    KERNEL_ALLOCATOR.get()
}

/// Build the kernel page table
///
/// # Panics
/// Panics if [`kinit`] has not been called yet, if memory runs out or if called more than once.
pub fn kvminit(layout: &KernelLayout) -> &'static KernelSpace<'static, 'static> {
    let Some(alloc) = kernel_allocator() else {
        panic!("kvminit: the kernel allocator is not initialized");
    };
    let space = match KernelSpace::make(alloc, layout) {
        Ok(space) => space,
        Err(e) => panic!("kvminit: {e}"),
    };
    match KERNEL_SPACE.set(space) {
        Ok(space) => space,
        Err(_) => panic!("kvminit: the kernel page table is already built"),
    }
}

/// The kernel address space if [`kvminit`] has been called
pub fn kernel_space() -> Option<&'static KernelSpace<'static, 'static>> {
    KERNEL_SPACE.get()
}

/// Switch the executing hart to the kernel page table
///
/// # Safety
/// See [`KernelSpace::activate`].
#[cfg(target_arch = "riscv64")]
pub unsafe fn kvminithart() {
    let Some(space) = kernel_space() else {
        panic!("kvminithart: the kernel page table is not built");
    };
    space.activate();
}
