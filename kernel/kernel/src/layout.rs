//! Physical and virtual memory layout of the board the kernel runs on

use riscv::mem::{PAddr, VAddr, MAXVA, PAGESIZE};

/// A window of memory mapped device registers
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MmioWindow {
    pub base: PAddr,
    pub size: u64,
}

/// Where the kernel finds its devices, its own image and the end of RAM.
///
/// The kernel address space is constructed from this description.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelLayout {
    pub uart0: MmioWindow,
    pub virtio0: MmioWindow,
    pub plic: MmioWindow,
    /// Where the kernel image is loaded and RAM starts
    pub kernel_base: PAddr,
    /// The end of the kernel's code, page aligned
    pub text_end: PAddr,
    /// One beyond the last byte of RAM
    pub phys_top: PAddr,
    /// Physical location of the user/kernel transition code
    pub trampoline_code: PAddr,
    /// How many execution contexts get a kernel stack
    pub kernel_stacks: usize,
}

/// Base address of RAM on the qemu `virt` machine
pub const QEMU_KERNBASE: PAddr = 0x8000_0000;

/// The amount of RAM the kernel uses on the qemu `virt` machine
pub const QEMU_RAM_SIZE: u64 = 128 * 1024 * 1024;

/// How many execution contexts exist at most
pub const NPROC: usize = 64;

impl KernelLayout {
    /// The layout of the qemu `virt` machine with the kernel image ending its code at `text_end` and the trampoline
    /// code located at `trampoline_code`
    pub const fn qemu_virt(text_end: PAddr, trampoline_code: PAddr) -> Self {
        Self {
            uart0: MmioWindow {
                base: 0x1000_0000,
                size: PAGESIZE as u64,
            },
            virtio0: MmioWindow {
                base: 0x1000_1000,
                size: PAGESIZE as u64,
            },
            plic: MmioWindow {
                base: 0x0c00_0000,
                size: 0x400_0000,
            },
            kernel_base: QEMU_KERNBASE,
            text_end,
            phys_top: QEMU_KERNBASE + QEMU_RAM_SIZE,
            trampoline_code,
            kernel_stacks: NPROC,
        }
    }

    /// The device windows that are direct-mapped into the kernel address space
    pub fn mmio_windows(&self) -> [MmioWindow; 3] {
        [self.uart0, self.virtio0, self.plic]
    }

    /// The virtual address of the trampoline page which is the highest page of every address space
    pub const fn trampoline(&self) -> VAddr {
        MAXVA - PAGESIZE as u64
    }

    /// The virtual address of the kernel stack of execution context `i`.
    ///
    /// Stacks are located below the trampoline and separated by one unmapped guard page each.
    pub const fn kernel_stack(&self, i: usize) -> VAddr {
        self.trampoline() - ((i as u64 + 1) * 2 * PAGESIZE as u64)
    }
}
