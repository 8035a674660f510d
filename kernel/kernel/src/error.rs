use allocators::AllocError;
use riscv::mem::VAddr;
use thiserror_no_std::Error;

/// The error returned by recoverable virtual memory operations
#[derive(Debug, Error, Eq, PartialEq, Copy, Clone)]
pub enum VmError {
    #[error("not enough physical memory is available: {0}")]
    OutOfMemory(#[from] AllocError),
    #[error("the virtual address {0:#x} lies outside of the usable address space")]
    AddressOutOfRange(VAddr),
    #[error("the virtual address {0:#x} is not mapped in a user accessible way")]
    NotMapped(VAddr),
    #[error("the page at virtual address {0:#x} does not permit the requested access")]
    PermissionDenied(VAddr),
    #[error("no string terminator was found within {max} bytes")]
    MissingTerminator { max: usize },
}
