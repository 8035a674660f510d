//! Virtual memory management of the kernel.
//!
//! Physical pages are handed out by a [`BuddyAllocator`](allocators::BuddyAllocator) and mapped through three-level
//! Sv39 page tables.
//! This crate builds the kernel address space ([`KernelSpace`]), manages the address spaces of user processes
//! ([`AddressSpace`]) and moves data between kernel and user memory ([`uaccess`]).
//!
//! All physical memory is direct-mapped in the kernel address space which is why physical addresses are dereferenced
//! without further translation throughout this crate.
#![no_std]

pub mod error;
pub mod init;
pub mod kvm;
pub mod layout;
pub mod uaccess;
pub mod virtmem;
pub mod vspace;

pub use error::VmError;
pub use kvm::KernelSpace;
pub use layout::KernelLayout;
pub use vspace::AddressSpace;
