//! Allocators for physical memory.
//!
//! The main type of this crate is the [`BuddyAllocator`] which hands out naturally aligned blocks of physical pages
//! and keeps a reference count for every page it manages.
#![no_std]

#[cfg(test)]
extern crate std;

pub mod buddy_allocator;
mod traits;

pub use buddy_allocator::{BuddyAllocator, PageInfo, PageState, PhysAddr};
pub use traits::{AllocError, AllocInit};
