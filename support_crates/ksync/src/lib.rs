//! Kernel Synchronisation Primitives
#![no_std]

mod spin_lock;
mod sync_once_cell;

pub use spin_lock::{Guard, SpinLock};
pub use sync_once_cell::SyncOnceCell;
