use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// A cell that is written exactly once and can then be shared between all harts.
///
/// This is used for kernel-wide singletons like the page allocator and the kernel page table which are created by
/// the boot hart and only read afterwards.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> SyncOnceCell<T> {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Return the contained value if it has already been initialized
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // Safety: READY is only published after the value has been written
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Initialize the cell with `value`.
    ///
    /// If the cell was already initialized (or is being initialized by another hart), `value` is handed back as the
    /// error.
    pub fn set(&self, value: T) -> Result<&T, T> {
        if self
            .state
            .compare_exchange(UNINIT, INITIALIZING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }

        // Safety: we won the race above so nobody else reads or writes the value
        let value = unsafe { (*self.value.get()).write(value) };
        self.state.store(READY, Ordering::Release);
        Ok(value)
    }

    /// Return the contained value, initializing it with `init` first if that has not happened yet.
    ///
    /// Harts that lose the initialization race spin until the winner has published its value.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(value) = self.get() {
            return value;
        }

        if self
            .state
            .compare_exchange(UNINIT, INITIALIZING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            // Safety: we won the race above so nobody else reads or writes the value
            let value = unsafe { (*self.value.get()).write(init()) };
            self.state.store(READY, Ordering::Release);
            return value;
        }

        while self.state.load(Ordering::Acquire) != READY {
            spin_loop();
        }
        // Safety: READY is only published after the value has been written
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // Safety: READY means the value was written and it is dropped exactly once here
            unsafe { self.value.get_mut().assume_init_drop() }
        }
    }
}

unsafe impl<T: Send + Sync> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
