use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A SpinLock Mutex implementation
///
/// The lock never sleeps and never yields which makes it usable from every execution context of the kernel as long as
/// the protected section is short and does not call into another locking subsystem.
#[derive(Debug)]
pub struct SpinLock<T> {
    is_locked: AtomicBool,
    value: UnsafeCell<T>,
}

/// A Guard protecting some data locked through a [`SpinLock`].
///
/// Use it via the implemented [`Deref`] and [`DerefMut`] traits.
/// The lock is released when the guard is dropped, including during unwinding.
pub struct Guard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            is_locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Try to lock the lock and return a [`Guard`] if successful
    pub fn try_lock(&self) -> Option<Guard<T>> {
        if self.is_locked.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(Guard { lock: self })
        }
    }

    /// Repeatedly try to lock the lock until it succeeds, returning the protected data via a [`Guard`]
    pub fn lock(&self) -> Guard<T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            // wait for the lock to look free before attempting another (cache-line stealing) swap
            while self.is_locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    /// Run `f` with exclusive access to the protected data and release the lock afterwards
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Whether the lock is currently held by someone.
    ///
    /// The answer may already be outdated when it is returned and is only meant for diagnostics.
    pub fn is_locked(&self) -> bool {
        self.is_locked.load(Ordering::Relaxed)
    }

    /// Access the protected data without locking.
    ///
    /// This is safe because the mutable borrow statically guarantees that no [`Guard`] exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    fn unlock(&self) {
        self.is_locked.store(false, Ordering::Release)
    }
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}
unsafe impl<T> Send for SpinLock<T> where T: Send {}

impl<T> Deref for Guard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: The very existence of this Guard guarantees we've exclusively locked the lock
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for Guard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: The very existence of this Guard guarantees we've exclusively locked the lock
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for Guard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
