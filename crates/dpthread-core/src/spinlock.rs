//! Spinlock guarding per-core run queues
//!
//! Each kthread's queues sit behind one of these. The owning core takes it
//! with `lock()`; foreign cores only ever use `try_lock()` so that a busy
//! core never makes a thief (or a scope reconciler) wait.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A test-and-test-and-set spinlock
///
/// Critical sections are a handful of queue index updates, so spinning
/// beats sleeping. Green threads that need to block on contention should
/// use `dpthread_runtime::sync::Mutex` instead.
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: SpinLock provides exclusive access to T
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, spinning until it's available
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinLockGuard { lock: self };
            }

            // Wait on a plain load so the line stays shared while held
            let mut spins = 1u32;
            while self.locked.load(Ordering::Relaxed) {
                for _ in 0..spins {
                    core::hint::spin_loop();
                }
                spins = (spins << 1).min(64);
            }
        }
    }

    /// Acquire the lock only if it is free right now
    ///
    /// Never spins. This is the only way a core touches another core's
    /// queues.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.locked.load(Ordering::Relaxed) {
            return None;
        }
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Check if the lock is currently held (racy, for diagnostics)
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Mutable access through an exclusive borrow; no locking needed
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

/// Guard that releases the spinlock when dropped
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// The lock this guard holds
    #[inline]
    pub fn spinlock(this: &Self) -> &'a SpinLock<T> {
        this.lock
    }
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: We hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_spinlock_basic() {
        let lock = SpinLock::new(0u32);
        *lock.lock() = 42;
        assert_eq!(*lock.lock(), 42);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_try_lock_fails_while_held() {
        let lock = SpinLock::new(0u32);

        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(lock.try_lock().is_none());

        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_try_lock_never_blocks_across_threads() {
        let lock = Arc::new(SpinLock::new(Vec::<u32>::new()));
        let barrier = Arc::new(Barrier::new(2));
        let failures = Arc::new(AtomicUsize::new(0));

        let guard = lock.lock();
        let t = {
            let lock = Arc::clone(&lock);
            let barrier = Arc::clone(&barrier);
            let failures = Arc::clone(&failures);
            thread::spawn(move || {
                for _ in 0..100 {
                    if lock.try_lock().is_none() {
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
                barrier.wait();
            })
        };
        barrier.wait();
        drop(guard);
        t.join().unwrap();

        assert_eq!(failures.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_spinlock_concurrent() {
        let lock = Arc::new(SpinLock::new(0u32));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }

    #[test]
    fn test_guard_knows_its_lock() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(core::ptr::eq(SpinLockGuard::spinlock(&guard), &lock));
    }
}
