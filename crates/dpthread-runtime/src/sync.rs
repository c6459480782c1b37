//! Green-thread aware synchronization
//!
//! Waiters are green threads put to sleep with `park_and_unlock`; wakers
//! hand them back to their scheduler with `ops::ready`, which works from
//! any OS thread. Blocking from outside a runtime falls back to spinning
//! with `std::thread::yield_now` where that makes sense.

use crate::ops;
use crate::thread::ThreadRef;
use dpthread_core::{SchedError, SchedResult, SpinLock};
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

/// FIFO list of sleeping threads
///
/// Pairs with a condition the waker sets before notifying: the condition
/// is checked under the queue lock, so a notify cannot slip in between a
/// waiter's check and its sleep.
#[derive(Default)]
pub struct WaitQueue {
    waiters: SpinLock<VecDeque<ThreadRef>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until `done()` holds
    ///
    /// Must be called from a green thread unless `done()` is already true.
    pub fn wait_until(&self, mut done: impl FnMut() -> bool) -> SchedResult<()> {
        loop {
            let mut waiters = self.waiters.lock();
            if done() {
                return Ok(());
            }
            let myth = ops::current().ok_or(SchedError::NotInRuntime)?;
            waiters.push_back(myth);
            ops::park_and_unlock(waiters);
        }
    }

    /// Wake the oldest waiter; returns whether there was one
    pub fn notify_one(&self) -> bool {
        let th = self.waiters.lock().pop_front();
        match th {
            Some(th) => {
                ops::ready(th);
                true
            }
            None => false,
        }
    }

    /// Wake every waiter; returns how many
    pub fn notify_all(&self) -> usize {
        let woken = std::mem::take(&mut *self.waiters.lock());
        let n = woken.len();
        for th in woken {
            ops::ready(th);
        }
        n
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MutexState {
    held: bool,
    waiters: VecDeque<ThreadRef>,
}

/// Sleeping mutex
///
/// Ownership passes straight to the oldest waiter on unlock, so a waiter
/// cannot be overtaken once queued.
pub struct Mutex<T> {
    state: SpinLock<MutexState>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: SpinLock::new(MutexState {
                held: false,
                waiters: VecDeque::new(),
            }),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        let mut st = self.state.lock();
        if !st.held {
            st.held = true;
            return MutexGuard { mutex: self };
        }

        match ops::current() {
            Some(myth) => {
                st.waiters.push_back(myth);
                ops::park_and_unlock(st);
                // Woken by `unlock`, which left `held` set for us
                MutexGuard { mutex: self }
            }
            None => {
                drop(st);
                loop {
                    std::thread::yield_now();
                    if let Some(guard) = self.try_lock() {
                        return guard;
                    }
                }
            }
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut st = self.state.lock();
        if st.held {
            return None;
        }
        st.held = true;
        Some(MutexGuard { mutex: self })
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().held
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn unlock(&self) {
        let mut st = self.state.lock();
        match st.waiters.pop_front() {
            Some(th) => {
                drop(st);
                ops::ready(th);
            }
            None => st.held = false,
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// Wait for a number of tasks to finish
#[derive(Default)]
pub struct WaitGroup {
    count: AtomicUsize,
    waiters: WaitQueue,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    pub fn done(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        dpthread_core::kassert!(prev > 0, "WaitGroup::done without matching add");
        if prev == 1 {
            self.waiters.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Block until the count drops to zero
    pub fn wait(&self) {
        if ops::current().is_none() {
            while self.count() != 0 {
                std::thread::yield_now();
            }
            return;
        }
        // Inside a green thread `wait_until` cannot fail
        let _ = self.waiters.wait_until(|| self.count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_until_satisfied_outside_runtime() {
        let wq = WaitQueue::new();
        assert!(wq.wait_until(|| true).is_ok());
        assert_eq!(wq.wait_until(|| false), Err(SchedError::NotInRuntime));
        assert!(wq.is_empty());
        assert!(!wq.notify_one());
        assert_eq!(wq.notify_all(), 0);
    }

    #[test]
    fn test_mutex_across_os_threads() {
        let m = Arc::new(Mutex::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *m.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(), 4000);
        assert!(!m.is_locked());
    }

    #[test]
    fn test_try_lock() {
        let m = Mutex::new(5);
        let g = m.try_lock().unwrap();
        assert!(m.try_lock().is_none());
        drop(g);
        assert_eq!(*m.try_lock().unwrap(), 5);
        assert_eq!(m.into_inner(), 5);
    }

    #[test]
    fn test_wait_group_outside_runtime() {
        let wg = Arc::new(WaitGroup::new());
        wg.add(3);
        for _ in 0..3 {
            let wg = Arc::clone(&wg);
            thread::spawn(move || wg.done());
        }
        wg.wait();
        assert_eq!(wg.count(), 0);
    }
}
