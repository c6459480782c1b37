//! Thread stacks and thread-slot accounting
//!
//! Every green thread owns one `Stack`: a private anonymous mapping with
//! a PROT_NONE guard region below it. `StackPool` bounds the number of
//! live threads and keeps a small cache of released stacks so the spawn
//! path does not mmap/munmap in steady state.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
    } else {
        compile_error!("Unsupported platform");
    }
}

use crossbeam_queue::ArrayQueue;
use dpthread_core::error::{MemoryError, SchedResult};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A mapped thread stack (grows down from `top()`)
pub struct Stack {
    /// Start of the mapping; the guard region lives here
    base: NonNull<u8>,
    /// Whole mapping, guard included
    len: usize,
    guard: usize,
}

// Safety: the mapping is exclusively owned and may be released from any thread
unsafe impl Send for Stack {}

impl Stack {
    /// Highest address of the usable region
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.len) }
    }

    /// Lowest usable address (just above the guard)
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.guard) }
    }

    #[inline]
    pub fn usable_size(&self) -> usize {
        self.len - self.guard
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unix::unmap_stack(self);
    }
}

/// Live-thread limit plus a cache of reusable stacks
pub struct StackPool {
    stack_size: usize,
    guard_size: usize,
    max_threads: usize,
    live: AtomicUsize,
    cache: Option<ArrayQueue<Stack>>,
}

impl StackPool {
    pub fn new(stack_size: usize, guard_size: usize, max_threads: usize, cache: usize) -> Self {
        let page = unix::page_size();
        Self {
            stack_size: round_up(stack_size, page),
            guard_size: round_up(guard_size, page),
            max_threads,
            live: AtomicUsize::new(0),
            cache: (cache > 0).then(|| ArrayQueue::new(cache)),
        }
    }

    /// Claim one thread slot
    pub fn reserve(&self) -> SchedResult<()> {
        let mut cur = self.live.load(Ordering::Relaxed);
        loop {
            if cur >= self.max_threads {
                return Err(MemoryError::TooManyThreads.into());
            }
            match self.live.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Return a slot claimed with `reserve`
    pub fn release(&self) {
        let prev = self.live.fetch_sub(1, Ordering::AcqRel);
        dpthread_core::kassert!(prev > 0, "stack pool slot released twice");
    }

    /// Get a stack, from the cache if possible
    pub fn alloc(&self) -> SchedResult<Stack> {
        if let Some(stack) = self.cache.as_ref().and_then(|c| c.pop()) {
            return Ok(stack);
        }
        unix::map_stack(self.stack_size, self.guard_size)
    }

    /// Give a stack back; unmapped if the cache is full
    pub fn free(&self, stack: Stack) {
        if let Some(cache) = &self.cache {
            // A full cache hands the stack back and it is dropped here
            let _ = cache.push(stack);
        }
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cached(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

#[inline]
fn round_up(n: usize, align: usize) -> usize {
    n.checked_add(align - 1).map_or(usize::MAX & !(align - 1), |v| v & !(align - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpthread_core::error::SchedError;

    #[test]
    fn test_stack_is_writable() {
        let pool = StackPool::new(64 * 1024, 4096, 4, 0);
        let stack = pool.alloc().unwrap();
        assert!(stack.usable_size() >= 64 * 1024);
        unsafe {
            // First and last usable bytes
            *stack.bottom() = 1;
            *stack.top().sub(1) = 2;
        }
    }

    #[test]
    fn test_reserve_limit() {
        let pool = StackPool::new(64 * 1024, 4096, 2, 0);
        pool.reserve().unwrap();
        pool.reserve().unwrap();
        assert_eq!(
            pool.reserve(),
            Err(SchedError::OutOfMemory(MemoryError::TooManyThreads))
        );
        pool.release();
        assert!(pool.reserve().is_ok());
        assert_eq!(pool.live(), 2);
    }

    #[test]
    fn test_cache_reuses_mapping() {
        let pool = StackPool::new(64 * 1024, 4096, 4, 2);
        let stack = pool.alloc().unwrap();
        let top = stack.top();
        pool.free(stack);
        assert_eq!(pool.cached(), 1);

        let again = pool.alloc().unwrap();
        assert_eq!(again.top(), top);
        assert_eq!(pool.cached(), 0);
    }

    #[test]
    fn test_absurd_stack_size_fails() {
        let pool = StackPool::new(usize::MAX / 2, 4096, 4, 0);
        assert!(pool.alloc().is_err());
    }
}
