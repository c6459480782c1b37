//! Green thread control block
//!
//! A `Thread` is heap allocated once at spawn and addressed through the
//! copyable `ThreadRef` handle from then on. Queues, wait lists and the
//! kthreads all hold `ThreadRef`s; ownership is by protocol:
//!
//! - a thread is on at most one run queue, or executing, or held by a
//!   single waker while being moved between cores;
//! - the run-queue `next` link is only touched under the lock of the core
//!   whose overflow list holds the thread;
//! - the saved registers are only touched by the core switching into or
//!   out of the thread, and `stack_busy` orders that hand-over.

use crate::arch::{self, SavedRegs};
use crate::memory::Stack;
use crate::scheduler::Scheduler;
use dpthread_core::{kassert, kbug, kerror, StatusTag, ThreadId, ThreadState};
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::ops::Deref;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

const NO_CPU: u32 = u32::MAX;

pub(crate) type Entry = Box<dyn FnOnce() + Send + 'static>;

/// Control block of one green thread
pub struct Thread {
    regs: UnsafeCell<SavedRegs>,
    /// Intrusive link for the overflow list
    next: Cell<Option<ThreadRef>>,
    stack: UnsafeCell<Option<Stack>>,
    entry: UnsafeCell<Option<Entry>>,
    state: AtomicU8,
    /// Set while a switch off this thread's stack is still in flight
    stack_busy: AtomicBool,
    /// Physical CPU of the core this thread last ran on
    last_cpu: AtomicU32,
    status: AtomicU32,
    main_thread: bool,
    /// Scheduler that spawned the thread; it frees every thread before
    /// it is dropped itself
    sched: *const Scheduler,
    /// Holds a `StackPool` slot that must be released on free
    pooled: bool,
    id: ThreadId,
}

// Safety: the non-Sync fields are guarded by the protocol in the module docs
unsafe impl Sync for Thread {}
unsafe impl Send for Thread {}

impl Thread {
    fn alloc(
        entry: Option<Entry>,
        stack: Option<Stack>,
        main_thread: bool,
        sched: *const Scheduler,
        pooled: bool,
    ) -> ThreadRef {
        let th = Box::new(Thread {
            regs: UnsafeCell::new(SavedRegs::default()),
            next: Cell::new(None),
            stack: UnsafeCell::new(stack),
            entry: UnsafeCell::new(entry),
            state: AtomicU8::new(ThreadState::Sleeping as u8),
            stack_busy: AtomicBool::new(false),
            last_cpu: AtomicU32::new(NO_CPU),
            status: AtomicU32::new(StatusTag::NONE.as_u32()),
            main_thread,
            sched,
            pooled,
            id: ThreadId::next(),
        });
        ThreadRef(NonNull::from(Box::leak(th)))
    }

    /// Build a runnable-on-first-switch thread on `stack`
    pub(crate) fn create(
        entry: Entry,
        stack: Stack,
        main_thread: bool,
        sched: &Scheduler,
    ) -> ThreadRef {
        let top = stack.top();
        let th = Self::alloc(Some(entry), Some(stack), main_thread, sched, true);
        // Safety: freshly allocated, nobody else can see it yet
        unsafe {
            arch::init_context(&mut *th.regs.get(), top, thread_main as usize, th.as_ptr() as usize);
        }
        th
    }

    /// A control block with no stack
    ///
    /// It can be queued, stolen and scheduled, but must never be switched
    /// to. Used to drive the queues without executing anything.
    #[doc(hidden)]
    pub fn detached(status: StatusTag) -> ThreadRef {
        let th = Self::alloc(None, None, false, std::ptr::null(), false);
        th.set_status(status);
        th
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> ThreadState {
        ThreadState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// `from` -> `to`, or a fatal invariant violation
    #[inline]
    pub(crate) fn transition(&self, from: ThreadState, to: ThreadState) {
        if self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            kbug!("{}: expected {:?} -> {:?}, found {:?}", self.id, from, to, self.state());
        }
    }

    #[inline]
    pub fn status(&self) -> StatusTag {
        StatusTag::new(self.status.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_status(&self, tag: StatusTag) {
        self.status.store(tag.as_u32(), Ordering::Relaxed);
    }

    #[inline]
    pub fn last_cpu(&self) -> Option<usize> {
        match self.last_cpu.load(Ordering::Relaxed) {
            NO_CPU => None,
            cpu => Some(cpu as usize),
        }
    }

    #[inline]
    pub(crate) fn set_last_cpu(&self, cpu: usize) {
        self.last_cpu.store(cpu as u32, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_main(&self) -> bool {
        self.main_thread
    }

    /// Owning scheduler; `None` for detached control blocks
    #[inline]
    pub(crate) fn scheduler(&self) -> Option<&Scheduler> {
        // Safety: the scheduler outlives all threads it created
        unsafe { self.sched.as_ref() }
    }

    #[inline]
    pub(crate) fn is_pooled(&self) -> bool {
        self.pooled
    }

    #[inline]
    pub(crate) fn mark_stack_busy(&self) {
        self.stack_busy.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn clear_stack_busy(&self) {
        self.stack_busy.store(false, Ordering::Release);
    }

    #[inline]
    pub fn stack_busy(&self) -> bool {
        self.stack_busy.load(Ordering::Acquire)
    }

    /// Spin until the core leaving this thread is off its stack
    #[inline]
    pub(crate) fn wait_stack_idle(&self) {
        while self.stack_busy.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    #[inline]
    pub(crate) fn stack_busy_ptr(&self) -> *const u8 {
        self.stack_busy.as_ptr() as *const u8
    }

    #[inline]
    pub(crate) fn regs_ptr(&self) -> *mut SavedRegs {
        self.regs.get()
    }

    #[inline]
    pub(crate) fn link(&self) -> Option<ThreadRef> {
        self.next.get()
    }

    #[inline]
    pub(crate) fn set_link(&self, next: Option<ThreadRef>) {
        self.next.set(next);
    }

    /// Detach the stack for recycling; only valid once the thread is dead
    pub(crate) fn take_stack(&self) -> Option<Stack> {
        // Safety: the thread no longer runs, so nothing else reaches its stack
        unsafe { (*self.stack.get()).take() }
    }

    fn take_entry(&self) -> Option<Entry> {
        // Safety: only the thread itself, on its first run, takes the entry
        unsafe { (*self.entry.get()).take() }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("status", &self.status())
            .field("main", &self.main_thread)
            .finish()
    }
}

/// Shared handle to a `Thread`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadRef(NonNull<Thread>);

// Safety: see `Thread`
unsafe impl Send for ThreadRef {}
unsafe impl Sync for ThreadRef {}

impl ThreadRef {
    #[inline]
    pub fn as_ptr(self) -> *mut Thread {
        self.0.as_ptr()
    }

    #[inline]
    pub(crate) unsafe fn from_ptr(ptr: *mut Thread) -> Option<ThreadRef> {
        NonNull::new(ptr).map(ThreadRef)
    }

    /// Release the control block
    ///
    /// # Safety
    ///
    /// No other reference to this thread may be used afterwards, and the
    /// stack must already have been taken (or never existed).
    pub(crate) unsafe fn free(self) {
        drop(Box::from_raw(self.0.as_ptr()));
    }
}

impl Deref for ThreadRef {
    type Target = Thread;

    #[inline]
    fn deref(&self) -> &Thread {
        // Safety: control blocks outlive every handle by protocol
        unsafe { self.0.as_ref() }
    }
}

impl fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadRef({})", self.id)
    }
}

/// Body of every green thread, called from the arch trampoline
extern "C" fn thread_main(arg: usize) {
    let Some(th) = (unsafe { ThreadRef::from_ptr(arg as *mut Thread) }) else {
        kbug!("thread entry without a control block");
    };
    kassert!(th.state() == ThreadState::Running);

    if let Some(entry) = th.take_entry() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(entry)) {
            let msg = panic
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("<non-string panic>");
            kerror!("{} panicked: {}", th.id(), msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_starts_sleeping() {
        let th = Thread::detached(StatusTag::new(4));
        assert_eq!(th.state(), ThreadState::Sleeping);
        assert_eq!(th.status(), StatusTag::new(4));
        assert!(th.last_cpu().is_none());
        assert!(!th.stack_busy());
        assert!(!th.is_main());
        unsafe { th.free() };
    }

    #[test]
    fn test_transition() {
        let th = Thread::detached(StatusTag::NONE);
        th.transition(ThreadState::Sleeping, ThreadState::Runnable);
        assert!(th.state().is_runnable());
        th.transition(ThreadState::Runnable, ThreadState::Running);
        assert_eq!(th.state(), ThreadState::Running);
        unsafe { th.free() };
    }

    #[test]
    fn test_refs_compare_by_identity() {
        let a = Thread::detached(StatusTag::NONE);
        let b = Thread::detached(StatusTag::NONE);
        let a2 = a;
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        unsafe {
            a.free();
            b.free();
        }
    }
}
