//! Context switch plumbing
//!
//! Three kinds of switch exist:
//!
//! - runtime stack -> thread, after a full scheduling pass;
//! - thread -> runtime stack, when the fast path gives up or a thread
//!   exits or cedes the core; the thread leaves a `RuntimeAction` telling
//!   the kthread loop what to do with it;
//! - thread -> thread, the direct handoff that never touches the runtime
//!   stack.

use crate::arch::{self, SavedRegs};
use crate::kthread::Kthread;
use crate::scheduler::Scheduler;
use crate::thread::ThreadRef;
use dpthread_core::CoreId;
use std::cell::{Cell, UnsafeCell};
use std::sync::Arc;

/// What a thread asks of the runtime stack when it switches to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuntimeAction {
    /// Run the scheduler loop; the thread is already queued or sleeping
    Schedule,
    /// The thread finished and can be freed
    Exit(ThreadRef),
    /// The thread gave the core back to the orchestrator
    Cede(ThreadRef),
}

/// Per-kthread state reachable through TLS
pub(crate) struct CoreContext {
    sched: Arc<Scheduler>,
    core: CoreId,
    /// Saved registers of the kthread's own (runtime) stack
    sched_regs: UnsafeCell<SavedRegs>,
    action: Cell<RuntimeAction>,
}

impl CoreContext {
    pub(crate) fn new(sched: Arc<Scheduler>, core: CoreId) -> Self {
        Self {
            sched,
            core,
            sched_regs: UnsafeCell::new(SavedRegs::default()),
            action: Cell::new(RuntimeAction::Schedule),
        }
    }

    #[inline]
    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    #[inline]
    pub(crate) fn core_id(&self) -> CoreId {
        self.core
    }

    #[inline]
    pub(crate) fn kthread(&self) -> &Kthread {
        self.sched.core(self.core)
    }

    /// Action left by the last thread to switch here, reset to `Schedule`
    #[inline]
    pub(crate) fn take_action(&self) -> RuntimeAction {
        self.action.replace(RuntimeAction::Schedule)
    }

    /// Runtime stack -> `th`; returns when a thread switches back
    ///
    /// # Safety
    /// Must be called on the kthread's own stack, with `th` prepared to run
    /// on this core.
    #[inline]
    pub(crate) unsafe fn run(&self, th: ThreadRef) {
        unsafe { arch::context_switch(self.sched_regs.get(), th.regs_ptr()) }
    }

    /// `myth` -> runtime stack, saving `myth` so it can be resumed
    ///
    /// # Safety
    /// Must be called from `myth`, running on this core.
    #[inline]
    pub(crate) unsafe fn switch_to_runtime(&self, myth: ThreadRef, action: RuntimeAction) {
        self.action.set(action);
        unsafe { arch::context_switch(myth.regs_ptr(), self.sched_regs.get()) }
    }

    /// Current thread -> runtime stack, abandoning the current context
    ///
    /// # Safety
    /// Must be called from a green thread running on this core.
    #[inline]
    pub(crate) unsafe fn jump_to_runtime(&self, action: RuntimeAction) -> ! {
        self.action.set(action);
        unsafe { arch::context_jump(self.sched_regs.get()) }
    }
}

/// `myth` -> `th` without passing through the runtime stack
///
/// `myth`'s `stack_busy` flag is cleared once the switch is off its stack.
///
/// # Safety
/// Must be called from `myth`; `th` must have been prepared to run on the
/// current core.
#[inline]
pub(crate) unsafe fn switch_direct(myth: ThreadRef, th: ThreadRef) {
    unsafe { arch::context_switch_release(myth.regs_ptr(), th.regs_ptr(), myth.stack_busy_ptr()) }
}
