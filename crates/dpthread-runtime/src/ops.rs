//! Green thread operations
//!
//! Everything here is called from a green thread. A thread may resume on
//! a different kthread after any switch, so none of these functions keep
//! the core context (or anything borrowed from it) across one.

use crate::scheduler::Handoff;
use crate::switch::{self, CoreContext, RuntimeAction};
use crate::thread::ThreadRef;
use crate::tls;
use dpthread_core::{kbug, CoreId, SchedError, SchedResult, SpinLockGuard, StatusTag, ThreadId, ThreadState};

/// Core context plus the thread it is running
#[inline]
fn running_thread<'a>() -> Option<(&'a CoreContext, ThreadRef)> {
    let ctx = tls::core_context()?;
    let th = ctx.kthread().current()?;
    Some((ctx, th))
}

/// The green thread calling this, if any
pub fn current() -> Option<ThreadRef> {
    running_thread().map(|(_, th)| th)
}

/// Core the caller is running on, if it is inside a runtime
pub fn current_core() -> Option<CoreId> {
    tls::core_context().map(|ctx| ctx.core_id())
}

/// `myth` is queued or asleep with its stack marked busy: run something else
fn reschedule(ctx: &CoreContext, myth: ThreadRef) {
    match ctx.scheduler().enter_schedule(ctx.kthread(), myth) {
        Handoff::Same => {}
        // Safety: `th` was prepared for this core, `myth` is the caller
        Handoff::Direct(th) => unsafe { switch::switch_direct(myth, th) },
        Handoff::Slow => unsafe { ctx.switch_to_runtime(myth, RuntimeAction::Schedule) },
    }
}

/// Let other runnable threads run
///
/// Outside the runtime this yields the OS thread.
pub fn yield_now() {
    let Some((ctx, myth)) = running_thread() else {
        std::thread::yield_now();
        return;
    };
    let sched = ctx.scheduler();
    let me = ctx.kthread();

    sched.poll_local_softirq(me);
    sched.help_parked_core(me);

    myth.transition(ThreadState::Running, ThreadState::Runnable);
    myth.mark_stack_busy();
    sched.enqueue(me, myth);
    reschedule(ctx, myth);
}

/// Put the caller to sleep and release `guard`
///
/// The caller is already SLEEPING when the guard is released, so whoever
/// takes the lock next may `ready` it at once.
pub fn park_and_unlock<T>(guard: SpinLockGuard<'_, T>) {
    let Some((ctx, myth)) = running_thread() else {
        kbug!("park_and_unlock outside a green thread");
    };
    myth.transition(ThreadState::Running, ThreadState::Sleeping);
    myth.mark_stack_busy();
    drop(guard);
    reschedule(ctx, myth);
}

/// Requeue the caller and switch directly to sleeping thread `th`
pub fn park_and_switch(th: ThreadRef) {
    let Some((ctx, myth)) = running_thread() else {
        kbug!("park_and_switch outside a green thread");
    };
    let sched = ctx.scheduler();
    let me = ctx.kthread();

    myth.transition(ThreadState::Running, ThreadState::Runnable);
    myth.mark_stack_busy();
    sched.enqueue(me, myth);
    sched.hand_off(me, th);
    // Safety: `th` was prepared for this core by `hand_off`
    unsafe { switch::switch_direct(myth, th) }
}

/// Requeue the caller and give the core back to the orchestrator
pub fn cede() {
    let Some((ctx, myth)) = running_thread() else {
        std::thread::yield_now();
        return;
    };
    unsafe { ctx.switch_to_runtime(myth, RuntimeAction::Cede(myth)) }
}

/// Terminate the calling thread
///
/// Nothing on the thread's stack is dropped.
pub fn exit() -> ! {
    let Some((ctx, myth)) = running_thread() else {
        kbug!("exit outside a green thread");
    };
    // Safety: the stack is abandoned, the runtime frees it
    unsafe { ctx.jump_to_runtime(RuntimeAction::Exit(myth)) }
}

/// Where a thread's entry function returns to
pub(crate) extern "C" fn exit_from_trampoline() -> ! {
    exit()
}

/// Make sleeping thread `th` runnable, from anywhere
pub fn ready(th: ThreadRef) {
    match th.scheduler() {
        Some(sched) => sched.ready(th),
        None => kbug!("{} has no scheduler", th.id()),
    }
}

/// Spawn a thread in the caller's runtime
pub fn spawn<F>(f: F) -> SchedResult<ThreadId>
where
    F: FnOnce() + Send + 'static,
{
    let ctx = tls::core_context().ok_or(SchedError::NotInRuntime)?;
    ctx.scheduler().spawn(f)
}

/// `spawn`, with the new thread tagged `tag`
pub fn spawn_tagged<F>(tag: StatusTag, f: F) -> SchedResult<ThreadId>
where
    F: FnOnce() + Send + 'static,
{
    let ctx = tls::core_context().ok_or(SchedError::NotInRuntime)?;
    ctx.scheduler().spawn_tagged(tag, f)
}

/// Tag `th` for the priority scope
pub fn set_status(th: ThreadRef, tag: StatusTag) {
    th.set_status(tag);
}

pub fn set_current_status(tag: StatusTag) -> SchedResult<()> {
    let th = current().ok_or(SchedError::NotInRuntime)?;
    th.set_status(tag);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Thread;

    #[test]
    fn test_outside_runtime() {
        assert!(current().is_none());
        assert!(current_core().is_none());
        assert_eq!(
            set_current_status(StatusTag::new(1)),
            Err(SchedError::NotInRuntime)
        );
        assert_eq!(spawn(|| {}), Err(SchedError::NotInRuntime));
        // Degrades to an OS-level yield
        yield_now();
        cede();
    }

    #[test]
    fn test_set_status() {
        let th = Thread::detached(StatusTag::NONE);
        set_status(th, StatusTag::new(8));
        assert_eq!(th.status(), StatusTag::new(8));
        unsafe { th.free() };
    }
}
