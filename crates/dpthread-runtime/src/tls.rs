//! Thread-local storage for the current core
//!
//! A kthread publishes its `CoreContext` here while it runs. Green threads
//! find their core through it, but a green thread may migrate to another
//! OS thread at any switch point, so a TLS address computed before a
//! switch is stale after it. The accessors are kept out of line for that
//! reason, and callers must not hold the returned reference across a
//! switch.

use crate::switch::CoreContext;
use std::cell::Cell;

thread_local! {
    static CORE_CONTEXT: Cell<*const CoreContext> = const { Cell::new(std::ptr::null()) };
}

/// Publish `ctx` for the calling kthread
#[inline(never)]
pub(crate) fn set_core_context(ctx: &CoreContext) {
    CORE_CONTEXT.with(|cell| cell.set(ctx as *const CoreContext));
}

#[inline(never)]
pub(crate) fn clear_core_context() {
    CORE_CONTEXT.with(|cell| cell.set(std::ptr::null()));
}

/// Context of the core the caller is running on, if it is a kthread
///
/// The reference is only valid until the next context switch.
#[inline(never)]
pub(crate) fn core_context<'a>() -> Option<&'a CoreContext> {
    let ptr = CORE_CONTEXT.with(|cell| cell.get());
    // Safety: the kthread clears the pointer before its context is dropped
    unsafe { ptr.as_ref() }
}

/// Check if we're running on a kthread
#[inline]
pub fn in_runtime() -> bool {
    core_context().is_some()
}
