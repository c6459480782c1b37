//! Interface to the core orchestrator
//!
//! Cores are granted to and reclaimed from the runtime by an external
//! orchestrator. The scheduler only talks to it through this trait: it
//! announces that a core went idle, blocks the core until it is granted
//! again, and asks for a parked core to be woken when work shows up.

use crate::id::CoreId;

/// Park/wake channel between the scheduler and whoever owns the cores
///
/// Implementations must not lose a `wake` that races with a core that is
/// about to block: a wake issued after `notify_idle` and before
/// `block_until_woken` has to make that `block_until_woken` return.
pub trait Orchestrator: Send + Sync {
    /// Core `core` found no work and is about to block
    fn notify_idle(&self, core: CoreId);

    /// Block the calling kthread until `core` is woken
    ///
    /// `voluntary` is false when the park was forced by a pending
    /// preemption request rather than by running out of work.
    fn block_until_woken(&self, core: CoreId, voluntary: bool);

    /// Wake `core` if it is blocked (or make its next block return at once)
    fn wake(&self, core: CoreId);

    /// Block a freshly started kthread until the orchestrator attaches it
    fn wait_to_attach(&self, _core: CoreId) {}
}
