//! Softirq work sources
//!
//! "Softirq work" is whatever a core must service besides its run queue:
//! packets, completions, expired timers. The scheduler does not know what
//! it is; it only asks a `SoftirqSource` whether a core has some, and to
//! turn one unit of it into a runnable thread.

use crate::thread::ThreadRef;
use crossbeam_queue::SegQueue;
use dpthread_core::{CoreId, ThreadState};

/// Producer of per-core deferred work
pub trait SoftirqSource: Send + Sync {
    /// Racy check: does `core` have pending work?
    fn work_available(&self, core: CoreId) -> bool;

    /// Service up to `budget` items of `core`'s work
    ///
    /// Returns a thread that is already RUNNABLE and on no queue, which
    /// the caller runs or enqueues.
    fn run_one(&self, core: CoreId, budget: u32) -> Option<ThreadRef>;

    /// Will work show up for `core` shortly (e.g. a timer about to fire)?
    fn work_soon(&self, _core: CoreId, _now_ns: u64) -> bool {
        false
    }
}

/// A source that never has work
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSoftirq;

impl SoftirqSource for NoSoftirq {
    fn work_available(&self, _core: CoreId) -> bool {
        false
    }

    fn run_one(&self, _core: CoreId, _budget: u32) -> Option<ThreadRef> {
        None
    }
}

/// Lock-free per-core inbox of threads to wake
///
/// Lets code that must not take a kthread lock (completion handlers, other
/// OS threads) hand a sleeping thread to a core. The core picks it up the
/// next time it services softirq work, locally or through a thief.
pub struct InjectQueue {
    queues: Box<[SegQueue<ThreadRef>]>,
}

impl InjectQueue {
    /// One inbox per core; at least one is always created
    pub fn new(num_cores: usize) -> Self {
        Self {
            queues: (0..num_cores.max(1)).map(|_| SegQueue::new()).collect(),
        }
    }

    /// Queue sleeping thread `th` for `core`
    ///
    /// The thread becomes RUNNABLE immediately; it must not also be passed
    /// to `ready`.
    pub fn inject(&self, core: CoreId, th: ThreadRef) {
        th.transition(ThreadState::Sleeping, ThreadState::Runnable);
        let idx = core.as_usize() % self.queues.len();
        self.queues[idx].push(th);
    }

    pub fn pending(&self, core: CoreId) -> usize {
        self.queues.get(core.as_usize()).map_or(0, |q| q.len())
    }
}

impl SoftirqSource for InjectQueue {
    fn work_available(&self, core: CoreId) -> bool {
        self.queues
            .get(core.as_usize())
            .is_some_and(|q| !q.is_empty())
    }

    fn run_one(&self, core: CoreId, _budget: u32) -> Option<ThreadRef> {
        self.queues.get(core.as_usize())?.pop()
    }
}
