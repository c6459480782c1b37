//! # dpthread - Dataplane Green Thread Scheduler
//!
//! Per-core userspace threading for latency-sensitive packet processing.
//!
//! ## Features
//!
//! - **Per-core kthreads**: one OS thread per granted core, each with a
//!   bounded FIFO run queue and an unbounded overflow list
//! - **Work stealing**: idle cores take half of a busy core's queue, its
//!   overflow, or its pending softirq work
//! - **Fast handoff**: a yielding thread switches straight to the next
//!   local thread without touching the runtime stack
//! - **Priority scope**: threads with a chosen status tag run ahead of
//!   everything else on every core until the scope is lifted
//! - **RCU generations**: per-core counters for quiescence detection
//! - **Parking**: idle cores block on a futex until an orchestrator wakes
//!   them
//!
//! ## Quick Start
//!
//! ```ignore
//! use dpthread::{Runtime, SchedulerConfig, spawn, yield_now};
//!
//! fn main() {
//!     let runtime = Runtime::new(SchedulerConfig::from_env()).unwrap();
//!     runtime
//!         .run(|| {
//!             spawn(|| {
//!                 println!("Hello from a dpthread!");
//!                 yield_now();
//!             })
//!             .unwrap();
//!         })
//!         .unwrap();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │           spawn(), yield_now(), Mutex, WaitGroup            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Scheduler                              │
//! │     run queues, stealing, priority scope, softirq polling   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Kthread  │      │  Kthread  │      │  Kthread  │
//!    │  (core 0) │      │  (core 1) │      │  (core N) │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                    Orchestrator                         │
//!    │          idle notifications, park and wake              │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use dpthread_core::{
    CoreId, CoreStats, Orchestrator, SchedError, SchedResult, StatCounter, StatsSnapshot,
    StatusTag, ThreadId, ThreadState, WorkerError,
};

// Re-export kprint macros for debug logging
pub use dpthread_core::kprint::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};
pub use dpthread_core::{kdebug, kerror, kinfo, kprint, kprintln, ktrace, kwarn};

// Re-export env utilities
pub use dpthread_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use dpthread_runtime::ops;
pub use dpthread_runtime::{
    CpuMap, InjectQueue, KthreadPool, Mutex, MutexGuard, NoSoftirq, ParkingOrchestrator,
    PollPolicy, RcuSnapshot, Scheduler, SchedulerBuilder, SchedulerConfig, SoftirqSource,
    ThreadRef, WaitGroup, WaitQueue,
};

use std::sync::Arc;

/// Runtime handle
///
/// Owns a scheduler until `run` hands it to the kthreads. `run` returns
/// once the main thread has exited and every kthread has stopped.
pub struct Runtime {
    sched: Arc<Scheduler>,
}

impl Runtime {
    /// Create a runtime with the default orchestrator and topology
    pub fn new(config: SchedulerConfig) -> SchedResult<Self> {
        Self::with_builder(Scheduler::builder(config))
    }

    /// Create a runtime from a customized scheduler builder
    pub fn with_builder(builder: SchedulerBuilder) -> SchedResult<Self> {
        init_logging();
        let sched = builder.build()?;
        if sched.config().debug_logging && !dpthread_core::kprint::level_enabled(LogLevel::Debug) {
            set_log_level(LogLevel::Debug);
        }
        Ok(Self { sched })
    }

    /// The scheduler, for spawning before `run` or controlling it from
    /// outside
    #[inline]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    /// Run `main` as the main thread and drive every core until it exits
    pub fn run<F>(self, main: F) -> SchedResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sched.spawn_main(main)?;
        let pool = KthreadPool::start(&self.sched)?;
        kdebug!("runtime started with {} kthreads", pool.len());
        let result = pool.join();
        kdebug!("runtime stopped");
        result
    }
}

/// Spawn a thread in the caller's runtime
///
/// Fails with `SchedError::NotInRuntime` outside a runtime.
#[inline]
pub fn spawn<F>(f: F) -> SchedResult<ThreadId>
where
    F: FnOnce() + Send + 'static,
{
    ops::spawn(f)
}

/// Spawn a thread tagged for the priority scope
#[inline]
pub fn spawn_tagged<F>(tag: StatusTag, f: F) -> SchedResult<ThreadId>
where
    F: FnOnce() + Send + 'static,
{
    ops::spawn_tagged(tag, f)
}

/// Let other runnable threads run
///
/// If called from outside a dpthread, this yields the OS thread.
#[inline]
pub fn yield_now() {
    ops::yield_now()
}

/// Give the current core back to the orchestrator
#[inline]
pub fn cede() {
    ops::cede()
}

/// Get the current dpthread's ID
///
/// Returns `None` if not running in a dpthread.
#[inline]
pub fn current_id() -> Option<ThreadId> {
    ops::current().map(|th| th.id())
}

/// Core the caller runs on
#[inline]
pub fn current_core() -> Option<CoreId> {
    ops::current_core()
}

/// Check if currently executing within a dpthread
#[inline]
pub fn is_in_dpthread() -> bool {
    ops::current().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(cores: usize) -> SchedulerConfig {
        SchedulerConfig::new()
            .num_cores(cores)
            .max_threads(1024)
            .park_timeout(Duration::from_millis(10))
    }

    #[test]
    fn test_outside_runtime() {
        assert!(!is_in_dpthread());
        assert!(current_id().is_none());
        assert_eq!(spawn(|| {}), Err(SchedError::NotInRuntime));
    }

    #[test]
    fn test_run_spawns_and_joins() {
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);

        let runtime = Runtime::new(config(2)).unwrap();
        let sched = Arc::clone(runtime.scheduler());
        runtime
            .run(move || {
                assert!(is_in_dpthread());
                assert!(current_core().is_some());

                let wg = Arc::new(WaitGroup::new());
                wg.add(8);
                for _ in 0..8 {
                    let (wg, d) = (Arc::clone(&wg), Arc::clone(&d));
                    spawn(move || {
                        yield_now();
                        d.fetch_add(1, Ordering::SeqCst);
                        wg.done();
                    })
                    .unwrap();
                }
                wg.wait();
            })
            .unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert!(!sched.is_running());
        assert_eq!(sched.live_threads(), 0);
    }

    #[test]
    fn test_priority_threads_complete() {
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);

        let runtime = Runtime::new(config(2)).unwrap();
        runtime.scheduler().set_prioritized(StatusTag::new(7));
        runtime
            .run(move || {
                let wg = Arc::new(WaitGroup::new());
                wg.add(6);
                for i in 0..6u32 {
                    let (wg, d) = (Arc::clone(&wg), Arc::clone(&d));
                    let tag = if i % 2 == 0 { StatusTag::new(7) } else { StatusTag::NONE };
                    spawn_tagged(tag, move || {
                        d.fetch_add(1, Ordering::SeqCst);
                        wg.done();
                    })
                    .unwrap();
                }
                wg.wait();
            })
            .unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 6);
    }
}
