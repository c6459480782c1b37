//! # dpthread-runtime
//!
//! Platform-specific runtime for the dpthread dataplane scheduler.
//!
//! This crate provides:
//! - Per-core kthreads with bounded run queues and an overflow list
//! - Work stealing, softirq polling and a cluster-wide priority scope
//! - A direct thread-to-thread handoff fast path
//! - Per-core RCU generation counters
//! - Core parking through a pluggable orchestrator (futex based by default)
//! - Context switching (architecture-specific assembly)
//! - Stack memory management (mmap with guard pages)

pub mod arch;
pub mod clock;
pub mod config;
pub mod kthread;
pub mod memory;
pub mod ops;
pub mod orchestrator;
pub mod parking;
pub mod poll;
pub mod rcu;
pub mod runqueue;
pub mod scheduler;
pub mod softirq;
pub mod sync;
pub mod thread;
pub mod tls;
pub mod topology;
pub mod worker;

mod scope;
mod steal;
mod switch;

// Re-exports
pub use config::{ConfigError, SchedulerConfig};
pub use kthread::Kthread;
pub use orchestrator::ParkingOrchestrator;
pub use poll::PollPolicy;
pub use rcu::RcuSnapshot;
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use softirq::{InjectQueue, NoSoftirq, SoftirqSource};
pub use sync::{Mutex, MutexGuard, WaitGroup, WaitQueue};
pub use thread::ThreadRef;
pub use topology::CpuMap;
pub use worker::KthreadPool;
