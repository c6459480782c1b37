//! # dpthread-core
//!
//! Core types for the dpthread dataplane scheduler.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Everything that touches stacks, registers, futexes or CPU topology
//! lives in `dpthread-runtime`.
//!
//! ## Modules
//!
//! - `id` - Core (kthread) and green thread identifiers
//! - `state` - Thread lifecycle state and priority status tags
//! - `error` - Error types
//! - `spinlock` - Per-core run queue lock
//! - `stats` - Per-core scheduler counters
//! - `traits` - Orchestrator interface (core grants and park/wake)
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod error;
pub mod spinlock;
pub mod stats;
pub mod traits;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::{CoreId, ThreadId};
pub use state::{StatusTag, ThreadState};
pub use error::{MemoryError, SchedError, SchedResult, WorkerError};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use stats::{CoreStats, StatCounter, StatsSnapshot};
pub use traits::Orchestrator;
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_get_us, env_is_set};

cfg_if::cfg_if! {
    if #[cfg(feature = "debug-assertions")] {
        /// Scheduler invariant checks (`kassert!`) are compiled in.
        pub const CHECKED: bool = true;
    } else {
        /// Scheduler invariant checks (`kassert!`) follow `debug_assertions`.
        pub const CHECKED: bool = cfg!(debug_assertions);
    }
}

/// Constants shared by the runtime
pub mod constants {
    /// Default bounded run queue capacity per core
    pub const RQ_SIZE: usize = 32;

    /// Maximum cores (kthreads) a runtime can drive
    ///
    /// The orchestrator tracks idle cores in a single 64-bit mask.
    pub const MAX_CORES: usize = 64;

    /// Status tag of ordinary (unclassified) threads
    pub const STATUS_NONE: u32 = 0;

    /// No core sentinel value
    pub const CORE_NONE: u32 = u32::MAX;

    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;
}
