//! Error types for the dpthread scheduler
//!
//! Only recoverable conditions are errors. Broken scheduler invariants
//! (a thread readied twice, an RCU parity mismatch, an overfull queue)
//! are not represented here: they go through `kbug!` and abort.

use core::fmt;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Control block or stack could not be allocated
    OutOfMemory(MemoryError),

    /// `spawn_main` was already called on this runtime
    MainAlreadySpawned,

    /// Operation needs to run on a runtime kthread or green thread
    NotInRuntime,

    /// Kthreads were already started for this runtime
    AlreadyStarted,

    /// Configuration rejected by validation
    InvalidConfig(&'static str),

    /// Kthread (OS thread) error
    Worker(WorkerError),

    /// Platform-specific error (errno)
    Platform(i32),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::OutOfMemory(e) => write!(f, "out of memory: {}", e),
            SchedError::MainAlreadySpawned => write!(f, "main thread already spawned"),
            SchedError::NotInRuntime => write!(f, "not running inside a dpthread runtime"),
            SchedError::AlreadyStarted => write!(f, "runtime already started"),
            SchedError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            SchedError::Worker(e) => write!(f, "kthread error: {}", e),
            SchedError::Platform(code) => write!(f, "platform error: {}", code),
        }
    }
}

impl std::error::Error for SchedError {}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Thread limit (`max_threads`) reached
    TooManyThreads,

    /// mmap of a stack region failed
    StackMapFailed,

    /// mprotect of the guard page failed
    GuardProtectFailed,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::TooManyThreads => write!(f, "thread limit reached"),
            MemoryError::StackMapFailed => write!(f, "stack mapping failed"),
            MemoryError::GuardProtectFailed => write!(f, "guard page protection failed"),
        }
    }
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::OutOfMemory(e)
    }
}

/// Kthread related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Failed to spawn the OS thread backing a kthread
    SpawnFailed,

    /// Failed to pin a kthread to its CPU
    AffinityFailed,

    /// A kthread panicked on its runtime stack
    Panicked,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::SpawnFailed => write!(f, "failed to spawn kthread"),
            WorkerError::AffinityFailed => write!(f, "failed to set kthread affinity"),
            WorkerError::Panicked => write!(f, "kthread panicked"),
        }
    }
}

impl From<WorkerError> for SchedError {
    fn from(e: WorkerError) -> Self {
        SchedError::Worker(e)
    }
}
