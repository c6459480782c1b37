//! Core and thread identifier types

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::constants::CORE_NONE;

/// Index of a kthread (one per dedicated core)
///
/// Indexes the scheduler's per-core registry. The maximum value
/// (u32::MAX) is reserved as a sentinel for "no core".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CoreId(u32);

impl CoreId {
    /// Sentinel value indicating no core
    pub const NONE: CoreId = CoreId(CORE_NONE);

    #[inline]
    pub const fn new(id: u32) -> Self {
        CoreId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get as usize for indexing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == CORE_NONE
    }

    #[inline]
    pub const fn to_option(self) -> Option<CoreId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u32> for CoreId {
    #[inline]
    fn from(id: u32) -> Self {
        CoreId(id)
    }
}

impl From<usize> for CoreId {
    #[inline]
    fn from(id: usize) -> Self {
        CoreId(id as u32)
    }
}

impl fmt::Debug for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "CoreId(NONE)")
        } else {
            write!(f, "CoreId({})", self.0)
        }
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "k{}", self.0)
        }
    }
}

impl Default for CoreId {
    fn default() -> Self {
        CoreId::NONE
    }
}

/// Process-unique identifier of a green thread
///
/// Handed out monotonically at spawn time; never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ThreadId(u64);

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

impl ThreadId {
    /// Allocate the next id
    #[inline]
    pub fn next() -> Self {
        ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}
