//! In-process orchestrator
//!
//! Stands in for an external core allocator: an idle core blocks on its
//! own parker and stays blocked until some other core readies work for it
//! (or the park timeout fires). The set of idle cores is kept in a bitmask
//! so callers can cheaply ask whether anybody is asleep.

use crate::parking::{Parker, PlatformParker};
use dpthread_core::{ktrace, CoreId, Orchestrator};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct ParkingOrchestrator {
    parkers: Box<[PlatformParker]>,
    /// Bit `n` set while core `n` is between `notify_idle` and wake-up
    idle: AtomicU64,
    /// Upper bound on a single block, `None` to block indefinitely
    park_timeout: Option<Duration>,
}

impl ParkingOrchestrator {
    pub fn new(num_cores: usize, park_timeout: Option<Duration>) -> Self {
        Self {
            parkers: (0..num_cores).map(|_| PlatformParker::new()).collect(),
            idle: AtomicU64::new(0),
            park_timeout,
        }
    }

    /// Cores currently idle, as a bitmask
    #[inline]
    pub fn idle_mask(&self) -> u64 {
        self.idle.load(Ordering::Acquire)
    }

    #[inline]
    pub fn idle_count(&self) -> u32 {
        self.idle_mask().count_ones()
    }

    #[inline]
    fn bit(core: CoreId) -> u64 {
        1u64 << (core.as_u32() % 64)
    }

    fn parker(&self, core: CoreId) -> Option<&PlatformParker> {
        self.parkers.get(core.as_usize())
    }
}

impl Orchestrator for ParkingOrchestrator {
    fn notify_idle(&self, core: CoreId) {
        self.idle.fetch_or(Self::bit(core), Ordering::AcqRel);
    }

    fn block_until_woken(&self, core: CoreId, voluntary: bool) {
        if let Some(p) = self.parker(core) {
            let woken = p.park(self.park_timeout);
            ktrace!(
                "{} unparked ({}, {})",
                core,
                if voluntary { "idle" } else { "yielded" },
                if woken { "woken" } else { "timeout" }
            );
        }
        self.idle.fetch_and(!Self::bit(core), Ordering::AcqRel);
    }

    fn wake(&self, core: CoreId) {
        if let Some(p) = self.parker(core) {
            p.unpark();
        }
    }
}
