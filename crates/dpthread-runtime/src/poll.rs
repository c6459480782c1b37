//! Busy-poll policy
//!
//! Decides whether an idle core keeps spinning through the scheduler loop
//! or parks. Spinning wins while the core is within its minimum poll
//! window, has not exhausted its iteration allowance, or knows work is
//! about to arrive.

use crate::config::SchedulerConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Empty loop iterations allowed regardless of time
    pub iters: u32,
    pub min_poll_ns: u64,
}

impl PollPolicy {
    pub fn new(iters: u32, min_poll: Duration) -> Self {
        Self {
            iters,
            min_poll_ns: min_poll.as_nanos() as u64,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.poll_iters, config.min_poll)
    }

    /// Never spin; park as soon as a pass finds nothing
    pub fn park_immediately() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// `iters` counts completed empty passes, including this one
    #[inline]
    pub fn keep_polling(&self, iters: u32, polled_ns: u64, work_soon: bool) -> bool {
        iters < self.iters || polled_ns < self.min_poll_ns || work_soon
    }
}
