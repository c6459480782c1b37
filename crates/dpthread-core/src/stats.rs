//! Per-core scheduler counters
//!
//! Each kthread owns one `CoreStats`. Only the owning core increments its
//! counters on the hot path; observers read them with relaxed loads, so a
//! snapshot is approximate while the runtime is busy.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Scheduler event counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum StatCounter {
    /// Scheduling decisions (full loop entries and direct handoffs)
    Reschedules = 0,
    /// Threads taken from another core's queues
    ThreadsStolen,
    /// Enqueues that spilled into the overflow list
    RqOverflow,
    /// Softirq units serviced for this core
    SoftirqsLocal,
    /// Softirq units serviced on behalf of another core
    SoftirqsStolen,
    /// Threads run on the core that last ran them
    LocalRuns,
    /// Threads run away from their previous core
    RemoteRuns,
    /// Wakeups issued from a core with affinity to the thread
    LocalWakes,
    /// Wakeups issued from an unrelated core
    RemoteWakes,
    /// Times the core parked
    Parks,
    /// Nanoseconds spent in green threads
    ProgramNs,
    /// Nanoseconds spent in the scheduler loop
    SchedNs,
}

impl StatCounter {
    pub const COUNT: usize = 12;

    pub const ALL: [StatCounter; Self::COUNT] = [
        StatCounter::Reschedules,
        StatCounter::ThreadsStolen,
        StatCounter::RqOverflow,
        StatCounter::SoftirqsLocal,
        StatCounter::SoftirqsStolen,
        StatCounter::LocalRuns,
        StatCounter::RemoteRuns,
        StatCounter::LocalWakes,
        StatCounter::RemoteWakes,
        StatCounter::Parks,
        StatCounter::ProgramNs,
        StatCounter::SchedNs,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            StatCounter::Reschedules => "reschedules",
            StatCounter::ThreadsStolen => "threads_stolen",
            StatCounter::RqOverflow => "rq_overflow",
            StatCounter::SoftirqsLocal => "softirqs_local",
            StatCounter::SoftirqsStolen => "softirqs_stolen",
            StatCounter::LocalRuns => "local_runs",
            StatCounter::RemoteRuns => "remote_runs",
            StatCounter::LocalWakes => "local_wakes",
            StatCounter::RemoteWakes => "remote_wakes",
            StatCounter::Parks => "parks",
            StatCounter::ProgramNs => "program_ns",
            StatCounter::SchedNs => "sched_ns",
        }
    }
}

/// Counter block of one core, padded to its own cache lines
#[repr(C, align(64))]
pub struct CoreStats {
    counters: [AtomicU64; StatCounter::COUNT],
}

impl CoreStats {
    pub fn new() -> Self {
        CoreStats {
            counters: core::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    #[inline]
    pub fn inc(&self, c: StatCounter) {
        self.add(c, 1);
    }

    #[inline]
    pub fn add(&self, c: StatCounter, n: u64) {
        self.counters[c as usize].fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self, c: StatCounter) -> u64 {
        self.counters[c as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            values: core::array::from_fn(|i| self.counters[i].load(Ordering::Relaxed)),
        }
    }
}

impl Default for CoreStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a counter block
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    values: [u64; StatCounter::COUNT],
}

impl StatsSnapshot {
    #[inline]
    pub fn get(&self, c: StatCounter) -> u64 {
        self.values[c as usize]
    }

    /// Element-wise sum, for totals across cores
    pub fn merge(&mut self, other: &StatsSnapshot) {
        for (a, b) in self.values.iter_mut().zip(other.values.iter()) {
            *a += *b;
        }
    }
}

impl fmt::Debug for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        for c in StatCounter::ALL {
            m.entry(&c.name(), &self.get(c));
        }
        m.finish()
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in StatCounter::ALL.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={}", c.name(), self.get(*c))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let s = CoreStats::new();
        s.inc(StatCounter::Reschedules);
        s.inc(StatCounter::Reschedules);
        s.add(StatCounter::SchedNs, 500);
        assert_eq!(s.get(StatCounter::Reschedules), 2);
        assert_eq!(s.get(StatCounter::SchedNs), 500);
        assert_eq!(s.get(StatCounter::Parks), 0);
    }

    #[test]
    fn test_snapshot_merge() {
        let a = CoreStats::new();
        let b = CoreStats::new();
        a.add(StatCounter::ThreadsStolen, 3);
        b.add(StatCounter::ThreadsStolen, 4);

        let mut total = a.snapshot();
        total.merge(&b.snapshot());
        assert_eq!(total.get(StatCounter::ThreadsStolen), 7);
        assert!(format!("{}", total).contains("threads_stolen=7"));
    }

    #[test]
    fn test_all_covers_every_counter() {
        for (i, c) in StatCounter::ALL.iter().enumerate() {
            assert_eq!(*c as usize, i);
        }
    }
}
