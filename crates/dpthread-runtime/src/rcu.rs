//! Quiescence detection on the per-core generation counters
//!
//! A core's generation is even while it sits in the scheduler and odd
//! while a green thread runs on it; every crossing bumps it by one. A
//! reader section that started before a snapshot has certainly ended once
//! each core has either been in the scheduler at snapshot time or moved
//! its counter since.

use crate::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub struct RcuSnapshot {
    gens: Box<[u64]>,
}

impl RcuSnapshot {
    pub fn take(sched: &Scheduler) -> Self {
        Self {
            gens: sched.cores().iter().map(|k| k.rcu_gen()).collect(),
        }
    }

    /// Has every core passed through a quiescent point since `take`?
    pub fn has_elapsed(&self, sched: &Scheduler) -> bool {
        self.gens
            .iter()
            .zip(sched.cores())
            .all(|(&then, k)| then % 2 == 0 || k.rcu_gen() != then)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::topology::CpuMap;
    use dpthread_core::CoreId;

    #[test]
    fn test_grace_period() {
        let sched = Scheduler::builder(SchedulerConfig::new().num_cores(2))
            .cpu_map(CpuMap::flat(2))
            .build()
            .unwrap();
        let k0 = sched.core(CoreId::new(0));
        let k1 = sched.core(CoreId::new(1));

        // Core 0 runs a thread, core 1 is in its scheduler
        k0.rcu_start();
        k1.rcu_start();
        k1.rcu_enter_sched();

        let snap = RcuSnapshot::take(&sched);
        assert!(!snap.has_elapsed(&sched));

        k0.rcu_enter_sched();
        assert!(snap.has_elapsed(&sched));
    }

    #[test]
    fn test_direct_handoff_counts_as_quiescent() {
        let sched = Scheduler::builder(SchedulerConfig::new().num_cores(1))
            .cpu_map(CpuMap::flat(1))
            .build()
            .unwrap();
        let k = sched.core(CoreId::new(0));
        k.rcu_start();

        let snap = RcuSnapshot::take(&sched);
        k.rcu_quiesce();
        assert_eq!(k.rcu_gen() % 2, 1);
        assert!(snap.has_elapsed(&sched));
    }
}
