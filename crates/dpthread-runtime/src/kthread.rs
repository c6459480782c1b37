//! Per-core scheduler state
//!
//! One `Kthread` per dedicated core. Its run queues sit behind a spinlock;
//! everything a foreign core may look at without that lock (queue length
//! hints, park state, the RCU generation, the queue pointers) is a
//! separate atomic, refreshed when the lock is released.

use crate::runqueue::RunQueues;
use crate::thread::{Thread, ThreadRef};
use dpthread_core::stats::{CoreStats, StatCounter};
use dpthread_core::{kbug, CoreId, SpinLock, SpinLockGuard, StatusTag};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};

/// Monotonic counters observed by the orchestrator for congestion
///
/// `ready` counts every thread made runnable on (or moved to) this core,
/// `consumed` every thread taken off it. Their difference is the backlog.
#[derive(Default)]
pub struct QueuePtrs {
    ready: AtomicU32,
    consumed: AtomicU32,
}

impl QueuePtrs {
    #[inline]
    pub(crate) fn produced(&self, n: u32) {
        self.ready.fetch_add(n, Ordering::Release);
    }

    #[inline]
    pub(crate) fn consumed(&self, n: u32) {
        self.consumed.fetch_add(n, Ordering::Release);
    }

    /// `(ready, consumed)`
    #[inline]
    pub fn load(&self) -> (u32, u32) {
        (
            self.ready.load(Ordering::Acquire),
            self.consumed.load(Ordering::Acquire),
        )
    }
}

/// Lock-free view of the queue lengths, possibly stale
#[derive(Default)]
struct QueueHints {
    primary: AtomicU32,
    low: AtomicU32,
    overflow: AtomicU32,
}

/// State of one core
pub struct Kthread {
    id: CoreId,
    rq: SpinLock<RunQueues>,
    hints: QueueHints,
    prioritized: AtomicU32,
    parked: AtomicBool,
    preempt_pending: AtomicBool,
    /// Even while in the scheduler, odd while running a green thread
    rcu_gen: AtomicU64,
    /// Physical CPU the kthread last ran on
    curr_cpu: AtomicU32,
    current: AtomicPtr<Thread>,
    q_ptrs: QueuePtrs,
    last_watchdog_ns: AtomicU64,
    last_pmc_ns: AtomicU64,
    /// Time the core last left the scheduler for a thread
    last_exit_ns: AtomicU64,
    sampled_depth: AtomicU32,
    rng: AtomicU64,
    stats: CoreStats,
}

impl Kthread {
    pub fn new(id: CoreId, rq_capacity: usize) -> Self {
        Self {
            id,
            rq: SpinLock::new(RunQueues::new(rq_capacity)),
            hints: QueueHints::default(),
            prioritized: AtomicU32::new(StatusTag::NONE.as_u32()),
            parked: AtomicBool::new(false),
            preempt_pending: AtomicBool::new(false),
            rcu_gen: AtomicU64::new(0),
            curr_cpu: AtomicU32::new(id.as_u32()),
            current: AtomicPtr::new(std::ptr::null_mut()),
            q_ptrs: QueuePtrs::default(),
            last_watchdog_ns: AtomicU64::new(0),
            last_pmc_ns: AtomicU64::new(0),
            last_exit_ns: AtomicU64::new(0),
            sampled_depth: AtomicU32::new(0),
            rng: AtomicU64::new(rng_seed(id)),
            stats: CoreStats::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> CoreId {
        self.id
    }

    /// Take this core's queue lock, spinning if needed
    #[inline]
    pub fn lock(&self) -> RqGuard<'_> {
        RqGuard {
            k: self,
            rq: self.rq.lock(),
        }
    }

    /// Take this core's queue lock only if it is free
    #[inline]
    pub fn try_lock(&self) -> Option<RqGuard<'_>> {
        self.rq.try_lock().map(|rq| RqGuard { k: self, rq })
    }

    /// Racy: could this core have stealable work?
    #[inline]
    pub fn maybe_has_work(&self) -> bool {
        self.hints.primary.load(Ordering::Relaxed) != 0
            || self.hints.overflow.load(Ordering::Relaxed) != 0
    }

    /// Racy: could this core's secondary ring hold anything?
    #[inline]
    pub fn maybe_has_low_work(&self) -> bool {
        self.hints.low.load(Ordering::Relaxed) != 0
    }

    /// Racy: scope tag as of the last unlock
    #[inline]
    pub fn prioritized_hint(&self) -> StatusTag {
        StatusTag::new(self.prioritized.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_parked(&self, parked: bool) {
        self.parked.store(parked, Ordering::Release);
    }

    /// Ask this core to stop polling and give itself back
    #[inline]
    pub fn request_preempt(&self) {
        self.preempt_pending.store(true, Ordering::Release);
    }

    #[inline]
    pub fn preempt_pending(&self) -> bool {
        self.preempt_pending.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn clear_preempt(&self) {
        self.preempt_pending.store(false, Ordering::Release);
    }

    #[inline]
    pub fn rcu_gen(&self) -> u64 {
        self.rcu_gen.load(Ordering::Acquire)
    }

    /// A freshly started core is "in a thread" until its first schedule
    pub(crate) fn rcu_start(&self) {
        self.rcu_gen.store(1, Ordering::Release);
    }

    /// Thread -> scheduler crossing; generation becomes even
    #[inline]
    pub(crate) fn rcu_enter_sched(&self) {
        let gen = self.rcu_gen.fetch_add(1, Ordering::AcqRel) + 1;
        if gen % 2 != 0 {
            kbug!("{}: rcu generation {} odd after entering scheduler", self.id, gen);
        }
    }

    /// Scheduler -> thread crossing; generation becomes odd
    #[inline]
    pub(crate) fn rcu_enter_thread(&self) {
        let gen = self.rcu_gen.fetch_add(1, Ordering::AcqRel) + 1;
        if gen % 2 != 1 {
            kbug!("{}: rcu generation {} even after leaving scheduler", self.id, gen);
        }
    }

    /// Thread -> thread handoff: pass through the scheduler state once
    #[inline]
    pub(crate) fn rcu_quiesce(&self) {
        self.rcu_enter_sched();
        self.rcu_enter_thread();
    }

    #[inline]
    pub fn curr_cpu(&self) -> usize {
        self.curr_cpu.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub(crate) fn set_curr_cpu(&self, cpu: usize) {
        self.curr_cpu.store(cpu as u32, Ordering::Relaxed);
    }

    /// Thread this core is executing, if any
    #[inline]
    pub fn current(&self) -> Option<ThreadRef> {
        unsafe { ThreadRef::from_ptr(self.current.load(Ordering::Acquire)) }
    }

    #[inline]
    pub(crate) fn set_current(&self, th: Option<ThreadRef>) {
        let ptr = th.map_or(std::ptr::null_mut(), ThreadRef::as_ptr);
        self.current.store(ptr, Ordering::Release);
    }

    #[inline]
    pub(crate) fn take_current(&self) -> Option<ThreadRef> {
        unsafe { ThreadRef::from_ptr(self.current.swap(std::ptr::null_mut(), Ordering::AcqRel)) }
    }

    #[inline]
    pub fn queue_ptrs(&self) -> &QueuePtrs {
        &self.q_ptrs
    }

    #[inline]
    pub fn stats(&self) -> &CoreStats {
        &self.stats
    }

    #[inline]
    pub(crate) fn stat(&self, c: StatCounter) {
        self.stats.inc(c);
    }

    /// Queue depth recorded at the last counter refresh
    #[inline]
    pub fn sampled_depth(&self) -> u32 {
        self.sampled_depth.load(Ordering::Relaxed)
    }

    /// True once per `interval_ns`; updates the stored timestamp
    #[inline]
    pub(crate) fn watchdog_due(&self, now: u64, interval_ns: u64) -> bool {
        Self::interval_due(&self.last_watchdog_ns, now, interval_ns)
    }

    /// Like `watchdog_due` but leaves the timestamp alone
    #[inline]
    pub(crate) fn watchdog_expired(&self, now: u64, interval_ns: u64) -> bool {
        now.saturating_sub(self.last_watchdog_ns.load(Ordering::Relaxed)) >= interval_ns
    }

    #[inline]
    pub(crate) fn pmc_due(&self, now: u64, interval_ns: u64) -> bool {
        Self::interval_due(&self.last_pmc_ns, now, interval_ns)
    }

    #[inline]
    fn interval_due(last: &AtomicU64, now: u64, interval_ns: u64) -> bool {
        if now.saturating_sub(last.load(Ordering::Relaxed)) < interval_ns {
            return false;
        }
        last.store(now, Ordering::Relaxed);
        true
    }

    #[inline]
    pub(crate) fn sample_depth(&self, depth: u32) {
        self.sampled_depth.store(depth, Ordering::Relaxed);
    }

    /// Time since the core last handed control to a thread
    #[inline]
    pub(crate) fn since_exit(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_exit_ns.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn mark_exit(&self, now: u64) {
        self.last_exit_ns.store(now, Ordering::Relaxed);
    }

    /// Next pseudo-random value (LCG), owner core only
    #[inline]
    pub(crate) fn next_rand(&self) -> u32 {
        let x = self
            .rng
            .load(Ordering::Relaxed)
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.rng.store(x, Ordering::Relaxed);
        (x >> 33) as u32
    }
}

/// Guard over a core's run queues
///
/// Publishes the lock-free hints when dropped, before the lock itself is
/// released.
pub struct RqGuard<'a> {
    k: &'a Kthread,
    rq: SpinLockGuard<'a, RunQueues>,
}

impl<'a> RqGuard<'a> {
    #[inline]
    pub fn kthread(&self) -> &'a Kthread {
        self.k
    }
}

impl Deref for RqGuard<'_> {
    type Target = RunQueues;

    #[inline]
    fn deref(&self) -> &RunQueues {
        &self.rq
    }
}

impl DerefMut for RqGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut RunQueues {
        &mut self.rq
    }
}

impl Drop for RqGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        let h = &self.k.hints;
        h.primary.store(self.rq.len(), Ordering::Relaxed);
        h.low.store(self.rq.low_len(), Ordering::Relaxed);
        h.overflow.store(self.rq.overflow_len() as u32, Ordering::Relaxed);
        self.k
            .prioritized
            .store(self.rq.prioritized().as_u32(), Ordering::Release);
    }
}

fn rng_seed(id: CoreId) -> u64 {
    (id.as_u32() as u64 + 1).wrapping_mul(0xBF58_476D_1CE4_E5B9) ^ 0x9E37_79B9_7F4A_7C15
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpthread_core::StatusTag;

    #[test]
    fn test_hints_follow_unlock() {
        let k = Kthread::new(CoreId::new(0), 4);
        assert!(!k.maybe_has_work());
        {
            let mut rq = k.lock();
            for _ in 0..5 {
                rq.push(Thread::detached(StatusTag::NONE));
            }
            // Not published while held
            assert!(!k.maybe_has_work());
        }
        assert!(k.maybe_has_work());

        let mut rq = k.lock();
        while rq.pop().is_some() {}
        rq.drain_overflow();
        while rq.pop().is_some() {}
        drop(rq);
        assert!(!k.maybe_has_work());
    }

    #[test]
    fn test_try_lock_contended() {
        let k = Kthread::new(CoreId::new(1), 4);
        let g = k.lock();
        assert!(k.try_lock().is_none());
        drop(g);
        assert!(k.try_lock().is_some());
    }

    #[test]
    fn test_rcu_parity() {
        let k = Kthread::new(CoreId::new(0), 4);
        k.rcu_start();
        assert_eq!(k.rcu_gen() % 2, 1);
        k.rcu_enter_sched();
        assert_eq!(k.rcu_gen() % 2, 0);
        k.rcu_enter_thread();
        assert_eq!(k.rcu_gen() % 2, 1);
        let before = k.rcu_gen();
        k.rcu_quiesce();
        assert_eq!(k.rcu_gen(), before + 2);
    }

    #[test]
    fn test_intervals() {
        let k = Kthread::new(CoreId::new(0), 4);
        assert!(k.watchdog_expired(1_000, 500));
        assert!(k.watchdog_due(1_000, 500));
        assert!(!k.watchdog_expired(1_200, 500));
        assert!(!k.watchdog_due(1_200, 500));
        assert!(k.watchdog_due(1_600, 500));
    }

    #[test]
    fn test_rand_differs_per_core() {
        let a = Kthread::new(CoreId::new(0), 4);
        let b = Kthread::new(CoreId::new(1), 4);
        let xs: Vec<u32> = (0..4).map(|_| a.next_rand()).collect();
        let ys: Vec<u32> = (0..4).map(|_| b.next_rand()).collect();
        assert_ne!(xs, ys);
    }
}
