//! Main scheduler implementation
//!
//! `Scheduler` owns the per-core registry and everything the cores share:
//! the priority scope, the softirq source, the orchestrator, the stack
//! pool. It never touches TLS except to find the calling core in `ready`;
//! the kthread loop (`worker`) and the green-thread operations (`ops`)
//! pass the core in explicitly.
//!
//! Two ways into a scheduling decision exist. `schedule` is the full loop
//! run on a kthread's own stack: it searches local work, softirq work and
//! every other core, then polls and finally parks. `enter_schedule` is the
//! fast path taken by a yielding thread: if the local queue has something
//! it hands off directly, otherwise it reports `Handoff::Slow`.

use crate::clock::now_ns;
use crate::config::SchedulerConfig;
use crate::kthread::{Kthread, RqGuard};
use crate::memory::StackPool;
use crate::orchestrator::ParkingOrchestrator;
use crate::poll::PollPolicy;
use crate::runqueue::{Placement, RunQueues};
use crate::scope::{self, PriorityScope};
use crate::softirq::{NoSoftirq, SoftirqSource};
use crate::steal::{steal_work, steal_work_lp};
use crate::thread::{Entry, Thread, ThreadRef};
use crate::tls;
use crate::topology::{self, CpuMap};
use dpthread_core::stats::{StatCounter, StatsSnapshot};
use dpthread_core::{
    kassert, kdebug, ktrace, CoreId, Orchestrator, SchedError, SchedResult, StatusTag, ThreadId,
    ThreadState,
};
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Outcome of the fast path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// Switch straight to this thread; it is already marked running
    Direct(ThreadRef),
    /// The yielding thread itself was next; keep running
    Same,
    /// Go through the full loop on the runtime stack
    Slow,
}

/// Builder for `Scheduler`
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    softirq: Option<Arc<dyn SoftirqSource>>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
    cpu_map: Option<CpuMap>,
    poll: Option<PollPolicy>,
}

impl SchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            softirq: None,
            orchestrator: None,
            cpu_map: None,
            poll: None,
        }
    }

    pub fn softirq(mut self, source: Arc<dyn SoftirqSource>) -> Self {
        self.softirq = Some(source);
        self
    }

    pub fn orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn cpu_map(mut self, map: CpuMap) -> Self {
        self.cpu_map = Some(map);
        self
    }

    /// Override the poll policy derived from the config
    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll = Some(policy);
        self
    }

    pub fn build(self) -> SchedResult<Arc<Scheduler>> {
        let config = self.config;
        config.validate()?;

        let n = config.num_cores;
        let cores: Box<[Kthread]> = (0..n)
            .map(|i| Kthread::new(CoreId::from(i), config.rq_capacity))
            .collect();

        let cpu_map = self.cpu_map.unwrap_or_else(CpuMap::detect);
        for k in cores.iter() {
            cpu_map.set_recent_kthread(k.curr_cpu(), k.id());
        }

        let orchestrator = self.orchestrator.unwrap_or_else(|| {
            Arc::new(ParkingOrchestrator::new(n, Some(config.park_timeout)))
        });

        kdebug!(
            "scheduler: {} cores, rq {} slots, {} cpus",
            n,
            config.rq_capacity,
            cpu_map.num_cpus()
        );

        Ok(Arc::new(Scheduler {
            cores,
            cpu_map,
            scope: PriorityScope::new(),
            softirq: self.softirq.unwrap_or_else(|| Arc::new(NoSoftirq)),
            orchestrator,
            poll: self.poll.unwrap_or_else(|| PollPolicy::from_config(&config)),
            stacks: StackPool::new(
                config.stack_size,
                config.guard_size,
                config.max_threads,
                config.stack_cache,
            ),
            rr_idx: AtomicUsize::new(0),
            running: AtomicBool::new(true),
            main_spawned: AtomicBool::new(false),
            watchdog_ns: config.watchdog_interval.as_nanos() as u64,
            pmc_ns: config.pmc_interval.as_nanos() as u64,
            config,
        }))
    }
}

/// Main scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    cores: Box<[Kthread]>,
    cpu_map: CpuMap,
    scope: PriorityScope,
    softirq: Arc<dyn SoftirqSource>,
    orchestrator: Arc<dyn Orchestrator>,
    poll: PollPolicy,
    stacks: StackPool,
    /// Shared cursor of `ready_rr`
    rr_idx: AtomicUsize,
    running: AtomicBool,
    main_spawned: AtomicBool,
    watchdog_ns: u64,
    pmc_ns: u64,
}

impl Scheduler {
    /// Build with the default orchestrator, softirq source and topology
    pub fn new(config: SchedulerConfig) -> SchedResult<Arc<Self>> {
        SchedulerBuilder::new(config).build()
    }

    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[inline]
    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    #[inline]
    pub fn cores(&self) -> &[Kthread] {
        &self.cores
    }

    /// Per-core state of `id`
    ///
    /// # Panics
    ///
    /// Panics if `id` is not below `num_cores()`.
    #[inline]
    pub fn core(&self, id: CoreId) -> &Kthread {
        &self.cores[id.as_usize()]
    }

    #[inline]
    pub fn get_core(&self, id: CoreId) -> Option<&Kthread> {
        self.cores.get(id.as_usize())
    }

    #[inline]
    pub fn cpu_map(&self) -> &CpuMap {
        &self.cpu_map
    }

    #[inline]
    pub(crate) fn orchestrator(&self) -> &dyn Orchestrator {
        &*self.orchestrator
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Live green threads (spawned and not yet freed)
    #[inline]
    pub fn live_threads(&self) -> usize {
        self.stacks.live()
    }

    /// Stop every kthread loop at its next scheduling decision
    ///
    /// Threads still queued are abandoned and freed when the scheduler is
    /// dropped.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        kdebug!("scheduler shutting down");
        for k in self.cores.iter() {
            self.orchestrator.wake(k.id());
        }
    }

    // ---- priority scope ----------------------------------------------

    /// Run threads tagged `tag` ahead of all others, on every core
    pub fn set_prioritized(&self, tag: StatusTag) {
        self.scope.enter(tag);
    }

    pub fn clear_prioritized(&self) {
        self.scope.exit();
    }

    /// Current scope target, `NONE` when no scope is active
    pub fn prioritized(&self) -> StatusTag {
        self.scope.target()
    }

    // ---- orchestrator side -------------------------------------------

    /// Ask `core` to park at its next idle point even if polling
    pub fn request_preempt(&self, core: CoreId) {
        if let Some(k) = self.get_core(core) {
            k.request_preempt();
        }
    }

    /// Counters of `core`, all zero for a core this scheduler lacks
    pub fn stats(&self, core: CoreId) -> StatsSnapshot {
        self.get_core(core)
            .map(|k| k.stats().snapshot())
            .unwrap_or_default()
    }

    pub fn total_stats(&self) -> StatsSnapshot {
        let mut total = StatsSnapshot::default();
        for k in self.cores.iter() {
            total.merge(&k.stats().snapshot());
        }
        total
    }

    // ---- spawning ----------------------------------------------------

    /// Create a thread running `f` and make it runnable
    pub fn spawn<F>(&self, f: F) -> SchedResult<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_tagged(StatusTag::NONE, f)
    }

    /// `spawn`, with the thread's status tag set before it is queued
    pub fn spawn_tagged<F>(&self, tag: StatusTag, f: F) -> SchedResult<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        let th = self.create(Box::new(f), false)?;
        th.set_status(tag);
        let id = th.id();
        self.ready(th);
        Ok(id)
    }

    /// Spawn the main thread; its exit shuts the scheduler down
    pub fn spawn_main<F>(&self, f: F) -> SchedResult<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.main_spawned.swap(true, Ordering::AcqRel) {
            return Err(SchedError::MainAlreadySpawned);
        }
        match self.create(Box::new(f), true) {
            Ok(th) => {
                let id = th.id();
                self.ready(th);
                Ok(id)
            }
            Err(e) => {
                self.main_spawned.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn create(&self, entry: Entry, main: bool) -> SchedResult<ThreadRef> {
        self.stacks.reserve()?;
        let stack = match self.stacks.alloc() {
            Ok(stack) => stack,
            Err(e) => {
                self.stacks.release();
                return Err(e);
            }
        };
        Ok(Thread::create(entry, stack, main, self))
    }

    /// Return a finished thread's stack and control block
    pub(crate) fn free_thread(&self, th: ThreadRef) {
        if let Some(stack) = th.take_stack() {
            self.stacks.free(stack);
        }
        let pooled = th.is_pooled();
        // Safety: the thread is off every queue and no core runs it
        unsafe { th.free() };
        if pooled {
            self.stacks.release();
        }
    }

    // ---- waking ------------------------------------------------------

    /// Make sleeping thread `th` runnable
    ///
    /// Queued on the calling core when called from inside this runtime,
    /// round-robin otherwise.
    pub fn ready(&self, th: ThreadRef) {
        let ctx = tls::core_context().filter(|ctx| std::ptr::eq(Arc::as_ptr(ctx.scheduler()), self));
        match ctx {
            Some(ctx) => self.ready_on(ctx.kthread(), th),
            None => self.ready_rr(th),
        }
    }

    /// Make `th` runnable on the next non-parked core in rotation
    ///
    /// If every core is parked the rotation's pick is used and woken.
    pub fn ready_rr(&self, th: ThreadRef) {
        let n = self.cores.len();
        for _ in 0..n {
            let k = &self.cores[self.rr_idx.fetch_add(1, Ordering::Relaxed) % n];
            if !k.is_parked() {
                self.ready_on(k, th);
                return;
            }
        }
        let k = &self.cores[self.rr_idx.fetch_add(1, Ordering::Relaxed) % n];
        self.ready_on(k, th);
    }

    pub(crate) fn ready_on(&self, k: &Kthread, th: ThreadRef) {
        th.transition(ThreadState::Sleeping, ThreadState::Runnable);
        self.enqueue(k, th);
    }

    /// Queue an already runnable thread on `k` and wake whoever should run it
    pub(crate) fn enqueue(&self, k: &Kthread, th: ThreadRef) {
        let mut rq = k.lock();
        let local = th
            .last_cpu()
            .is_none_or(|cpu| self.cpu_map.cores_have_affinity(cpu, k.curr_cpu()));
        k.stat(if local {
            StatCounter::LocalWakes
        } else {
            StatCounter::RemoteWakes
        });
        k.queue_ptrs().produced(1);
        if rq.push(th) == Placement::Overflowed {
            k.stat(StatCounter::RqOverflow);
        }
        let backlog = rq.total() > 1;
        drop(rq);
        self.kick(k, backlog);
    }

    /// Wake `k` if parked; with a backlog, also wake one parked helper
    fn kick(&self, k: &Kthread, backlog: bool) {
        // Pairs with the fence in `park`
        fence(Ordering::SeqCst);
        if k.is_parked() {
            self.orchestrator.wake(k.id());
        } else if backlog {
            if let Some(idle) = self.cores.iter().find(|c| c.is_parked()) {
                self.orchestrator.wake(idle.id());
            }
        }
    }

    // ---- the scheduling loop -----------------------------------------

    /// Pick the next thread for `me`, parking while there is none
    ///
    /// Entered on `me`'s runtime stack with its lock held (`rq`). Returns
    /// a thread marked running and installed as `me`'s current thread, or
    /// `None` once the scheduler is shut down.
    pub(crate) fn schedule<'a>(&'a self, me: &'a Kthread, mut rq: RqGuard<'a>) -> Option<ThreadRef> {
        kassert!(!me.is_parked(), "{} scheduling while parked", me.id());
        let start = now_ns();

        if let Some(prev) = me.take_current() {
            prev.clear_stack_busy();
        }
        me.stat(StatCounter::Reschedules);
        me.stats().add(StatCounter::ProgramNs, me.since_exit(start));
        me.rcu_enter_sched();

        let mut iters = 0u32;
        let mut poll_start = start;
        let th = loop {
            if !self.is_running() {
                drop(rq);
                me.stats()
                    .add(StatCounter::SchedNs, now_ns().saturating_sub(start));
                return None;
            }

            let now = now_ns();
            if let Some(th) = self.find_work(me, &mut rq, now) {
                break th;
            }

            iters += 1;
            let work_soon = self.softirq.work_soon(me.id(), now);
            if !me.preempt_pending()
                && self
                    .poll
                    .keep_polling(iters, now.saturating_sub(poll_start), work_soon)
            {
                // Let wakers and thieves at our queue between passes
                drop(rq);
                std::hint::spin_loop();
                rq = me.lock();
                continue;
            }

            rq = self.park(me, rq);
            iters = 0;
            poll_start = now_ns();
        };

        rq.drain_overflow();
        drop(rq);

        let end = now_ns();
        me.stats()
            .add(StatCounter::SchedNs, end.saturating_sub(start));
        me.mark_exit(end);
        me.rcu_enter_thread();
        self.prepare_run(me, th);
        Some(th)
    }

    /// One search pass; `rq` stays locked throughout
    fn find_work(&self, me: &Kthread, rq: &mut RunQueues, now: u64) -> Option<ThreadRef> {
        scope::reconcile(&self.scope, &self.cores, me, rq);

        if me.pmc_due(now, self.pmc_ns) {
            me.sample_depth(rq.total() as u32);
        }

        if !self.config.disable_watchdog && me.watchdog_due(now, self.watchdog_ns) {
            if let Some(th) = self.softirq_local(me) {
                return Some(th);
            }
        }

        rq.drain_overflow();
        if let Some(th) = Self::pop_local(me, rq) {
            return Some(th);
        }
        rq.reset_indices();

        if let Some(th) = self.softirq_local(me) {
            return Some(th);
        }

        if let Some(sib) = self.cpu_map.sibling_kthread(me.curr_cpu()) {
            if let Some(r) = self.cores.get(sib.as_usize()) {
                if self.steal(me, rq, r) {
                    if let Some(th) = Self::pop_local(me, rq) {
                        return Some(th);
                    }
                }
            }
        }

        let n = self.cores.len();
        let first = me.next_rand() as usize % n;
        for i in 0..n {
            let r = &self.cores[(first + i) % n];
            if self.steal(me, rq, r) {
                if let Some(th) = Self::pop_local(me, rq) {
                    return Some(th);
                }
            }
        }

        if let Some(th) = self.softirq_local(me) {
            return Some(th);
        }

        if rq.is_scoped() {
            if let Some(th) = Self::pop_low(me, rq) {
                return Some(th);
            }
            for i in 0..n {
                let r = &self.cores[(first + i) % n];
                if steal_work_lp(me, rq, r) {
                    if let Some(th) = Self::pop_low(me, rq) {
                        return Some(th);
                    }
                }
            }
        }

        None
    }

    #[inline]
    fn pop_local(me: &Kthread, rq: &mut RunQueues) -> Option<ThreadRef> {
        let th = rq.pop()?;
        me.queue_ptrs().consumed(1);
        Some(th)
    }

    #[inline]
    fn pop_low(me: &Kthread, rq: &mut RunQueues) -> Option<ThreadRef> {
        let th = rq.pop_low()?;
        me.queue_ptrs().consumed(1);
        Some(th)
    }

    #[inline]
    fn steal(&self, me: &Kthread, rq: &mut RunQueues, r: &Kthread) -> bool {
        steal_work(me, rq, r, &*self.softirq, self.config.softirq_remote_budget)
    }

    fn softirq_local(&self, me: &Kthread) -> Option<ThreadRef> {
        if !self.softirq.work_available(me.id()) {
            return None;
        }
        let th = self
            .softirq
            .run_one(me.id(), self.config.softirq_local_budget)?;
        me.stat(StatCounter::SoftirqsLocal);
        Some(th)
    }

    /// Could any core have something for an idle core scoped to `scope`
    /// to do?
    ///
    /// Secondary-ring work only counts on cores scoped to the same tag,
    /// the only ones `steal_work_lp` takes from.
    fn work_visible(&self, scope: StatusTag) -> bool {
        self.cores.iter().any(|c| {
            c.maybe_has_work()
                || self.softirq.work_available(c.id())
                || (!scope.is_none() && c.prioritized_hint() == scope && c.maybe_has_low_work())
        })
    }

    /// Release `rq`, block `me` until woken, and re-lock
    fn park<'a>(&'a self, me: &'a Kthread, rq: RqGuard<'a>) -> RqGuard<'a> {
        let voluntary = !me.preempt_pending();
        let scope = rq.prioritized();
        me.set_parked(true);
        drop(rq);

        // Pairs with the fence in `kick`: either the waker sees us parked
        // or we see its work here
        fence(Ordering::SeqCst);
        if voluntary && (self.work_visible(scope) || !self.is_running()) {
            me.set_parked(false);
            return me.lock();
        }

        me.stat(StatCounter::Parks);
        ktrace!("parking ({})", if voluntary { "idle" } else { "preempted" });
        self.orchestrator.notify_idle(me.id());
        self.orchestrator.block_until_woken(me.id(), voluntary);
        me.clear_preempt();
        self.note_cpu(me);

        let rq = me.lock();
        me.set_parked(false);
        rq
    }

    /// Record which physical CPU `me` is on now
    pub(crate) fn note_cpu(&self, me: &Kthread) {
        if let Some(cpu) = topology::current_cpu() {
            me.set_curr_cpu(cpu);
            self.cpu_map.set_recent_kthread(cpu, me.id());
        }
    }

    /// Mark `th` running on `me`; accounting for local/remote runs
    fn prepare_run(&self, me: &Kthread, th: ThreadRef) {
        let cpu = me.curr_cpu();
        let local = th
            .last_cpu()
            .is_none_or(|last| self.cpu_map.cores_have_affinity(last, cpu));
        me.stat(if local {
            StatCounter::LocalRuns
        } else {
            StatCounter::RemoteRuns
        });
        th.set_last_cpu(cpu);
        th.transition(ThreadState::Runnable, ThreadState::Running);
        th.wait_stack_idle();
        me.set_current(Some(th));
    }

    /// Fast path for `myth`, which is already queued (or sleeping) and
    /// has its stack marked busy
    pub(crate) fn enter_schedule(&self, me: &Kthread, myth: ThreadRef) -> Handoff {
        let now = now_ns();
        let mut rq = me.lock();
        scope::reconcile(&self.scope, &self.cores, me, &mut rq);

        if !self.is_running()
            || (!self.config.disable_watchdog && me.watchdog_expired(now, self.watchdog_ns))
        {
            return Handoff::Slow;
        }
        let Some(th) = Self::pop_local(me, &mut rq) else {
            return Handoff::Slow;
        };
        drop(rq);

        me.stat(StatCounter::Reschedules);
        me.stats().add(StatCounter::ProgramNs, me.since_exit(now));
        me.mark_exit(now_ns());
        me.rcu_quiesce();

        if th == myth {
            myth.clear_stack_busy();
            self.prepare_run(me, th);
            return Handoff::Same;
        }
        self.prepare_run(me, th);
        Handoff::Direct(th)
    }

    /// Switch bookkeeping for handing `me` straight to sleeping `th`
    pub(crate) fn hand_off(&self, me: &Kthread, th: ThreadRef) {
        let now = now_ns();
        me.stat(StatCounter::Reschedules);
        me.stats().add(StatCounter::ProgramNs, me.since_exit(now));
        me.mark_exit(now);
        me.rcu_quiesce();
        th.transition(ThreadState::Sleeping, ThreadState::Runnable);
        self.prepare_run(me, th);
    }

    // ---- runtime-stack actions ---------------------------------------

    /// `th` returned from its entry function
    pub(crate) fn finish_exit(&self, me: &Kthread, th: ThreadRef) {
        me.set_current(None);
        let main = th.is_main();
        ktrace!("{} exited", th.id());
        self.free_thread(th);
        if main {
            kdebug!("main thread exited");
            self.shutdown();
        }
    }

    /// `th` gave the core back: requeue it and park the core
    pub(crate) fn finish_cede(&self, me: &Kthread, th: ThreadRef) {
        me.set_current(None);
        th.transition(ThreadState::Running, ThreadState::Sleeping);
        th.clear_stack_busy();
        self.ready_on(me, th);

        me.rcu_enter_sched();
        me.set_parked(true);
        me.stat(StatCounter::Parks);
        self.orchestrator.notify_idle(me.id());
        self.orchestrator.block_until_woken(me.id(), false);
        me.clear_preempt();
        self.note_cpu(me);
        me.set_parked(false);
        me.rcu_enter_thread();
    }

    // ---- helpers for yielding threads --------------------------------

    /// Service one unit of local softirq work and queue its thread
    pub(crate) fn poll_local_softirq(&self, me: &Kthread) {
        if let Some(th) = self.softirq_local(me) {
            self.enqueue(me, th);
        }
    }

    /// Steal from one random core if it is parked, so work stranded
    /// there is not starved
    pub(crate) fn help_parked_core(&self, me: &Kthread) {
        let n = self.cores.len();
        if n < 2 {
            return;
        }
        let r = &self.cores[me.next_rand() as usize % n];
        if std::ptr::eq(r, me) || !r.is_parked() {
            return;
        }
        let mut rq = me.lock();
        self.steal(me, &mut rq, r);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let mut abandoned = 0usize;
        for k in self.cores.iter() {
            let threads = k.lock().drain_all();
            abandoned += threads.len();
            for th in threads {
                self.free_thread(th);
            }
        }
        if abandoned > 0 {
            kdebug!("freed {} threads still queued at shutdown", abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock, Weak};
    use std::time::Duration;

    /// Records orchestrator traffic; blocking shuts the scheduler down
    #[derive(Default)]
    struct Recorder {
        idle: Mutex<Vec<CoreId>>,
        woken: Mutex<Vec<CoreId>>,
        sched: OnceLock<Weak<Scheduler>>,
    }

    impl Orchestrator for Recorder {
        fn notify_idle(&self, core: CoreId) {
            self.idle.lock().unwrap().push(core);
        }

        fn block_until_woken(&self, _core: CoreId, _voluntary: bool) {
            if let Some(s) = self.sched.get().and_then(Weak::upgrade) {
                s.shutdown();
            }
        }

        fn wake(&self, core: CoreId) {
            self.woken.lock().unwrap().push(core);
        }
    }

    fn config(cores: usize) -> SchedulerConfig {
        SchedulerConfig::new()
            .num_cores(cores)
            .rq_capacity(8)
            .max_threads(64)
            .disable_watchdog(true)
    }

    fn build_with(config: SchedulerConfig, poll: PollPolicy) -> (Arc<Scheduler>, Arc<Recorder>) {
        let rec = Arc::new(Recorder::default());
        let cores = config.num_cores;
        let sched = Scheduler::builder(config)
            .orchestrator(rec.clone())
            .cpu_map(CpuMap::flat(cores))
            .poll_policy(poll)
            .build()
            .unwrap();
        rec.sched.set(Arc::downgrade(&sched)).unwrap();
        (sched, rec)
    }

    fn build(cores: usize) -> (Arc<Scheduler>, Arc<Recorder>) {
        build_with(config(cores), PollPolicy::park_immediately())
    }

    fn sleeping(tag: u32) -> ThreadRef {
        Thread::detached(StatusTag::new(tag))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Scheduler::new(config(0)).err().unwrap();
        assert!(matches!(err, SchedError::InvalidConfig(_)));
    }

    #[test]
    fn test_ready_rr_rotates() {
        let (s, _) = build(3);
        for _ in 0..6 {
            s.ready_rr(sleeping(0));
        }
        for k in s.cores() {
            assert_eq!(k.lock().len(), 2);
            assert_eq!(k.queue_ptrs().load(), (2, 0));
        }
    }

    #[test]
    fn test_ready_rr_skips_parked() {
        let (s, rec) = build(2);
        s.core(CoreId::new(1)).set_parked(true);
        let a = sleeping(0);
        let b = sleeping(0);
        s.ready_rr(a);
        s.ready_rr(b);
        assert_eq!(s.core(CoreId::new(0)).lock().len(), 2);
        // The second one made a backlog: the parked core is asked to help
        assert_eq!(*rec.woken.lock().unwrap(), vec![CoreId::new(1)]);
    }

    #[test]
    fn test_ready_on_parked_core_wakes_it() {
        let (s, rec) = build(2);
        let k1 = s.core(CoreId::new(1));
        k1.set_parked(true);

        let th = sleeping(0);
        let s2 = Arc::clone(&s);
        std::thread::spawn(move || s2.ready_on(s2.core(CoreId::new(1)), th))
            .join()
            .unwrap();

        assert_eq!(*rec.woken.lock().unwrap(), vec![CoreId::new(1)]);
        assert_eq!(k1.lock().pop(), Some(th));
        assert!(th.state().is_runnable());
    }

    #[test]
    fn test_all_parked_still_queues_and_wakes() {
        let (s, rec) = build(2);
        for k in s.cores() {
            k.set_parked(true);
        }
        s.ready_rr(sleeping(0));
        let total: u32 = s.cores().iter().map(|k| k.lock().len()).sum();
        assert_eq!(total, 1);
        assert_eq!(rec.woken.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_schedule_pops_local_fifo() {
        let (s, _) = build(1);
        let me = s.core(CoreId::new(0));
        me.rcu_start();
        let a = sleeping(0);
        let b = sleeping(0);
        s.ready_on(me, a);
        s.ready_on(me, b);

        assert_eq!(s.schedule(me, me.lock()), Some(a));
        assert_eq!(a.state(), ThreadState::Running);
        assert_eq!(me.current(), Some(a));
        assert_eq!(me.rcu_gen() % 2, 1);

        // The previous thread went back to sleep somewhere else
        a.set_state(ThreadState::Sleeping);
        assert_eq!(s.schedule(me, me.lock()), Some(b));
        assert_eq!(me.current(), Some(b));
        assert_eq!(me.queue_ptrs().load(), (2, 2));
        assert_eq!(s.stats(me.id()).get(StatCounter::Reschedules), 2);
    }

    #[test]
    fn test_schedule_steals_half() {
        let (s, _) = build(2);
        let me = s.core(CoreId::new(0));
        let other = s.core(CoreId::new(1));
        me.rcu_start();
        let ths: Vec<_> = (0..8).map(|_| sleeping(0)).collect();
        for th in &ths {
            s.ready_on(other, *th);
        }

        assert_eq!(s.schedule(me, me.lock()), Some(ths[0]));
        assert_eq!(me.lock().len(), 3);
        assert_eq!(other.lock().len(), 4);
        assert_eq!(s.stats(me.id()).get(StatCounter::ThreadsStolen), 4);
    }

    #[test]
    fn test_schedule_parks_when_idle() {
        let (s, rec) = build(2);
        let me = s.core(CoreId::new(0));
        me.rcu_start();

        // Recorder shuts the scheduler down from inside the park
        assert_eq!(s.schedule(me, me.lock()), None);
        assert_eq!(*rec.idle.lock().unwrap(), vec![CoreId::new(0)]);
        assert_eq!(s.stats(me.id()).get(StatCounter::Parks), 1);
        assert!(!me.is_parked());
        assert_eq!(me.rcu_gen() % 2, 0);
    }

    #[test]
    fn test_idle_core_parks_despite_foreign_scoped_work() {
        let (s, rec) = build(3);
        let me = s.core(CoreId::new(0));
        me.rcu_start();

        // Core 1 is still scoped to 5 after the scope ended elsewhere,
        // core 2 to a different tag; both hold only secondary-ring work
        for (core, tag) in [(1, 5), (2, 6)] {
            let k = s.core(CoreId::new(core));
            s.ready_on(k, sleeping(0));
            s.ready_on(k, sleeping(0));
            k.lock().build_scope(StatusTag::new(tag));
        }
        assert!(s.core(CoreId::new(1)).maybe_has_low_work());
        assert!(!s.core(CoreId::new(1)).maybe_has_work());

        assert_eq!(s.schedule(me, me.lock()), None);
        assert_eq!(*rec.idle.lock().unwrap(), vec![CoreId::new(0)]);
        assert_eq!(s.stats(me.id()).get(StatCounter::Parks), 1);
        assert_eq!(s.core(CoreId::new(1)).lock().low_len(), 2);
    }

    #[test]
    fn test_scoped_core_sees_same_tag_low_work() {
        let (s, _) = build(2);
        let me = s.core(CoreId::new(0));
        let other = s.core(CoreId::new(1));
        me.rcu_start();

        s.set_prioritized(StatusTag::new(5));
        s.ready_on(other, sleeping(0));
        s.ready_on(other, sleeping(0));
        other.lock().build_scope(StatusTag::new(5));

        // Nothing prioritized anywhere, so the low ring is stolen
        let th = s.schedule(me, me.lock()).unwrap();
        assert!(th.status().is_none());
        assert_eq!(s.stats(me.id()).get(StatCounter::Parks), 0);
        me.take_current();
        unsafe { th.free() };
    }

    #[test]
    fn test_stats_out_of_range_core() {
        let (s, _) = build(1);
        assert!(s.get_core(CoreId::new(4)).is_none());
        assert_eq!(s.stats(CoreId::new(4)), StatsSnapshot::default());
        s.request_preempt(CoreId::new(4));
    }

    #[test]
    fn test_schedule_runs_softirq_thread() {
        let rec = Arc::new(Recorder::default());
        let inject = Arc::new(crate::softirq::InjectQueue::new(1));
        let s = Scheduler::builder(config(1))
            .orchestrator(rec.clone())
            .softirq(inject.clone())
            .cpu_map(CpuMap::flat(1))
            .build()
            .unwrap();
        let me = s.core(CoreId::new(0));
        me.rcu_start();

        let th = sleeping(0);
        inject.inject(me.id(), th);
        assert_eq!(s.schedule(me, me.lock()), Some(th));
        assert_eq!(s.stats(me.id()).get(StatCounter::SoftirqsLocal), 1);
    }

    #[test]
    fn test_priority_isolation() {
        let (s, _) = build(2);
        let me = s.core(CoreId::new(0));
        let other = s.core(CoreId::new(1));
        me.rcu_start();

        let plain: Vec<_> = (0..2).map(|_| sleeping(0)).collect();
        let tagged: Vec<_> = (0..3).map(|_| sleeping(5)).collect();
        s.ready_on(other, plain[0]);
        for th in &tagged {
            s.ready_on(other, *th);
        }
        s.ready_on(other, plain[1]);

        s.set_prioritized(StatusTag::new(5));
        let mut order = Vec::new();
        for _ in 0..5 {
            order.push(s.schedule(me, me.lock()).unwrap());
        }
        // Every tagged thread runs before any untagged one
        assert!(order[..3].iter().all(|th| th.status() == StatusTag::new(5)));
        assert!(order[3..].iter().all(|th| th.status().is_none()));
        for th in &order {
            me.take_current();
            unsafe { th.free() };
        }
    }

    #[test]
    fn test_enter_schedule_outcomes() {
        let (s, _) = build(1);
        let me = s.core(CoreId::new(0));
        me.rcu_start();
        me.rcu_enter_sched();
        me.rcu_enter_thread();

        let myth = sleeping(0);
        myth.set_state(ThreadState::Running);
        me.set_current(Some(myth));

        // Empty queue: nothing to hand off to
        myth.mark_stack_busy();
        assert_eq!(s.enter_schedule(me, myth), Handoff::Slow);

        // Only the yielder itself is queued
        myth.transition(ThreadState::Running, ThreadState::Sleeping);
        s.ready_on(me, myth);
        let gen = me.rcu_gen();
        assert_eq!(s.enter_schedule(me, myth), Handoff::Same);
        assert_eq!(myth.state(), ThreadState::Running);
        assert!(!myth.stack_busy());
        assert_eq!(me.rcu_gen(), gen + 2);

        // Another thread is next
        let other = sleeping(0);
        s.ready_on(me, other);
        myth.mark_stack_busy();
        assert_eq!(s.enter_schedule(me, myth), Handoff::Direct(other));
        assert_eq!(other.state(), ThreadState::Running);
        assert_eq!(me.current(), Some(other));
    }

    #[test]
    fn test_enter_schedule_slow_after_shutdown() {
        let (s, _) = build(1);
        let me = s.core(CoreId::new(0));
        let myth = sleeping(0);
        s.ready_on(me, sleeping(0));
        s.shutdown();
        assert_eq!(s.enter_schedule(me, myth), Handoff::Slow);
        assert_eq!(me.lock().len(), 1);
        unsafe { myth.free() };
    }

    #[test]
    fn test_spawn_main_once() {
        let (s, _) = build(1);
        s.spawn_main(|| {}).unwrap();
        assert_eq!(s.spawn_main(|| {}), Err(SchedError::MainAlreadySpawned));
        assert_eq!(s.live_threads(), 1);
    }

    #[test]
    fn test_spawn_limit_rolls_back() {
        let (s, _) = build_with(config(1).max_threads(2), PollPolicy::park_immediately());
        s.spawn(|| {}).unwrap();
        s.spawn(|| {}).unwrap();
        assert!(matches!(
            s.spawn(|| {}),
            Err(SchedError::OutOfMemory(dpthread_core::MemoryError::TooManyThreads))
        ));
        assert_eq!(s.live_threads(), 2);
    }

    #[test]
    fn test_drop_frees_queued_threads() {
        let (s, _) = build(2);
        for _ in 0..4 {
            s.spawn(|| {}).unwrap();
        }
        assert_eq!(s.live_threads(), 4);
        drop(s);
    }

    #[test]
    fn test_request_preempt_forces_park() {
        // An hour of polling would be allowed, but preemption parks at once
        let (s, rec) = build_with(
            config(1),
            PollPolicy::new(u32::MAX, Duration::from_secs(3600)),
        );
        let me = s.core(CoreId::new(0));
        me.rcu_start();
        s.request_preempt(me.id());

        assert_eq!(s.schedule(me, me.lock()), None);
        assert_eq!(rec.idle.lock().unwrap().len(), 1);
        assert!(!me.preempt_pending());
    }
}
