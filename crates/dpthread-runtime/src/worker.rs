//! Kthread management
//!
//! Each core is driven by one OS thread running `kthread_main`: ask the
//! scheduler for the next thread, switch to it, and when control comes
//! back to the runtime stack act on whatever the thread left behind.

use crate::clock::now_ns;
use crate::scheduler::Scheduler;
use crate::switch::{CoreContext, RuntimeAction};
use crate::tls;
use dpthread_core::{kdebug, kerror, kprint, kwarn, CoreId, SchedResult, WorkerError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The OS threads backing a scheduler's cores
pub struct KthreadPool {
    sched: Arc<Scheduler>,
    handles: Vec<JoinHandle<()>>,
}

impl KthreadPool {
    /// Spawn one kthread per core
    ///
    /// If any spawn fails the scheduler is shut down, the kthreads already
    /// started are joined, and the error is returned.
    pub fn start(sched: &Arc<Scheduler>) -> SchedResult<Self> {
        let n = sched.num_cores();
        let mut handles = Vec::with_capacity(n);

        for i in 0..n {
            let s = Arc::clone(sched);
            let spawned = thread::Builder::new()
                .name(format!("dpthread-k{}", i))
                .spawn(move || kthread_main(s, CoreId::from(i)));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    kerror!("failed to spawn kthread {}: {}", i, e);
                    sched.shutdown();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(WorkerError::SpawnFailed.into());
                }
            }
        }

        Ok(Self {
            sched: Arc::clone(sched),
            handles,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every kthread to leave its loop
    ///
    /// Returns once the scheduler has been shut down (normally by the main
    /// thread exiting). A kthread that panicked shuts the rest down too.
    pub fn join(self) -> SchedResult<()> {
        let mut panicked = false;
        for (i, handle) in self.handles.into_iter().enumerate() {
            if handle.join().is_err() {
                kerror!("kthread {} panicked", i);
                self.sched.shutdown();
                panicked = true;
            }
        }
        if panicked {
            return Err(WorkerError::Panicked.into());
        }
        Ok(())
    }
}

/// Bind the calling OS thread to `cpu`
fn pin_to_cpu(cpu: usize) -> Result<(), WorkerError> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            use nix::sched::{sched_setaffinity, CpuSet};
            use nix::unistd::Pid;

            let mut set = CpuSet::new();
            set.set(cpu).map_err(|_| WorkerError::AffinityFailed)?;
            sched_setaffinity(Pid::from_raw(0), &set).map_err(|_| WorkerError::AffinityFailed)
        } else {
            let _ = cpu;
            Err(WorkerError::AffinityFailed)
        }
    }
}

/// Body of the kthread for `core`
fn kthread_main(sched: Arc<Scheduler>, core: CoreId) {
    kprint::set_core_id(core.as_u32());

    if sched.config().pin_cores {
        let cpu = core.as_usize() % sched.cpu_map().num_cpus().max(1);
        if let Err(e) = pin_to_cpu(cpu) {
            kwarn!("could not pin to cpu {}: {}", cpu, e);
        }
    }

    // Boxed so the address handed to TLS stays put
    let ctx = Box::new(CoreContext::new(Arc::clone(&sched), core));
    tls::set_core_context(&ctx);
    let me = ctx.kthread();

    sched.note_cpu(me);
    sched.orchestrator().wait_to_attach(core);
    me.rcu_start();
    me.mark_exit(now_ns());
    kdebug!("started on cpu {}", me.curr_cpu());

    while let Some(th) = sched.schedule(me, me.lock()) {
        // Safety: we are on the kthread's own stack and `schedule` has
        // prepared `th` for this core
        unsafe { ctx.run(th) };

        match ctx.take_action() {
            RuntimeAction::Schedule => {}
            RuntimeAction::Exit(th) => sched.finish_exit(me, th),
            RuntimeAction::Cede(th) => sched.finish_cede(me, th),
        }
    }

    tls::clear_core_context();
    kdebug!("stopped");
    kprint::clear_core_id();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::ops;
    use crate::sync::{Mutex, WaitGroup};
    use crate::topology::CpuMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scheduler(cores: usize) -> Arc<Scheduler> {
        let config = SchedulerConfig::new()
            .num_cores(cores)
            .max_threads(256)
            .park_timeout(Duration::from_millis(10));
        Scheduler::builder(config)
            .cpu_map(CpuMap::flat(cores))
            .build()
            .unwrap()
    }

    #[test]
    fn test_main_exit_stops_pool() {
        let sched = scheduler(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        sched
            .spawn_main(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let pool = KthreadPool::start(&sched).unwrap();
        assert_eq!(pool.len(), 2);
        pool.join().unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!sched.is_running());
        assert_eq!(sched.live_threads(), 0);
    }

    #[test]
    fn test_spawn_yield_and_sync() {
        const THREADS: usize = 16;
        const ROUNDS: usize = 50;

        let sched = scheduler(3);
        let total = Arc::new(Mutex::new(0usize));
        let t = Arc::clone(&total);

        sched
            .spawn_main(move || {
                let wg = Arc::new(WaitGroup::new());
                wg.add(THREADS);
                for _ in 0..THREADS {
                    let wg = Arc::clone(&wg);
                    let t = Arc::clone(&t);
                    ops::spawn(move || {
                        for _ in 0..ROUNDS {
                            *t.lock() += 1;
                            ops::yield_now();
                        }
                        wg.done();
                    })
                    .unwrap();
                }
                wg.wait();
            })
            .unwrap();

        KthreadPool::start(&sched).unwrap().join().unwrap();

        assert_eq!(*total.lock(), THREADS * ROUNDS);
        let stats = sched.total_stats();
        assert!(stats.get(dpthread_core::StatCounter::Reschedules) > 0);
    }

    #[test]
    fn test_external_shutdown() {
        let sched = scheduler(2);
        let pool = KthreadPool::start(&sched).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        sched.shutdown();
        pool.join().unwrap();
    }
}
