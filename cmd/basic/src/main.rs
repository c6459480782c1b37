//! Basic dpthread example
//!
//! Spawns a handful of threads on a few cores, some of them tagged for a
//! priority scope, and prints the per-core counters at the end.
//!
//! # Environment Variables
//!
//! - `DPT_FLUSH_EPRINT=1` - Flush debug output immediately (useful for crash debugging)
//! - `DPT_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `DPT_NUM_CORES=N` - Number of kthreads

use dpthread::{kdebug, kinfo, spawn, spawn_tagged, yield_now, CoreId, Mutex, Runtime};
use dpthread::{SchedulerConfig, StatCounter, StatusTag, WaitGroup};
use std::sync::Arc;

// DPT_LOG_LEVEL=debug DPT_FLUSH_EPRINT=1 cargo run -p dpthread-basic
fn main() {
    println!("=== dpthread Basic Example ===\n");

    let config = SchedulerConfig::from_env().num_cores(4);
    config.print();

    let runtime = match Runtime::new(config) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };
    let sched = Arc::clone(runtime.scheduler());

    let urgent = StatusTag::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let o = Arc::clone(&order);
    let s = Arc::clone(&sched);

    let result = runtime.run(move || {
        kinfo!("main thread running");
        let wg = Arc::new(WaitGroup::new());

        // Ordinary threads
        for i in 1..=3 {
            let (wg, o) = (Arc::clone(&wg), Arc::clone(&o));
            wg.add(1);
            let id = spawn(move || {
                for j in 0..3 {
                    kdebug!("[normal {}] iteration {}", i, j);
                    yield_now();
                }
                o.lock().push(format!("normal-{}", i));
                wg.done();
            });
            match id {
                Ok(id) => println!("Spawned normal thread {} ({})", i, id),
                Err(e) => println!("Spawn failed: {}", e),
            }
        }

        // Tagged threads run ahead of the rest while the scope is active
        s.set_prioritized(urgent);
        for i in 1..=2 {
            let (wg, o) = (Arc::clone(&wg), Arc::clone(&o));
            wg.add(1);
            let id = spawn_tagged(urgent, move || {
                kdebug!("[urgent {}] running", i);
                yield_now();
                o.lock().push(format!("urgent-{}", i));
                wg.done();
            });
            if let Ok(id) = id {
                println!("Spawned urgent thread {} ({})", i, id);
            }
        }

        wg.wait();
        s.clear_prioritized();
        kinfo!("all threads finished");
    });

    if let Err(e) = result {
        eprintln!("runtime failed: {}", e);
        std::process::exit(1);
    }

    println!("\nCompletion order: {:?}", *order.lock());

    println!("\n=== Per-core counters ===");
    for i in 0..sched.num_cores() {
        let st = sched.stats(CoreId::from(i));
        println!(
            "core {}: reschedules={} stolen={} parks={} local_runs={} remote_runs={}",
            i,
            st.get(StatCounter::Reschedules),
            st.get(StatCounter::ThreadsStolen),
            st.get(StatCounter::Parks),
            st.get(StatCounter::LocalRuns),
            st.get(StatCounter::RemoteRuns),
        );
    }

    println!("\n=== Example Complete ===");
}
