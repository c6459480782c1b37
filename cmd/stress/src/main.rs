//! Stress test - many dpthreads
//!
//! Spawns a large number of threads that yield and contend on a mutex,
//! then reports throughput and scheduler counters.
//!
//! Usage: stress [THREADS] [YIELDS]

use dpthread::{spawn, yield_now, Mutex, Runtime, SchedulerConfig, StatCounter, WaitGroup};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn main() {
    println!("=== dpthread Stress Test ===\n");

    let mut args = std::env::args().skip(1);
    let num_threads: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let yields: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(10);

    let config = SchedulerConfig::from_env().max_threads(num_threads + 1000);
    let cores = config.num_cores;

    let runtime = match Runtime::new(config) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };
    let sched = Arc::clone(runtime.scheduler());

    println!("Spawning {} threads on {} cores ({} yields each)...", num_threads, cores, yields);

    let completed = Arc::new(AtomicU64::new(0));
    let shared = Arc::new(Mutex::new(0u64));
    let c = Arc::clone(&completed);
    let m = Arc::clone(&shared);
    let start = Instant::now();

    let result = runtime.run(move || {
        let wg = Arc::new(WaitGroup::new());
        let spawn_start = Instant::now();

        for i in 0..num_threads {
            let (wg, c, m) = (Arc::clone(&wg), Arc::clone(&c), Arc::clone(&m));
            wg.add(1);
            let wg_task = Arc::clone(&wg);
            let spawned = spawn(move || {
                for _ in 0..yields {
                    yield_now();
                }
                *m.lock() += 1;
                c.fetch_add(1, Ordering::Relaxed);
                wg_task.done();
            });
            if let Err(e) = spawned {
                println!("\nSpawn {} failed: {}", i, e);
                wg.done();
                break;
            }
            if (i + 1) % 1000 == 0 {
                print!("\rSpawned: {}/{}", i + 1, num_threads);
            }
        }

        let spawn_time = spawn_start.elapsed();
        println!("\n\nSpawn time: {:?}", spawn_time);
        println!(
            "Spawn rate: {:.0} threads/sec",
            num_threads as f64 / spawn_time.as_secs_f64()
        );

        wg.wait();
    });

    if let Err(e) = result {
        eprintln!("runtime failed: {}", e);
        std::process::exit(1);
    }

    let total_time = start.elapsed();
    let stats = sched.total_stats();

    println!("\n=== Results ===");
    println!("Total threads:   {}", num_threads);
    println!("Completed:       {}", completed.load(Ordering::Relaxed));
    println!("Mutex count:     {}", *shared.lock());
    println!("Total time:      {:?}", total_time);
    println!(
        "Throughput:      {:.0} threads/sec",
        num_threads as f64 / total_time.as_secs_f64()
    );
    println!(
        "Switches:        {:.0}/sec",
        stats.get(StatCounter::Reschedules) as f64 / total_time.as_secs_f64()
    );
    println!("Stolen:          {}", stats.get(StatCounter::ThreadsStolen));
    println!("Overflowed:      {}", stats.get(StatCounter::RqOverflow));
    println!("Parks:           {}", stats.get(StatCounter::Parks));

    println!("\n=== Stress Test Complete ===");
}
