//! CPU topology map
//!
//! For every physical CPU: its hyperthread sibling, and which kthread most
//! recently ran there. Stealing tries the kthread on the sibling CPU first
//! since it shares caches with us.

use dpthread_core::{kdebug, kwarn, CoreId};
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};

struct CpuRecord {
    sibling: usize,
    recent_kthread: AtomicU32,
}

pub struct CpuMap {
    cpus: Box<[CpuRecord]>,
}

impl CpuMap {
    /// Build from explicit sibling pairs; `siblings[cpu]` may equal `cpu`
    pub fn from_siblings(siblings: Vec<usize>) -> Self {
        let n = siblings.len();
        let cpus = siblings
            .into_iter()
            .enumerate()
            .map(|(cpu, sib)| CpuRecord {
                sibling: if sib < n { sib } else { cpu },
                recent_kthread: AtomicU32::new(CoreId::NONE.as_u32()),
            })
            .collect();
        Self { cpus }
    }

    /// A map where no CPU has a sibling
    pub fn flat(ncpu: usize) -> Self {
        Self::from_siblings((0..ncpu).collect())
    }

    /// Read sibling information from sysfs, flat on any failure
    pub fn detect() -> Self {
        let ncpu = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let siblings: Vec<usize> = (0..ncpu)
            .map(|cpu| {
                let path = format!(
                    "/sys/devices/system/cpu/cpu{}/topology/thread_siblings_list",
                    cpu
                );
                match fs::read_to_string(&path) {
                    Ok(list) => {
                        let others: Vec<usize> =
                            parse_cpu_list(&list).into_iter().filter(|&c| c != cpu).collect();
                        if others.len() > 1 {
                            kwarn!("cpu{} has {} siblings, using the first", cpu, others.len());
                        }
                        others.first().copied().unwrap_or(cpu)
                    }
                    Err(_) => cpu,
                }
            })
            .collect();
        kdebug!("cpu topology: {} cpus, siblings {:?}", ncpu, siblings);
        Self::from_siblings(siblings)
    }

    #[inline]
    pub fn num_cpus(&self) -> usize {
        self.cpus.len()
    }

    #[inline]
    pub fn sibling(&self, cpu: usize) -> Option<usize> {
        self.cpus.get(cpu).map(|r| r.sibling)
    }

    /// Kthread that last ran on `cpu`
    #[inline]
    pub fn recent_kthread(&self, cpu: usize) -> Option<CoreId> {
        self.cpus
            .get(cpu)
            .and_then(|r| CoreId::new(r.recent_kthread.load(Ordering::Acquire)).to_option())
    }

    #[inline]
    pub fn set_recent_kthread(&self, cpu: usize, core: CoreId) {
        if let Some(r) = self.cpus.get(cpu) {
            r.recent_kthread.store(core.as_u32(), Ordering::Release);
        }
    }

    /// Kthread currently recorded on the sibling of `cpu`
    pub fn sibling_kthread(&self, cpu: usize) -> Option<CoreId> {
        let sib = self.sibling(cpu)?;
        if sib == cpu {
            return None;
        }
        self.recent_kthread(sib)
    }

    /// Same CPU, or hyperthread siblings
    #[inline]
    pub fn cores_have_affinity(&self, a: usize, b: usize) -> bool {
        a == b || self.sibling(a) == Some(b)
    }
}

/// Parse a sysfs CPU list such as `0,4` or `0-1,8-9`
pub fn parse_cpu_list(s: &str) -> Vec<usize> {
    let mut out = Vec::new();
    for part in s.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<usize>(), hi.trim().parse::<usize>()) {
                    out.extend(lo..=hi);
                }
            }
            None => {
                if let Ok(c) = part.trim().parse() {
                    out.push(c);
                }
            }
        }
    }
    out
}

/// CPU the calling OS thread is running on
pub fn current_cpu() -> Option<usize> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            let cpu = unsafe { libc::sched_getcpu() };
            (cpu >= 0).then_some(cpu as usize)
        } else {
            None
        }
    }
}
