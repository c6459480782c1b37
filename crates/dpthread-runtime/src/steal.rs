//! Work stealing between cores
//!
//! A thief already holds its own queue lock and only ever `try_lock`s the
//! victim, so two cores stealing from each other cannot deadlock; the
//! loser simply moves on to the next victim.

use crate::kthread::Kthread;
use crate::runqueue::{Placement, RunQueues};
use crate::softirq::SoftirqSource;
use dpthread_core::stats::StatCounter;
use dpthread_core::ktrace;

/// Move work from `remote` onto `local` (whose queues are `lrq`, locked)
///
/// Tries, in order: half of the victim's primary ring, one entry of its
/// overflow list, one unit of its softirq work. Returns whether anything
/// was moved.
pub(crate) fn steal_work(
    local: &Kthread,
    lrq: &mut RunQueues,
    remote: &Kthread,
    softirq: &dyn SoftirqSource,
    remote_budget: u32,
) -> bool {
    if std::ptr::eq(local, remote) {
        return false;
    }
    if !remote.maybe_has_work() && !softirq.work_available(remote.id()) {
        return false;
    }
    let Some(mut rrq) = remote.try_lock() else {
        return false;
    };

    if !rrq.is_empty() {
        let moved = rrq.steal_half_into(lrq);
        drop(rrq);
        remote.queue_ptrs().consumed(moved.taken);
        local.queue_ptrs().produced(moved.taken);
        local.stats().add(StatCounter::ThreadsStolen, moved.taken as u64);
        local.stats().add(StatCounter::RqOverflow, moved.overflowed as u64);
        ktrace!("stole {} from {}", moved.taken, remote.id());
        return true;
    }

    if let Some(th) = rrq.pop_overflow() {
        drop(rrq);
        remote.queue_ptrs().consumed(1);
        local.queue_ptrs().produced(1);
        local.stat(StatCounter::ThreadsStolen);
        if lrq.push(th) == Placement::Overflowed {
            local.stat(StatCounter::RqOverflow);
        }
        return true;
    }

    // Hold the victim's lock so its own softirq pass cannot race ours
    let stolen = softirq.run_one(remote.id(), remote_budget);
    drop(rrq);
    match stolen {
        Some(th) => {
            local.stat(StatCounter::SoftirqsStolen);
            local.queue_ptrs().produced(1);
            if lrq.push(th) == Placement::Overflowed {
                local.stat(StatCounter::RqOverflow);
            }
            true
        }
        None => false,
    }
}

/// Secondary-ring steal, for when no core has prioritized work
///
/// Only cores scoped to the same tag trade low-priority entries.
pub(crate) fn steal_work_lp(local: &Kthread, lrq: &mut RunQueues, remote: &Kthread) -> bool {
    if std::ptr::eq(local, remote) || !lrq.is_scoped() {
        return false;
    }
    if remote.prioritized_hint() != lrq.prioritized() || !remote.maybe_has_low_work() {
        return false;
    }
    let Some(mut rrq) = remote.try_lock() else {
        return false;
    };
    if rrq.prioritized() != lrq.prioritized() || rrq.low_len() == 0 {
        return false;
    }

    let moved = rrq.steal_half_low_into(lrq);
    drop(rrq);
    remote.queue_ptrs().consumed(moved.taken);
    local.queue_ptrs().produced(moved.taken);
    local.stats().add(StatCounter::ThreadsStolen, moved.taken as u64);
    local.stats().add(StatCounter::RqOverflow, moved.overflowed as u64);
    moved.taken > 0
}
