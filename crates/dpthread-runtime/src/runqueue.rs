//! Per-core run queues
//!
//! Each core has two fixed-size rings and one unbounded intrusive overflow
//! list. Ring indices are free-running `u32` counters masked by the
//! capacity (always a power of two), so `head - tail` is the length even
//! across wrap-around.
//!
//! Outside a priority scope only ring 0 is used, through `head`/`tail`.
//! Inside a scope the roles are swapped instead of copied:
//!
//! ```text
//!              unscoped                    scoped(tag)
//! primary      ring 0 [tail..head)         ring 1 [tail..head)   tagged threads
//! secondary    -                           ring 0 [l_tail..l_head) everything else
//! overflow     spill from primary          spill from either
//! ```
//!
//! All methods require the owning core's lock; `RunQueues` lives inside
//! the kthread's `SpinLock`.

use crate::thread::ThreadRef;
use dpthread_core::{kassert, kbug, StatusTag};

/// Unbounded FIFO threaded through `Thread::next`; O(1) push and pop
#[derive(Default)]
pub struct OverflowList {
    head: Option<ThreadRef>,
    tail: Option<ThreadRef>,
    len: usize,
}

impl OverflowList {
    pub fn push_back(&mut self, th: ThreadRef) {
        th.set_link(None);
        match self.tail {
            Some(tail) => tail.set_link(Some(th)),
            None => self.head = Some(th),
        }
        self.tail = Some(th);
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<ThreadRef> {
        let th = self.head?;
        self.head = th.link();
        if self.head.is_none() {
            self.tail = None;
        }
        th.set_link(None);
        self.len -= 1;
        Some(th)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Where an enqueued thread ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Queued,
    Overflowed,
}

/// Result of moving threads between two cores' queues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Moved {
    /// Entries taken from the source ring
    pub taken: u32,
    /// Of those, entries that spilled into the destination's overflow
    pub overflowed: u32,
}

const BASE: usize = 0;
const HIGH: usize = 1;

/// The queues of one core
pub struct RunQueues {
    rings: [Box<[Option<ThreadRef>]>; 2],
    mask: u32,
    /// Ring currently serving as the primary queue (`BASE` or `HIGH`)
    primary: usize,
    head: u32,
    tail: u32,
    l_head: u32,
    l_tail: u32,
    overflow: OverflowList,
    /// Tag of the active scope on this core, `NONE` when unscoped
    prioritized: StatusTag,
}

impl RunQueues {
    /// `capacity` must be a power of two (checked by config validation)
    pub fn new(capacity: usize) -> Self {
        kassert!(capacity.is_power_of_two(), "run queue capacity {} not a power of two", capacity);
        Self {
            rings: [
                vec![None; capacity].into_boxed_slice(),
                vec![None; capacity].into_boxed_slice(),
            ],
            mask: capacity as u32 - 1,
            primary: BASE,
            head: 0,
            tail: 0,
            l_head: 0,
            l_tail: 0,
            overflow: OverflowList::default(),
            prioritized: StatusTag::NONE,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.mask + 1
    }

    /// Entries in the primary ring
    #[inline]
    pub fn len(&self) -> u32 {
        self.head.wrapping_sub(self.tail)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Entries in the secondary (low-priority) ring
    #[inline]
    pub fn low_len(&self) -> u32 {
        self.l_head.wrapping_sub(self.l_tail)
    }

    #[inline]
    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    /// Every thread held by this core's queues
    #[inline]
    pub fn total(&self) -> usize {
        self.len() as usize + self.low_len() as usize + self.overflow.len()
    }

    #[inline]
    pub fn prioritized(&self) -> StatusTag {
        self.prioritized
    }

    #[inline]
    pub fn is_scoped(&self) -> bool {
        !self.prioritized.is_none()
    }

    #[inline]
    fn has_room(&self) -> bool {
        self.len() < self.capacity()
    }

    #[inline]
    fn low_has_room(&self) -> bool {
        self.low_len() < self.capacity()
    }

    #[inline]
    fn slot(&mut self, ring: usize, idx: u32) -> &mut Option<ThreadRef> {
        let i = (idx & self.mask) as usize;
        &mut self.rings[ring][i]
    }

    fn push_primary(&mut self, th: ThreadRef) {
        let (ring, head) = (self.primary, self.head);
        *self.slot(ring, head) = Some(th);
        self.head = head.wrapping_add(1);
    }

    fn take_primary(&mut self) -> ThreadRef {
        let (ring, tail) = (self.primary, self.tail);
        let th = self.slot(ring, tail).take();
        self.tail = tail.wrapping_add(1);
        th.unwrap_or_else(|| kbug!("empty slot {} in primary ring", tail))
    }

    fn push_low(&mut self, th: ThreadRef) {
        let head = self.l_head;
        *self.slot(BASE, head) = Some(th);
        self.l_head = head.wrapping_add(1);
    }

    fn take_low(&mut self) -> ThreadRef {
        let tail = self.l_tail;
        let th = self.slot(BASE, tail).take();
        self.l_tail = tail.wrapping_add(1);
        th.unwrap_or_else(|| kbug!("empty slot {} in secondary ring", tail))
    }

    /// Append to the primary ring, or to overflow when it is full
    pub fn push(&mut self, th: ThreadRef) -> Placement {
        if self.has_room() {
            self.push_primary(th);
            Placement::Queued
        } else {
            self.overflow.push_back(th);
            Placement::Overflowed
        }
    }

    /// Append to the secondary ring, or to overflow when it is full
    fn push_low_or_overflow(&mut self, th: ThreadRef) {
        if self.low_has_room() {
            self.push_low(th);
        } else {
            self.overflow.push_back(th);
        }
    }

    /// Take the next runnable thread for this core
    ///
    /// Inside a scope, entries whose tag no longer matches the scope are
    /// demoted to the secondary ring (or overflow) on the way.
    pub fn pop(&mut self) -> Option<ThreadRef> {
        loop {
            if self.is_empty() {
                return None;
            }
            let th = self.take_primary();
            if self.is_scoped() && th.status() != self.prioritized {
                self.push_low_or_overflow(th);
                continue;
            }
            return Some(th);
        }
    }

    /// Take the next thread from the secondary ring (scoped cores only)
    pub fn pop_low(&mut self) -> Option<ThreadRef> {
        if self.low_len() == 0 {
            return None;
        }
        Some(self.take_low())
    }

    pub fn pop_overflow(&mut self) -> Option<ThreadRef> {
        self.overflow.pop_front()
    }

    /// Move overflow entries into the primary ring while it has room
    ///
    /// Returns how many were moved.
    pub fn drain_overflow(&mut self) -> u32 {
        let mut moved = 0;
        while self.has_room() {
            let Some(th) = self.overflow.pop_front() else {
                break;
            };
            self.push_primary(th);
            moved += 1;
        }
        moved
    }

    /// Rewind the primary indices once the ring is confirmed empty
    pub fn reset_indices(&mut self) {
        if !self.is_empty() {
            kbug!("resetting a non-empty run queue ({} entries)", self.len());
        }
        self.head = 0;
        self.tail = 0;
    }

    /// Move `ceil(len/2)` primary entries of `self` to the back of `dst`
    ///
    /// What does not fit in `dst`'s primary ring goes to its overflow.
    pub fn steal_half_into(&mut self, dst: &mut RunQueues) -> Moved {
        let avail = self.len();
        let take = avail.div_ceil(2);
        let mut moved = Moved::default();
        for _ in 0..take {
            let th = self.take_primary();
            if dst.push(th) == Placement::Overflowed {
                moved.overflowed += 1;
            }
            moved.taken += 1;
        }
        moved
    }

    /// Secondary-ring counterpart of `steal_half_into`
    pub fn steal_half_low_into(&mut self, dst: &mut RunQueues) -> Moved {
        let avail = self.low_len();
        let take = avail.div_ceil(2);
        let mut moved = Moved::default();
        for _ in 0..take {
            let th = self.take_low();
            if dst.low_has_room() {
                dst.push_low(th);
            } else {
                dst.overflow.push_back(th);
                moved.overflowed += 1;
            }
            moved.taken += 1;
        }
        moved
    }

    /// Unscoped -> scoped(`tag`): split the primary ring by tag
    ///
    /// Matching entries go to the high ring, the rest stay in ring 0 in
    /// order, then the index pairs trade places.
    pub fn build_scope(&mut self, tag: StatusTag) {
        kassert!(!self.is_scoped() && !tag.is_none());
        kassert!(self.primary == BASE && self.low_len() == 0);

        // The low indices briefly track the high ring while it fills
        self.l_head = 0;
        self.l_tail = 0;
        let n = self.len();
        for _ in 0..n {
            let th = self.take_primary();
            if th.status() == tag {
                let i = self.l_head;
                *self.slot(HIGH, i) = Some(th);
                self.l_head = i.wrapping_add(1);
            } else {
                self.push_primary(th);
            }
        }

        std::mem::swap(&mut self.head, &mut self.l_head);
        std::mem::swap(&mut self.tail, &mut self.l_tail);
        self.primary = HIGH;
        self.prioritized = tag;
    }

    /// Scoped(old) -> scoped(`tag`): promote newly matching low entries
    ///
    /// Primary entries still carrying the old tag are demoted lazily by
    /// `pop`.
    pub fn update_scope(&mut self, tag: StatusTag) {
        kassert!(self.is_scoped() && !tag.is_none());
        let n = self.low_len();
        for _ in 0..n {
            let th = self.take_low();
            if th.status() == tag {
                self.push(th);
            } else {
                self.push_low(th);
            }
        }
        self.prioritized = tag;
    }

    /// Scoped -> unscoped: fold the high ring back behind ring 0
    pub fn release_scope(&mut self) {
        kassert!(self.is_scoped() && self.primary == HIGH);
        while !self.is_empty() {
            let th = self.take_primary();
            self.push_low_or_overflow(th);
        }

        std::mem::swap(&mut self.head, &mut self.l_head);
        std::mem::swap(&mut self.tail, &mut self.l_tail);
        self.l_head = 0;
        self.l_tail = 0;
        self.primary = BASE;
        self.prioritized = StatusTag::NONE;
    }

    /// Remove every queued thread (primary, secondary, overflow)
    pub(crate) fn drain_all(&mut self) -> Vec<ThreadRef> {
        let mut out = Vec::with_capacity(self.total());
        while !self.is_empty() {
            out.push(self.take_primary());
        }
        while let Some(th) = self.pop_low() {
            out.push(th);
        }
        while let Some(th) = self.overflow.pop_front() {
            out.push(th);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Thread;
    use dpthread_core::StatusTag;

    fn threads(n: usize, tag: u32) -> Vec<ThreadRef> {
        (0..n).map(|_| Thread::detached(StatusTag::new(tag))).collect()
    }

    fn drain(rq: &mut RunQueues) -> Vec<ThreadRef> {
        std::iter::from_fn(|| rq.pop()).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut rq = RunQueues::new(32);
        let ts = threads(3, 0);
        for th in &ts {
            assert_eq!(rq.push(*th), Placement::Queued);
        }
        assert_eq!(drain(&mut rq), ts);
        assert!(rq.pop().is_none());
    }

    #[test]
    fn test_overflow_and_drain() {
        let mut rq = RunQueues::new(32);
        let ts = threads(33, 0);
        for th in &ts[..32] {
            assert_eq!(rq.push(*th), Placement::Queued);
        }
        assert_eq!(rq.push(ts[32]), Placement::Overflowed);
        assert_eq!(rq.len(), 32);
        assert_eq!(rq.overflow_len(), 1);

        assert_eq!(rq.pop(), Some(ts[0]));
        assert_eq!(rq.drain_overflow(), 1);
        assert_eq!(rq.overflow_len(), 0);

        let rest = drain(&mut rq);
        assert_eq!(rest.len(), 32);
        assert_eq!(rest.last(), Some(&ts[32]));
    }

    #[test]
    fn test_indices_wrap() {
        let mut rq = RunQueues::new(4);
        rq.head = u32::MAX - 1;
        rq.tail = u32::MAX - 1;
        let ts = threads(4, 0);
        for th in &ts {
            rq.push(*th);
        }
        assert_eq!(rq.len(), 4);
        assert_eq!(drain(&mut rq), ts);
        rq.reset_indices();
        assert_eq!((rq.head, rq.tail), (0, 0));
    }

    #[test]
    fn test_steal_half() {
        let mut remote = RunQueues::new(32);
        let mut local = RunQueues::new(32);
        let ts = threads(10, 0);
        for th in &ts {
            remote.push(*th);
        }

        let moved = remote.steal_half_into(&mut local);
        assert_eq!(moved, Moved { taken: 5, overflowed: 0 });
        assert_eq!(remote.len(), 5);
        assert_eq!(local.len(), 5);
        // Oldest entries move, in order
        assert_eq!(drain(&mut local), ts[..5].to_vec());
        assert_eq!(drain(&mut remote), ts[5..].to_vec());
    }

    #[test]
    fn test_steal_odd_rounds_up_and_spills() {
        let mut remote = RunQueues::new(4);
        let mut local = RunQueues::new(4);
        for th in threads(3, 0) {
            local.push(th);
        }
        for th in threads(3, 0) {
            remote.push(th);
        }

        let moved = remote.steal_half_into(&mut local);
        assert_eq!(moved, Moved { taken: 2, overflowed: 1 });
        assert_eq!(local.len(), 4);
        assert_eq!(local.overflow_len(), 1);
        assert_eq!(remote.len(), 1);
    }

    #[test]
    fn test_build_scope_partitions() {
        let mut rq = RunQueues::new(32);
        let hi = threads(3, 7);
        let lo = threads(2, 0);
        // interleave: lo0 hi0 hi1 lo1 hi2
        for th in [lo[0], hi[0], hi[1], lo[1], hi[2]] {
            rq.push(th);
        }

        rq.build_scope(StatusTag::new(7));
        assert!(rq.is_scoped());
        assert_eq!(rq.len(), 3);
        assert_eq!(rq.low_len(), 2);

        assert_eq!(drain(&mut rq), hi);
        assert_eq!(rq.pop_low(), Some(lo[0]));
        assert_eq!(rq.pop_low(), Some(lo[1]));
        assert_eq!(rq.pop_low(), None);
    }

    #[test]
    fn test_pop_demotes_stale_tags() {
        let mut rq = RunQueues::new(32);
        let ts = threads(2, 7);
        for th in &ts {
            rq.push(*th);
        }
        rq.build_scope(StatusTag::new(7));

        // Reclassified after the split
        ts[0].set_status(StatusTag::NONE);
        assert_eq!(rq.pop(), Some(ts[1]));
        assert_eq!(rq.low_len(), 1);
        assert_eq!(rq.pop_low(), Some(ts[0]));
    }

    #[test]
    fn test_update_scope_promotes() {
        let mut rq = RunQueues::new(32);
        let a = threads(2, 1);
        let b = threads(2, 2);
        for th in a.iter().chain(b.iter()) {
            rq.push(*th);
        }
        rq.build_scope(StatusTag::new(1));
        assert_eq!(rq.len(), 2);
        assert_eq!(rq.low_len(), 2);

        rq.update_scope(StatusTag::new(2));
        assert_eq!(rq.prioritized(), StatusTag::new(2));
        assert_eq!(rq.low_len(), 0);
        // Tag-1 entries are demoted as pop walks past them
        assert_eq!(drain(&mut rq), b);
        assert_eq!(rq.low_len(), 2);
    }

    #[test]
    fn test_release_scope_merges_back() {
        let mut rq = RunQueues::new(32);
        let hi = threads(2, 5);
        let lo = threads(2, 0);
        for th in [hi[0], lo[0], hi[1], lo[1]] {
            rq.push(th);
        }
        rq.build_scope(StatusTag::new(5));
        rq.release_scope();

        assert!(!rq.is_scoped());
        assert_eq!(rq.low_len(), 0);
        assert_eq!(drain(&mut rq), vec![lo[0], lo[1], hi[0], hi[1]]);
    }

    #[test]
    fn test_release_spills_when_base_is_full() {
        let mut rq = RunQueues::new(4);
        let hi = threads(2, 5);
        let lo = threads(4, 0);
        for th in hi.iter().chain(lo.iter()) {
            rq.push(*th);
        }
        // 2 hi + 2 lo in the ring, 2 lo in overflow
        rq.build_scope(StatusTag::new(5));
        assert_eq!(rq.len(), 2);
        assert_eq!(rq.low_len(), 2);

        rq.drain_overflow();
        // Primary had room for 2 more: overflow drained into the high ring
        assert_eq!(rq.len(), 4);

        rq.release_scope();
        assert_eq!(rq.total(), 6);
        assert_eq!(rq.len(), 4);
        assert_eq!(rq.overflow_len(), 2);
    }

    #[test]
    fn test_conservation_across_transitions() {
        let mut rq = RunQueues::new(8);
        for i in 0..20u32 {
            rq.push(Thread::detached(StatusTag::new(i % 3)));
        }
        assert_eq!(rq.total(), 20);
        rq.drain_overflow();
        rq.build_scope(StatusTag::new(1));
        assert_eq!(rq.total(), 20);
        rq.update_scope(StatusTag::new(2));
        assert_eq!(rq.total(), 20);
        rq.release_scope();
        assert_eq!(rq.total(), 20);
        assert_eq!(rq.drain_all().len(), 20);
        assert_eq!(rq.total(), 0);
    }
}
