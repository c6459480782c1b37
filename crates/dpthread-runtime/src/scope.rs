//! Process-wide priority scope
//!
//! While a scope is active, threads whose status tag equals the scope tag
//! run ahead of everything else on every core. Each core converges to the
//! scope lazily: whoever enters the scheduler next compares its run queues
//! against the current target and builds, updates or releases them, and
//! drags the other cores along with opportunistic `try_lock`s.

use crate::kthread::Kthread;
use crate::runqueue::RunQueues;
use dpthread_core::{kdebug, StatusTag};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct PriorityScope {
    active: AtomicBool,
    tag: AtomicU32,
}

impl PriorityScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or retarget) the scope; `StatusTag::NONE` ends it instead
    pub fn enter(&self, tag: StatusTag) {
        if tag.is_none() {
            self.exit();
            return;
        }
        self.tag.store(tag.as_u32(), Ordering::Relaxed);
        self.active.store(true, Ordering::Release);
    }

    pub fn exit(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Tag every core should converge to, `NONE` when inactive
    #[inline]
    pub fn target(&self) -> StatusTag {
        if self.active.load(Ordering::Acquire) {
            StatusTag::new(self.tag.load(Ordering::Relaxed))
        } else {
            StatusTag::NONE
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeOp {
    Build(StatusTag),
    Update(StatusTag),
    Release,
}

impl ScopeOp {
    fn between(current: StatusTag, target: StatusTag) -> Option<ScopeOp> {
        if current == target {
            None
        } else if target.is_none() {
            Some(ScopeOp::Release)
        } else if current.is_none() {
            Some(ScopeOp::Build(target))
        } else {
            Some(ScopeOp::Update(target))
        }
    }

    /// Whether a core currently at `current` is affected by this op
    fn applies_to(self, current: StatusTag) -> bool {
        match self {
            ScopeOp::Build(_) => current.is_none(),
            ScopeOp::Update(tag) => !current.is_none() && current != tag,
            ScopeOp::Release => !current.is_none(),
        }
    }

    fn apply(self, rq: &mut RunQueues) {
        match self {
            ScopeOp::Build(tag) => rq.build_scope(tag),
            ScopeOp::Update(tag) => rq.update_scope(tag),
            ScopeOp::Release => rq.release_scope(),
        }
    }
}

/// Bring `me` (whose queues are `my_rq`, locked) in line with `scope`
///
/// On a transition, every other core in the same situation is converted
/// too if its lock happens to be free. Returns whether `me` changed.
pub(crate) fn reconcile(
    scope: &PriorityScope,
    cores: &[Kthread],
    me: &Kthread,
    my_rq: &mut RunQueues,
) -> bool {
    let Some(op) = ScopeOp::between(my_rq.prioritized(), scope.target()) else {
        return false;
    };
    kdebug!("{}: priority scope {:?}", me.id(), op);

    for k in cores {
        if std::ptr::eq(k, me) {
            op.apply(my_rq);
            continue;
        }
        if !op.applies_to(k.prioritized_hint()) {
            continue;
        }
        if let Some(mut rq) = k.try_lock() {
            if op.applies_to(rq.prioritized()) {
                op.apply(&mut rq);
            }
        }
    }
    true
}
