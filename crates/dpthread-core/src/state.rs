//! Thread state and status tag types

use core::fmt;

use crate::constants::STATUS_NONE;

/// Lifecycle state of a green thread
///
/// ```text
///   spawn ──► Sleeping ──ready──► Runnable ──pop/handoff──► Running
///                ▲                                            │
///                └──────────── park / yield / cede ◄──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Executing on a core
    Running = 0,

    /// On some core's run queue (or being moved between cores)
    Runnable = 1,

    /// Off every queue, waiting for someone to call `ready`
    Sleeping = 2,
}

impl ThreadState {
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, ThreadState::Runnable)
    }
}

impl From<u8> for ThreadState {
    fn from(v: u8) -> Self {
        match v {
            0 => ThreadState::Running,
            1 => ThreadState::Runnable,
            _ => ThreadState::Sleeping,
        }
    }
}

impl From<ThreadState> for u8 {
    fn from(state: ThreadState) -> u8 {
        state as u8
    }
}

/// Classification tag attached to a thread
///
/// Tag 0 marks ordinary threads. While a priority scope is active for a
/// tag, threads carrying that tag are served before everything else on
/// every core.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct StatusTag(u32);

impl StatusTag {
    /// Ordinary threads; also the "no scope" marker on a core
    pub const NONE: StatusTag = StatusTag(STATUS_NONE);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        StatusTag(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == STATUS_NONE
    }
}

impl From<u32> for StatusTag {
    #[inline]
    fn from(raw: u32) -> Self {
        StatusTag(raw)
    }
}

impl fmt::Debug for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "StatusTag(NONE)")
        } else {
            write!(f, "StatusTag({})", self.0)
        }
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
