//! Core parking mechanism
//!
//! Each core owns one parker. An `unpark` leaves a token behind, so a wake
//! that arrives before the core actually blocks is not lost: the next
//! `park` consumes the token and returns immediately.

use std::time::Duration;

/// Platform-specific sleep/wake for a single core
pub trait Parker: Send + Sync {
    /// Block until unparked or `timeout` expires
    ///
    /// Returns `true` if a wake token was consumed. Callers re-check for
    /// work regardless of the result.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Leave a wake token and wake the owner if it is blocked
    fn unpark(&self);
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParker as PlatformParker;
    } else {
        mod fallback;
        pub use fallback::CondvarParker as PlatformParker;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_timeout() {
        let p = PlatformParker::new();
        let start = Instant::now();
        assert!(!p.park(Some(Duration::from_millis(50))));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_early_unpark_is_kept() {
        let p = PlatformParker::new();
        p.unpark();
        let start = Instant::now();
        assert!(p.park(Some(Duration::from_secs(10))));
        assert!(start.elapsed() < Duration::from_secs(1));
        // The token is gone after one park
        assert!(!p.park(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_unpark_wakes_blocked() {
        let p = Arc::new(PlatformParker::new());
        let p2 = Arc::clone(&p);
        let handle = thread::spawn(move || p2.park(Some(Duration::from_secs(10))));

        thread::sleep(Duration::from_millis(50));
        p.unpark();
        assert!(handle.join().unwrap());
    }
}
