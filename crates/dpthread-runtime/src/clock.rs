//! Monotonic time source for scheduler bookkeeping
//!
//! Nanoseconds since the first call in this process. Only differences are
//! meaningful (watchdog, poll window, run-time accounting).

use std::sync::OnceLock;
use std::time::Instant;

static START_INSTANT: OnceLock<Instant> = OnceLock::new();

#[inline]
pub fn now_ns() -> u64 {
    START_INSTANT.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let a = now_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = now_ns();
        assert!(b >= a + 1_000_000);
    }
}
