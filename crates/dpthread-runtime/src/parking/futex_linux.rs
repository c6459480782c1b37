//! Linux futex-based core parking
//!
//! Futex word semantics:
//! - 0 = no wake token
//! - 1 = wake token pending

use super::Parker;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub struct FutexParker {
    futex: AtomicU32,
}

impl FutexParker {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
        }
    }
}

impl Default for FutexParker {
    fn default() -> Self {
        Self::new()
    }
}

impl Parker for FutexParker {
    fn park(&self, timeout: Option<Duration>) -> bool {
        if self.futex.swap(0, Ordering::AcqRel) == 1 {
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // FUTEX_WAIT: sleep only while the word is still 0
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                0u32,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }

        // Woken, timed out, interrupted or raced: the token decides
        self.futex.swap(0, Ordering::AcqRel) == 1
    }

    fn unpark(&self) {
        if self.futex.swap(1, Ordering::AcqRel) == 1 {
            return; // token already pending, owner will see it
        }
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}
