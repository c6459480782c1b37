//! Unix stack mapping using mmap

use super::Stack;
use dpthread_core::error::{MemoryError, SchedResult};
use dpthread_core::kwarn;
use std::ptr::NonNull;

pub(super) fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}

/// Map `size` usable bytes with a `guard`-byte PROT_NONE region below
pub(super) fn map_stack(size: usize, guard: usize) -> SchedResult<Stack> {
    let len = size
        .checked_add(guard)
        .ok_or(MemoryError::StackMapFailed)?;

    // Stack pages are touched lazily, so don't reserve swap for all of them
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(MemoryError::StackMapFailed.into());
    }
    let base = NonNull::new(base as *mut u8).ok_or(MemoryError::StackMapFailed)?;

    let stack = Stack { base, len, guard };
    if guard > 0 {
        let ret = unsafe { libc::mprotect(base.as_ptr() as *mut libc::c_void, guard, libc::PROT_NONE) };
        if ret != 0 {
            // Dropping `stack` unmaps it
            return Err(MemoryError::GuardProtectFailed.into());
        }
    }
    Ok(stack)
}

pub(super) fn unmap_stack(stack: &mut Stack) {
    let ret = unsafe { libc::munmap(stack.base.as_ptr() as *mut libc::c_void, stack.len) };
    if ret != 0 {
        kwarn!(
            "munmap of stack at {:p} failed: {}",
            stack.base.as_ptr(),
            std::io::Error::last_os_error()
        );
    }
}
