//! aarch64 context switching implementation
//!
//! AAPCS64 callee-saved state: x19-x28, fp, lr, sp and the low halves of
//! v8-v15.

use std::arch::naked_asm;

/// Callee-saved register file of a suspended context
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub sp: u64,       // 0x00
    pub pc: u64,       // 0x08
    pub x19_x28: [u64; 10], // 0x10..0x60
    pub fp: u64,       // 0x60
    pub lr: u64,       // 0x68
    pub d8_d15: [u64; 8],   // 0x70..0xb0
}

/// Seed a fresh context so that switching to it runs `entry_fn(entry_arg)`
///
/// # Safety
///
/// `stack_top` must be the highest address of a mapped, writable stack.
#[inline]
pub unsafe fn init_context(
    regs: &mut SavedRegs,
    stack_top: *mut u8,
    entry_fn: usize,
    entry_arg: usize,
) {
    let mut saved = SavedRegs {
        sp: ((stack_top as usize) & !0xF) as u64,
        pc: thread_entry_trampoline as usize as u64,
        ..SavedRegs::default()
    };
    saved.x19_x28[0] = entry_fn as u64;
    saved.x19_x28[1] = entry_arg as u64;
    *regs = saved;
}

/// First code a new thread runs; never returns
#[unsafe(naked)]
pub unsafe extern "C" fn thread_entry_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "bl {exit}",
        "brk #0",
        exit = sym crate::ops::exit_from_trampoline,
    );
}

/// Save the current context into `old_regs` and resume `new_regs`
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(
    _old_regs: *mut SavedRegs,
    _new_regs: *const SavedRegs,
) {
    naked_asm!(
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "adr x10, 1f",
        "str x10, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "stp x29, x30, [x0, #0x60]",
        "stp d8, d9, [x0, #0x70]",
        "stp d10, d11, [x0, #0x80]",
        "stp d12, d13, [x0, #0x90]",
        "stp d14, d15, [x0, #0xa0]",
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldr x10, [x1, #0x08]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldp x29, x30, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x70]",
        "ldp d10, d11, [x1, #0x80]",
        "ldp d12, d13, [x1, #0x90]",
        "ldp d14, d15, [x1, #0xa0]",
        "br x10",
        "1:",
        "ret",
    );
}

/// Like `context_switch`, but clears `*busy` once off the old stack
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch_release(
    _old_regs: *mut SavedRegs,
    _new_regs: *const SavedRegs,
    _busy: *const u8,
) {
    naked_asm!(
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "adr x10, 1f",
        "str x10, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "stp x29, x30, [x0, #0x60]",
        "stp d8, d9, [x0, #0x70]",
        "stp d10, d11, [x0, #0x80]",
        "stp d12, d13, [x0, #0x90]",
        "stp d14, d15, [x0, #0xa0]",
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldr x10, [x1, #0x08]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldp x29, x30, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x70]",
        "ldp d10, d11, [x1, #0x80]",
        "ldp d12, d13, [x1, #0x90]",
        "ldp d14, d15, [x1, #0xa0]",
        "stlrb wzr, [x2]",
        "br x10",
        "1:",
        "ret",
    );
}

/// Resume `new_regs` without saving anything
#[unsafe(naked)]
pub unsafe extern "C" fn context_jump(_new_regs: *const SavedRegs) -> ! {
    naked_asm!(
        "ldr x9, [x0, #0x00]",
        "mov sp, x9",
        "ldr x10, [x0, #0x08]",
        "ldp x19, x20, [x0, #0x10]",
        "ldp x21, x22, [x0, #0x20]",
        "ldp x23, x24, [x0, #0x30]",
        "ldp x25, x26, [x0, #0x40]",
        "ldp x27, x28, [x0, #0x50]",
        "ldp x29, x30, [x0, #0x60]",
        "ldp d8, d9, [x0, #0x70]",
        "ldp d10, d11, [x0, #0x80]",
        "ldp d12, d13, [x0, #0x90]",
        "ldp d14, d15, [x0, #0xa0]",
        "br x10",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_regs_layout() {
        assert_eq!(std::mem::size_of::<SavedRegs>(), 0xb0);
        assert_eq!(std::mem::offset_of!(SavedRegs, fp), 0x60);
        assert_eq!(std::mem::offset_of!(SavedRegs, d8_d15), 0x70);
    }
}
