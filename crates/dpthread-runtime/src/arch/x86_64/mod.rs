//! x86_64 context switching implementation
//!
//! Only the callee-saved registers of the System V ABI are switched; every
//! switch is a plain function call from the compiler's point of view.

use std::arch::naked_asm;

/// Callee-saved register file of a suspended context
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SavedRegs {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
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
    // The trampoline is entered by jmp, so its `call` must see a 16-byte
    // aligned rsp for the callee to get the ABI's rsp % 16 == 8.
    let aligned_sp = (stack_top as usize) & !0xF;

    *regs = SavedRegs {
        rsp: aligned_sp as u64,
        rip: thread_entry_trampoline as usize as u64,
        rbx: 0,
        rbp: 0,
        r12: entry_fn as u64,
        r13: entry_arg as u64,
        r14: 0,
        r15: 0,
    };
}

/// First code a new thread runs; never returns
#[unsafe(naked)]
pub unsafe extern "C" fn thread_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "call {exit}",
        "ud2",
        exit = sym crate::ops::exit_from_trampoline,
    );
}

/// Save the current context into `old_regs` and resume `new_regs`
///
/// Returns when some other context switches back to `old_regs`.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(
    _old_regs: *mut SavedRegs,
    _new_regs: *const SavedRegs,
) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        "1:",
        "ret",
    );
}

/// Like `context_switch`, but clears `*busy` once off the old stack
///
/// The store happens after the new stack pointer is loaded, so a core
/// spinning on `busy` can only resume the old context after nothing here
/// touches the old stack any more.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch_release(
    _old_regs: *mut SavedRegs,
    _new_regs: *const SavedRegs,
    _busy: *const u8,
) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "mov byte ptr [rdx], 0",
        "jmp rax",
        "1:",
        "ret",
    );
}

/// Resume `new_regs` without saving anything
#[unsafe(naked)]
pub unsafe extern "C" fn context_jump(_new_regs: *const SavedRegs) -> ! {
    naked_asm!(
        "mov rsp, [rdi + 0x00]",
        "mov rax, [rdi + 0x08]",
        "mov rbx, [rdi + 0x10]",
        "mov rbp, [rdi + 0x18]",
        "mov r12, [rdi + 0x20]",
        "mov r13, [rdi + 0x28]",
        "mov r14, [rdi + 0x30]",
        "mov r15, [rdi + 0x38]",
        "jmp rax",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_regs_layout() {
        assert_eq!(std::mem::size_of::<SavedRegs>(), 0x40);
        assert_eq!(std::mem::offset_of!(SavedRegs, r15), 0x38);
    }

    #[test]
    fn test_init_context_alignment() {
        let mut regs = SavedRegs::default();
        let fake_top = 0x1000_0007usize as *mut u8;
        unsafe { init_context(&mut regs, fake_top, 0xAA, 0xBB) };
        assert_eq!(regs.rsp % 16, 0);
        assert!(regs.rsp <= 0x1000_0007);
        assert_eq!(regs.r12, 0xAA);
        assert_eq!(regs.r13, 0xBB);
        assert_eq!(regs.rip, thread_entry_trampoline as usize as u64);
    }
}
