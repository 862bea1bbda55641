//! x86_64 implementation of context switching

use std::arch::asm;
use std::arch::naked_asm;

/// Saved CPU context for a coroutine.
///
/// `context_switch` is an ordinary function call from the compiler's point of
/// view, so on the System V ABI only the callee-saved registers plus the
/// instruction and stack pointers need to be preserved. 64 bytes, 8-byte
/// aligned.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Instruction pointer (resume address)
    rip: u64,
    /// Stack pointer
    rsp: u64,
    /// Frame pointer
    rbp: u64,
    /// General purpose (callee-saved)
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

const _: () = assert!(size_of::<Context>() == 64);
const _: () = assert!(align_of::<Context>() == 8);

impl Context {
    /// Create a context that will begin executing `entry` on first switch-in.
    ///
    /// - `stack_top`: the top of the stack (highest address), 16-byte aligned
    /// - `entry`: the entry point function address; it must never return
    /// - `entry_arg`: pointer handed to the entry function via a
    ///   callee-saved register
    pub fn new(stack_top: usize, entry: usize, entry_arg: u64) -> Self {
        // A fresh context is entered with `jmp`, not `call`, so nothing gets
        // pushed. System V expects RSP == 16n+8 at function entry; reserving
        // one machine word below the aligned top reproduces that.
        Context {
            rip: entry as u64,
            rsp: (stack_top - 8) as u64,
            r15: entry_arg,
            ..Default::default()
        }
    }
}

/// Get the entry argument passed via callee-saved register.
///
/// Must be called at the start of the coroutine entry function, before any
/// call that may clobber r15.
pub fn entry_arg() -> u64 {
    let ptr: u64;
    unsafe {
        asm!(
            "mov {}, r15",
            out(reg) ptr,
            options(nomem, nostack, preserves_flags)
        );
    }
    ptr
}

/// Switch from one context to another
///
/// Saves the current CPU state into `old` and restores state from `new`.
/// This function returns when another context switches back to `old`.
///
/// # Safety
/// Both pointers must be valid. The `new` context must have been properly
/// initialized (either by a previous `context_switch` or by `Context::new`)
/// and must have been captured on the current thread.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // Save the resume point and post-return stack pointer to the old
        // context (rdi). The return address of this call is the resume point.
        "mov rax, [rsp]",
        "mov [rdi + 0x00], rax",
        "lea rax, [rsp + 8]",
        "mov [rdi + 0x08], rax",
        // Save callee-saved registers
        "mov [rdi + 0x10], rbp",
        "mov [rdi + 0x18], rbx",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load callee-saved registers from the new context (rsi)
        "mov rsp, [rsi + 0x08]",
        "mov rbp, [rsi + 0x10]",
        "mov rbx, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        // Jump to the new context's resume point.
        // For a fresh coroutine: the entry function, on its own stack.
        // For a suspended one: just after its call to context_switch.
        "jmp qword ptr [rsi + 0x00]",
    );
}
