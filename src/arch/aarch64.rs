//! aarch64 implementation of context switching

use std::arch::asm;
use std::arch::naked_asm;

/// Saved CPU context for a coroutine.
///
/// Mirrors the x86_64 record: the resume address comes first, then the stack
/// and frame pointers, then the registers AAPCS64 makes the callee preserve
/// (x19-x28 and the low halves of v8-v15). Laid out so consecutive fields
/// form pairs for `stp`/`ldp`. 168 bytes, 8-byte aligned.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Resume address
    pc: u64,
    /// Stack pointer
    sp: u64,
    /// Frame pointer (x29)
    fp: u64,
    /// General purpose (callee-saved)
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    /// Floating-point/SIMD (callee-saved, lower 64 bits)
    d8: u64,
    d9: u64,
    d10: u64,
    d11: u64,
    d12: u64,
    d13: u64,
    d14: u64,
    d15: u64,
}

const _: () = assert!(size_of::<Context>() == 168);
const _: () = assert!(align_of::<Context>() == 8);

impl Context {
    /// Create a context that will begin executing `entry` on first switch-in.
    ///
    /// - `stack_top`: the top of the stack (highest address), 16-byte aligned
    /// - `entry`: the entry point function address; it must never return
    /// - `entry_arg`: pointer handed to the entry function via a
    ///   callee-saved register
    pub fn new(stack_top: usize, entry: usize, entry_arg: u64) -> Self {
        // The switch enters through the saved resume address with `br`, so
        // the fresh stack starts empty. AAPCS64 wants sp 16-byte aligned at
        // every public interface, which the aligned top already satisfies.
        Context {
            pc: entry as u64,
            sp: stack_top as u64,
            x28: entry_arg,
            ..Default::default()
        }
    }
}

/// Get the entry argument passed via callee-saved register.
///
/// Must be called at the start of the coroutine entry function, before any
/// call that may clobber x28.
pub fn entry_arg() -> u64 {
    let ptr: u64;
    unsafe {
        asm!(
            "mov {}, x28",
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
    // Arguments: x0 = old, x1 = new
    naked_asm!(
        // Save to the old context, two registers per store. The link
        // register is the resume point: jumping back through it lands just
        // after the call that brought us here.
        "mov x9, sp",
        "stp lr,  x9,  [x0, #0x00]", // pc, sp
        "stp fp,  x19, [x0, #0x10]",
        "stp x20, x21, [x0, #0x20]",
        "stp x22, x23, [x0, #0x30]",
        "stp x24, x25, [x0, #0x40]",
        "stp x26, x27, [x0, #0x50]",
        "str x28,      [x0, #0x60]",
        "stp d8,  d9,  [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Load the new context the same way.
        "ldp x10, x9,  [x1, #0x00]", // pc, sp
        "mov sp, x9",
        "ldp fp,  x19, [x1, #0x10]",
        "ldp x20, x21, [x1, #0x20]",
        "ldp x22, x23, [x1, #0x30]",
        "ldp x24, x25, [x1, #0x40]",
        "ldp x26, x27, [x1, #0x50]",
        "ldr x28,      [x1, #0x60]",
        "ldp d8,  d9,  [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        // Jump to the new context's resume point.
        // For a fresh coroutine: the entry function, on its own stack.
        // For a suspended one: just after its call to context_switch.
        "br x10",
    );
}
