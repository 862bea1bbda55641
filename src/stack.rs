//! Coroutine stack allocation.

/// Stack size for a coroutine, in bytes.
///
/// The default is 16 KiB, which is plenty for bodies that keep their deep
/// work in heap structures. Bodies with large stack frames can request more
/// via [`crate::Coroutine::with_stack_size`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StackSize(usize);

impl StackSize {
    /// 16 KiB.
    pub const DEFAULT: StackSize = StackSize(16 * 1024);

    /// A custom stack size. Clamped to a 4 KiB minimum.
    pub fn bytes(bytes: usize) -> Self {
        StackSize(bytes.max(4 * 1024))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for StackSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// ABI stack alignment on both supported targets.
const STACK_ALIGN: usize = 16;

/// Allocate a coroutine stack and locate its usable top.
///
/// Stacks grow downward, so the interesting address is the highest
/// `STACK_ALIGN`-multiple that still lies within the buffer; anything above
/// it is dead slack.
pub(crate) fn prepare_stack(size: StackSize) -> (Vec<u8>, usize) {
    let stack = vec![0u8; size.get()];
    let end = stack.as_ptr() as usize + size.get();
    let top = end / STACK_ALIGN * STACK_ALIGN;
    (stack, top)
}
