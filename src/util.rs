//! Fatal assertion support.
//!
//! Precondition violations (resuming a dead coroutine, awaiting outside a
//! coroutine, ...) are programming errors, not recoverable conditions. They
//! bypass the panic machinery entirely: a diagnostic goes to stderr and the
//! process aborts. Unwinding here would be wrong, because an assertion may
//! fire on a coroutine stack where a panic would be captured and surfaced as
//! an ordinary user error at the resumer.

/// Report a violated precondition and abort the process.
///
/// Callers on the public API surface are `#[track_caller]` themselves, so the
/// reported location points at the offending user call site.
#[track_caller]
#[cold]
pub(crate) fn assertion_failed(what: &str) -> ! {
    let loc = std::panic::Location::caller();
    eprintln!(
        "{}:{}:{}: assertion failed: {}",
        loc.file(),
        loc.line(),
        loc.column(),
        what
    );
    std::process::abort();
}
