//! Stackful coroutines with bidirectional value exchange.
//!
//! A [`Coroutine<R, A>`] owns a dedicated stack and a body closure. Each
//! [`resume`](Coroutine::resume) hands the coroutine one `A` and runs it until
//! it either suspends through its [`Yielder`] (producing an `R`) or returns
//! (producing its final `R`). A panic inside the body is carried across the
//! switch and re-raised at the matching `resume`; a [`kill`](Coroutine::kill)
//! unwinds the coroutine's stack through a sentinel that cannot be swallowed.
//!
//! # Example
//!
//! ```
//! use coio::Coroutine;
//!
//! let mut doubler: Coroutine<i32, i32> = Coroutine::new(|yielder, mut n| {
//!     for _ in 0..3 {
//!         n = yielder.suspend(n * 2);
//!     }
//!     n * 2
//! });
//!
//! assert_eq!(doubler.resume(1), 2);
//! assert_eq!(doubler.resume(10), 20);
//! assert_eq!(doubler.resume(100), 200);
//! assert_eq!(doubler.resume(1000), 2000);
//! assert!(doubler.is_dead());
//! ```

use crate::arch::{Context, context_switch, entry_arg};
use crate::stack::{StackSize, prepare_stack};
use crate::util::assertion_failed;
use std::any::{Any, TypeId};
use std::cell::Cell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::trace;

/// Liveness state of a coroutine. Transitions are monotonic:
/// `Run -> Finish` when the body returns, `Run -> Error` when it panics or
/// is killed. A coroutine never leaves a terminal state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Run,
    Finish,
    Error,
}

/// Identity of the coroutine currently holding the CPU on this thread,
/// plus a type-erased way to suspend it in place (only unit-signature
/// coroutines can be suspended by library code; see [`suspend_current`]).
#[derive(Clone, Copy)]
struct CurrentEntry {
    id: *const (),
    suspend: Option<unsafe fn(*const ())>,
}

thread_local! {
    static CURRENT: Cell<Option<CurrentEntry>> = const { Cell::new(None) };
}

fn current_id() -> Option<*const ()> {
    CURRENT.get().map(|entry| entry.id)
}

/// Cancellation sentinel delivered at the next suspension point of a killed
/// coroutine.
///
/// The sentinel unwinds the coroutine's stack and is consumed at the entry
/// trampoline. If user code intercepts the unwind (`catch_unwind` inside the
/// body) and drops the payload without completing the kill, the drop raises
/// an equivalent sentinel again, so a kill cannot be swallowed inadvertently.
#[derive(Debug, Error)]
#[error("coroutine killed")]
struct KillSignal {
    handled: Cell<bool>,
}

impl KillSignal {
    fn new() -> Self {
        KillSignal {
            handled: Cell::new(false),
        }
    }

    fn mark_handled(&self) {
        self.handled.set(true);
    }
}

impl Drop for KillSignal {
    fn drop(&mut self) {
        if !self.handled.get() && !std::thread::panicking() {
            panic::panic_any(KillSignal::new());
        }
    }
}

type Body<R, A> = Box<dyn FnOnce(&Yielder<R, A>, A) -> R + 'static>;

/// Heap-pinned coroutine state. The entry trampoline and suspended resume
/// frames keep raw pointers to this, so it must never move; the public
/// handle owns it through a `Box`.
struct Inner<R: 'static, A: 'static> {
    /// The coroutine's own saved context.
    ctx: Context,
    /// Saved context of whoever most recently resumed it.
    ret_ctx: Context,
    state: State,
    /// Caller -> coroutine exchange cell.
    arg: Option<A>,
    /// Coroutine -> caller exchange cell.
    ret: Option<R>,
    /// Panic payload carried across the switch, re-raised at the resumer.
    panic: Option<Box<dyn Any + Send>>,
    /// The user body; taken at first entry.
    body: Option<Body<R, A>>,
    /// Keep stack alive
    _stack: Vec<u8>,
    /// The saved context points into the stack; neither may cross threads.
    _not_send: PhantomData<*mut ()>,
}

impl<R: 'static, A: 'static> Inner<R, A> {
    /// Suspend the coroutine, handing `ret` to the resumer. Returns the
    /// argument of the next resume.
    ///
    /// # Safety
    /// Must execute on this coroutine's own stack.
    unsafe fn yield_value(&mut self, ret: R) -> A {
        self.ret = Some(ret);
        unsafe { context_switch(&mut self.ctx, &self.ret_ctx) };
        // Back from suspension. A kill arrives as the error state, set by
        // the killer before switching in.
        if self.state == State::Error {
            panic::panic_any(KillSignal::new());
        }
        self.arg
            .take()
            .unwrap_or_else(|| assertion_failed("coroutine resumed without an argument"))
    }
}

/// Suspension shim for unit-signature coroutines, stored type-erased in the
/// current-coroutine record. The cast is sound because the shim is only
/// installed when the coroutine's signature is `() -> ()`.
unsafe fn suspend_unit(inner: *const ()) {
    let inner = inner as *mut Inner<(), ()>;
    unsafe {
        (*inner).yield_value(());
    }
}

fn unit_suspend_shim<R: 'static, A: 'static>() -> Option<unsafe fn(*const ())> {
    if TypeId::of::<(R, A)>() == TypeId::of::<((), ())>() {
        Some(suspend_unit)
    } else {
        None
    }
}

/// Switch into a suspended coroutine, maintaining the thread-local
/// current-coroutine record around the switch so that nesting balances.
///
/// # Safety
/// `inner` must be valid, suspended, and owned by the current thread.
unsafe fn switch_into<R: 'static, A: 'static>(inner: *mut Inner<R, A>) {
    let entry = CurrentEntry {
        id: inner as *const (),
        suspend: unit_suspend_shim::<R, A>(),
    };
    let prev = CURRENT.replace(Some(entry));
    unsafe { context_switch(&mut (*inner).ret_ctx, &(*inner).ctx) };
    CURRENT.set(prev);
}

/// Suspend the coroutine currently running on this thread, yielding `()` to
/// its resumer. Used by the future layer to park an awaiting coroutine.
#[track_caller]
pub(crate) fn suspend_current() {
    let Some(entry) = CURRENT.get() else {
        assertion_failed("attempt to suspend outside a coroutine");
    };
    let Some(suspend) = entry.suspend else {
        assertion_failed("attempt to suspend a coroutine with a non-unit signature");
    };
    unsafe { suspend(entry.id) };
}

/// Entry trampoline for new coroutines.
///
/// The pointer to the coroutine's state is passed via a callee-saved
/// register. Runs the body, records its outcome, and hands control back for
/// the last time. Never returns.
unsafe extern "C" fn coroutine_entry<R: 'static, A: 'static>() {
    let inner = entry_arg() as *mut Inner<R, A>;

    unsafe {
        // A coroutine killed before its first resume skips the body; the
        // closure and its captures are dropped with the coroutine itself.
        if (*inner).state == State::Run {
            let body = (*inner)
                .body
                .take()
                .unwrap_or_else(|| assertion_failed("coroutine entered twice"));
            let arg = (*inner)
                .arg
                .take()
                .unwrap_or_else(|| assertion_failed("coroutine entered without an argument"));
            let yielder = Yielder { inner };

            match panic::catch_unwind(AssertUnwindSafe(move || body(&yielder, arg))) {
                Ok(ret) => {
                    (*inner).ret = Some(ret);
                    (*inner).state = State::Finish;
                }
                Err(payload) => {
                    if (*inner).state == State::Error {
                        // Kill delivery: the sentinel unwound the whole body.
                        // Consume it here; control goes back to kill().
                        if let Ok(kill) = payload.downcast::<KillSignal>() {
                            kill.mark_handled();
                        }
                    } else {
                        // User panic: carry the payload across the switch for
                        // rethrow at the matching resume.
                        (*inner).state = State::Error;
                        (*inner).panic = Some(payload);
                    }
                }
            }
        }

        // The coroutine is dead; nothing may switch in again. resume() and
        // kill() both refuse dead coroutines, so coming back here is a bug.
        loop {
            context_switch(&mut (*inner).ctx, &(*inner).ret_ctx);
            assertion_failed("coroutine entrypoint return trap");
        }
    }
}

/// The coroutine-side handle for suspending. Passed by reference to the body;
/// it cannot outlive the coroutine it belongs to.
pub struct Yielder<R: 'static, A: 'static = ()> {
    inner: *mut Inner<R, A>,
}

impl<R: 'static, A: 'static> Yielder<R, A> {
    /// Suspend the calling coroutine, handing `ret` to its resumer. Returns
    /// the argument of the next [`Coroutine::resume`].
    ///
    /// If the coroutine was killed while suspended, the kill sentinel is
    /// raised here and unwinds the body.
    #[track_caller]
    pub fn suspend(&self, ret: R) -> A {
        if current_id() != Some(self.inner as *const ()) {
            assertion_failed("attempt to yield a coroutine that is not current");
        }
        unsafe { (*self.inner).yield_value(ret) }
    }
}

/// A stackful coroutine with body signature `(A) -> R`, yielding `R` at each
/// suspension and receiving `A` at each resume.
///
/// Unit signatures collapse naturally: `Coroutine<R>` is a generator of `R`,
/// `Coroutine<(), A>` a consumer of `A`, `Coroutine<(), ()>` a plain
/// cooperative task.
///
/// The handle is movable (the stack and saved contexts live behind a stable
/// heap allocation) but not clonable, and never leaves its thread. Dropping
/// a live coroutine kills it, unwinding its stack exactly once.
pub struct Coroutine<R: 'static, A: 'static = ()> {
    inner: Box<Inner<R, A>>,
}

impl<R: 'static, A: 'static> Coroutine<R, A> {
    /// Create a coroutine with the default stack size.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&Yielder<R, A>, A) -> R + 'static,
    {
        Self::with_stack_size(StackSize::default(), body)
    }

    /// Create a coroutine with an explicit stack size.
    pub fn with_stack_size<F>(size: StackSize, body: F) -> Self
    where
        F: FnOnce(&Yielder<R, A>, A) -> R + 'static,
    {
        let (stack, stack_top) = prepare_stack(size);

        let mut inner = Box::new(Inner {
            ctx: Context::default(),
            ret_ctx: Context::default(),
            state: State::Run,
            arg: None,
            ret: None,
            panic: None,
            body: Some(Box::new(body)),
            _stack: stack,
            _not_send: PhantomData,
        });

        let inner_ptr: *mut Inner<R, A> = &mut *inner;
        inner.ctx = Context::new(
            stack_top,
            coroutine_entry::<R, A> as usize,
            inner_ptr as u64,
        );

        trace!(stack_bytes = size.get(), "coroutine created");
        Coroutine { inner }
    }

    /// Transfer control into the coroutine, handing it `arg`.
    ///
    /// Returns the value of its next suspension, or its final return value
    /// (after which [`is_dead`](Self::is_dead) reports true). A panic from
    /// the body is re-raised here with its original payload.
    ///
    /// Fatal if called from inside this coroutine or when it is dead.
    #[track_caller]
    pub fn resume(&mut self, arg: A) -> R {
        let inner: *mut Inner<R, A> = &mut *self.inner;

        if current_id() == Some(inner as *const ()) {
            assertion_failed("attempt to resume current coroutine");
        }

        unsafe {
            if (*inner).state != State::Run {
                assertion_failed("attempt to resume dead coroutine");
            }

            (*inner).arg = Some(arg);
            switch_into(inner);

            if (*inner).state == State::Error {
                let payload = (*inner)
                    .panic
                    .take()
                    .unwrap_or_else(|| assertion_failed("coroutine failed without a payload"));
                panic::resume_unwind(payload);
            }

            (*inner)
                .ret
                .take()
                .unwrap_or_else(|| assertion_failed("coroutine suspended without a value"))
        }
    }

    /// True once the coroutine has finished, failed, or been killed.
    pub fn is_dead(&self) -> bool {
        self.inner.state != State::Run
    }

    /// Cancel a live coroutine from outside.
    ///
    /// The coroutine observes the kill as a sentinel raised at its pending
    /// suspension point; the sentinel unwinds its stack (running destructors)
    /// and is consumed before `kill` returns. A coroutine that was never
    /// resumed is torn down without running its body.
    ///
    /// Fatal if called from inside this coroutine or when it is dead.
    #[track_caller]
    pub fn kill(&mut self) {
        let inner: *mut Inner<R, A> = &mut *self.inner;

        if current_id() == Some(inner as *const ()) {
            assertion_failed("attempt to kill current coroutine");
        }

        unsafe {
            if (*inner).state != State::Run {
                assertion_failed("attempt to kill dead coroutine");
            }

            trace!("coroutine kill");
            (*inner).state = State::Error;
            switch_into(inner);
        }
        // The sentinel was consumed at the entry trampoline; unlike a body
        // panic there is nothing to re-raise on this side.
    }
}

impl<R: 'static, A: 'static> Drop for Coroutine<R, A> {
    fn drop(&mut self) {
        // Skip the kill when the thread is already unwinding: raising the
        // sentinel on the coroutine stack would count as a second panic and
        // abort the process.
        if !self.is_dead() && !std::thread::panicking() {
            self.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn yields_values_in_order() {
        let mut cor: Coroutine<i32, i32> = Coroutine::new(|yielder, input| {
            assert_eq!(input, 100);
            let mut input = input;
            for i in 0..5 {
                input = yielder.suspend(i);
                assert_eq!(input, 100 + i + 1);
            }
            99
        });

        assert_eq!(cor.resume(100), 0);
        assert_eq!(cor.resume(101), 1);
        assert_eq!(cor.resume(102), 2);
        assert_eq!(cor.resume(103), 3);
        assert_eq!(cor.resume(104), 4);
        assert!(!cor.is_dead());

        assert_eq!(cor.resume(105), 99);
        assert!(cor.is_dead());
    }

    #[test]
    fn unit_signatures_collapse() {
        let mut r#gen: Coroutine<u64> = Coroutine::new(|yielder, ()| {
            yielder.suspend(1);
            yielder.suspend(2);
            3
        });

        assert_eq!(r#gen.resume(()), 1);
        assert_eq!(r#gen.resume(()), 2);
        assert_eq!(r#gen.resume(()), 3);
        assert!(r#gen.is_dead());
    }

    #[test]
    fn current_coroutine_balances_across_nesting() {
        assert_eq!(current_id(), None);

        let mut outer: Coroutine<u32> = Coroutine::new(|yielder, ()| {
            let outer_id = current_id().unwrap();

            let mut nested: Coroutine<u32> = Coroutine::new(|yielder, ()| {
                yielder.suspend(10);
                20
            });

            // Resuming a nested coroutine swaps the current record and
            // restores it afterwards.
            let first = nested.resume(());
            assert_eq!(current_id(), Some(outer_id));

            yielder.suspend(first);

            let second = nested.resume(());
            assert_eq!(current_id(), Some(outer_id));
            second
        });

        assert_eq!(outer.resume(()), 10);
        assert_eq!(current_id(), None);
        assert_eq!(outer.resume(()), 20);
        assert_eq!(current_id(), None);
        assert!(outer.is_dead());
    }

    #[test]
    fn body_panic_reaches_the_resumer() {
        let mut cor: Coroutine<(), ()> = Coroutine::new(|yielder, ()| {
            yielder.suspend(());
            panic!("boom");
        });

        cor.resume(());

        let err = panic::catch_unwind(AssertUnwindSafe(|| cor.resume(()))).unwrap_err();
        assert_eq!(*err.downcast::<&'static str>().unwrap(), "boom");
        assert!(cor.is_dead());
    }

    struct DropTracker {
        drops: Rc<RefCell<Vec<&'static str>>>,
        label: &'static str,
    }

    impl Drop for DropTracker {
        fn drop(&mut self) {
            self.drops.borrow_mut().push(self.label);
        }
    }

    #[test]
    fn kill_unwinds_the_stack_once() {
        let drops = Rc::new(RefCell::new(Vec::new()));

        let tracked = drops.clone();
        let mut cor: Coroutine<u32> = Coroutine::new(move |yielder, ()| {
            let _guard = DropTracker {
                drops: tracked,
                label: "on-stack",
            };
            let mut n = 0;
            loop {
                yielder.suspend(n);
                n += 1;
            }
        });

        assert_eq!(cor.resume(()), 0);
        assert_eq!(cor.resume(()), 1);
        assert!(drops.borrow().is_empty());

        cor.kill();
        assert!(cor.is_dead());
        assert_eq!(*drops.borrow(), vec!["on-stack"]);
    }

    #[test]
    fn dropping_a_live_coroutine_kills_it() {
        let drops = Rc::new(RefCell::new(Vec::new()));

        {
            let tracked = drops.clone();
            let mut cor: Coroutine<u32> = Coroutine::new(move |yielder, ()| {
                let _guard = DropTracker {
                    drops: tracked,
                    label: "on-stack",
                };
                let mut n = 0;
                loop {
                    yielder.suspend(n);
                    n += 1;
                }
            });
            assert_eq!(cor.resume(()), 0);
        }

        assert_eq!(*drops.borrow(), vec!["on-stack"]);
    }

    #[test]
    fn kill_before_first_resume_skips_the_body() {
        let drops = Rc::new(RefCell::new(Vec::new()));

        let captured = DropTracker {
            drops: drops.clone(),
            label: "captured",
        };
        let mut cor: Coroutine<(), ()> = Coroutine::new(move |_yielder, ()| {
            let _keep = captured;
            panic!("body must not run");
        });

        cor.kill();
        assert!(cor.is_dead());
        // The capture is released with the coroutine, not by running the body.
        assert!(drops.borrow().is_empty());
        drop(cor);
        assert_eq!(*drops.borrow(), vec!["captured"]);
    }

    #[test]
    fn kill_survives_a_broad_catch() {
        let drops = Rc::new(RefCell::new(Vec::new()));

        let tracked = drops.clone();
        let mut cor: Coroutine<u32> = Coroutine::new(move |yielder, ()| {
            let _guard = DropTracker {
                drops: tracked,
                label: "outside-catch",
            };
            // Swallow everything, drop the payload, and keep going: the
            // sentinel must re-raise itself on scope exit.
            let caught: Result<u32, _> = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut n = 0;
                loop {
                    yielder.suspend(n);
                    n += 1;
                }
            }));
            drop(caught);
            0
        });

        assert_eq!(cor.resume(()), 0);
        cor.kill();
        assert!(cor.is_dead());
        assert_eq!(*drops.borrow(), vec!["outside-catch"]);
    }

    #[test]
    fn large_stack_frames_fit_with_a_custom_size() {
        let mut cor: Coroutine<u64> =
            Coroutine::with_stack_size(StackSize::bytes(256 * 1024), |yielder, ()| {
                let big = [7u8; 64 * 1024];
                yielder.suspend(u64::from(big[0]));
                u64::from(big[big.len() - 1])
            });

        assert_eq!(cor.resume(()), 7);
        assert_eq!(cor.resume(()), 7);
    }
}
