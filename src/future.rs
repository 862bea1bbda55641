//! Single-assignment asynchronous values.
//!
//! A [`Future`] owns the work that computes its result: a producer closure
//! run inside a scheduled coroutine, so the producer itself may await other
//! futures. The future is bond-paired with a [`Promise`], the write-side
//! handle the event loop moves into the scheduled task.
//!
//! Awaiting never switches into the awaiter directly: fulfilment schedules a
//! fresh task to step the consumer coroutine, so wake-ups run as top-level
//! loop iterations and stay fair with other ready tasks.

use crate::bond::Bond;
use crate::coroutine::{Coroutine, suspend_current};
use crate::runtime::{CoroutineHandle, EventLoop, resume_step};
use crate::util::assertion_failed;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::trace;

/// State shared between one future/promise pair through their bond.
struct Shared<T> {
    /// One-shot result slot: written by the producer, taken by the awaiter.
    result: RefCell<Option<T>>,
    /// The single consumer continuation, invoked on fulfilment.
    consumer: RefCell<Option<Box<dyn FnOnce()>>>,
    awaited: Cell<bool>,
    /// The producer step coroutine; taken when the promise starts it.
    work: RefCell<Option<CoroutineHandle>>,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Shared {
            result: RefCell::new(None),
            consumer: RefCell::new(None),
            awaited: Cell::new(false),
            work: RefCell::new(None),
        }
    }

    /// Write the result and wake the consumer, if one is already waiting.
    #[track_caller]
    fn fulfil(&self, value: T) {
        if self.result.borrow_mut().replace(value).is_some() {
            assertion_failed("future fulfilled twice");
        }
        if let Some(wake) = self.consumer.borrow_mut().take() {
            wake();
        }
    }
}

/// An asynchronous value, eventually produced by a scheduled coroutine.
///
/// A future must be awaited exactly once before it is dropped; awaiting
/// consumes it. See [`EventLoopExt::async_call`](crate::EventLoopExt::async_call).
pub struct Future<T: 'static> {
    ev: Rc<dyn EventLoop>,
    bond: Bond<Shared<T>>,
}

impl<T: 'static> Future<T> {
    /// Package `producer` as a future and schedule its first step.
    pub(crate) fn spawn<F>(ev: Rc<dyn EventLoop>, producer: F) -> Future<T>
    where
        F: FnOnce() -> T + 'static,
    {
        let mut fut = Bond::unlinked();
        let mut prom = Bond::unlinked();
        Bond::bind(&mut fut, &mut prom, Shared::new());

        let shared = fut.get().expect("endpoint was just bound").clone();

        // The producer runs inside its own coroutine so that it can await.
        // On completion it fulfils the shared cell, which wakes the awaiter.
        let body_shared = shared.clone();
        let cor = Coroutine::new(move |_yielder, ()| {
            let value = producer();
            body_shared.fulfil(value);
        });
        shared.work.replace(Some(CoroutineHandle::new(cor)));

        let promise = Promise {
            ev: ev.clone(),
            bond: prom,
        };
        ev.schedule(Instant::now(), Box::new(move || promise.start()));

        Future { ev, bond: fut }
    }

    fn shared(&self) -> &Rc<Shared<T>> {
        self.bond
            .get()
            .unwrap_or_else(|| assertion_failed("future is not bound to a promise"))
    }

    /// Suspend the calling coroutine until the result is ready, then return
    /// it.
    ///
    /// Must be called from a coroutine the event loop is stepping. If the
    /// result is already present the caller is not suspended at all.
    #[track_caller]
    pub fn wait(self) -> T {
        let shared = self.shared().clone();
        if shared.awaited.replace(true) {
            assertion_failed("future awaited twice");
        }

        let Some(consumer) = self.ev.current_coroutine() else {
            assertion_failed("attempt to await outside of a coroutine");
        };

        if shared.result.borrow().is_none() {
            // Park this coroutine. Fulfilment schedules a fresh task to step
            // it again rather than switching in directly.
            let ev = self.ev.clone();
            shared.consumer.borrow_mut().replace(Box::new(move || {
                let step_ev = ev.clone();
                ev.schedule(
                    Instant::now(),
                    Box::new(move || resume_step(&step_ev, &consumer)),
                );
            }));
            suspend_current();
        }

        shared
            .result
            .borrow_mut()
            .take()
            .unwrap_or_else(|| assertion_failed("future resumed without a result"))
    }

    /// Chain: once this future is ready, feed its value to `f` and adopt the
    /// future `f` returns.
    ///
    /// This future is moved into the chain, so it still gets awaited exactly
    /// once.
    pub fn then<U, F>(self, f: F) -> Future<U>
    where
        U: 'static,
        F: FnOnce(T) -> Future<U> + 'static,
    {
        let ev = self.ev.clone();
        Future::spawn(ev, move || f(self.wait()).wait())
    }
}

impl Future<()> {
    /// A future fulfilled by the loop at `duration` from now.
    pub(crate) fn sleep(ev: Rc<dyn EventLoop>, duration: Duration) -> Future<()> {
        let mut fut = Bond::unlinked();
        let mut prom = Bond::unlinked();
        Bond::bind(&mut fut, &mut prom, Shared::new());

        let promise = Promise {
            ev: ev.clone(),
            bond: prom,
        };
        ev.schedule(
            Instant::now() + duration,
            Box::new(move || promise.fulfil(())),
        );

        Future { ev, bond: fut }
    }
}

impl<T: 'static> Drop for Future<T> {
    fn drop(&mut self) {
        // A valid future that was never awaited is a programming error. Keep
        // quiet during unwinding, though: cancellation legitimately tears
        // down futures mid-flight.
        if self.bond.is_linked() && !self.shared().awaited.get() && !std::thread::panicking() {
            assertion_failed("future dropped without being awaited");
        }
    }
}

/// Write-side handle of a future, moved into the scheduled task that
/// produces the value.
pub struct Promise<T: 'static> {
    ev: Rc<dyn EventLoop>,
    bond: Bond<Shared<T>>,
}

impl<T: 'static> Promise<T> {
    fn shared(&self) -> &Rc<Shared<T>> {
        self.bond
            .get()
            .unwrap_or_else(|| assertion_failed("promise is not bound to a future"))
    }

    /// Run the first step of the producer coroutine.
    fn start(self) {
        let cor = self
            .shared()
            .work
            .borrow_mut()
            .take()
            .unwrap_or_else(|| assertion_failed("promise started twice"));
        resume_step(&self.ev, &cor);
        // If the producer suspended awaiting another future, that future's
        // continuation now owns the handle and keeps stepping it.
    }

    /// Fulfil directly with a value (timer-backed futures).
    fn fulfil(self, value: T) {
        trace!("promise fulfilled");
        self.shared().fulfil(value);
    }
}
