//! Cooperative event loops.
//!
//! [`EventLoop`] is the minimal, object-safe contract the future layer needs:
//! scheduling due-timed one-shot tasks and tracking which coroutine the loop
//! is currently stepping. [`EventLoopExt`] layers the conveniences on top of
//! any loop implementation: spawning coroutines, packaging function calls as
//! futures, and timer-backed sleeps. [`SyncEventLoop`] is the concrete
//! single-threaded loop.

mod sync_loop;

pub use sync_loop::SyncEventLoop;

use crate::coroutine::Coroutine;
use crate::future::Future;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Shared handle to a coroutine managed by an event loop.
///
/// The loop and any pending wake-ups hold clones; the coroutine is dropped
/// (and killed, if still live) when the last clone goes away.
#[derive(Clone)]
pub struct CoroutineHandle {
    cor: Rc<RefCell<Coroutine<(), ()>>>,
}

impl CoroutineHandle {
    pub(crate) fn new(cor: Coroutine<(), ()>) -> Self {
        CoroutineHandle {
            cor: Rc::new(RefCell::new(cor)),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.cor.borrow().is_dead()
    }
}

/// Run one step of `cor`: make it the loop's current coroutine, resume it
/// until it suspends or finishes, then restore the previous record.
///
/// Every coroutine step goes through here, which keeps the current-coroutine
/// protocol balanced even when steps nest.
pub(crate) fn resume_step(ev: &Rc<dyn EventLoop>, cor: &CoroutineHandle) {
    let prev = ev.set_current_coroutine(Some(cor.clone()));
    cor.cor.borrow_mut().resume(());
    ev.set_current_coroutine(prev);
}

/// The protocol contract between an event loop and the futures awaiting on
/// it.
pub trait EventLoop: 'static {
    /// Enqueue a one-shot task for execution at or after `due`.
    fn schedule(&self, due: Instant, task: Box<dyn FnOnce()>);

    /// Install the coroutine the loop is about to step; returns the previous
    /// record so nested steps can restore it.
    fn set_current_coroutine(&self, cor: Option<CoroutineHandle>) -> Option<CoroutineHandle>;

    /// The coroutine currently being stepped by this loop, if any.
    fn current_coroutine(&self) -> Option<CoroutineHandle>;
}

/// Conveniences over any [`EventLoop`].
pub trait EventLoopExt: EventLoop + Clone {
    /// This loop as a shared trait object, as stored inside futures.
    fn handle(&self) -> Rc<dyn EventLoop> {
        Rc::new(self.clone())
    }

    /// Enqueue `f` to run as soon as the loop gets to it.
    fn add_task<F: FnOnce() + 'static>(&self, f: F) {
        self.schedule(Instant::now(), Box::new(f));
    }

    /// Enqueue `f` to run at or after `due`.
    fn add_task_at<F: FnOnce() + 'static>(&self, due: Instant, f: F) {
        self.schedule(due, Box::new(f));
    }

    /// Schedule the first step of a user coroutine.
    fn add_coroutine(&self, cor: Coroutine<(), ()>) {
        let ev = self.handle();
        let cor = CoroutineHandle::new(cor);
        self.add_task(move || resume_step(&ev, &cor));
    }

    /// Package `producer` as an asynchronous call: the returned future's
    /// value is computed by a scheduled coroutine and must be awaited
    /// exactly once.
    fn async_call<T, F>(&self, producer: F) -> Future<T>
    where
        T: 'static,
        F: FnOnce() -> T + 'static,
    {
        Future::spawn(self.handle(), producer)
    }

    /// Lift a plain function into one returning futures.
    fn async_fn<Arg, T, F>(&self, f: F) -> impl Fn(Arg) -> Future<T>
    where
        Arg: 'static,
        T: 'static,
        F: Fn(Arg) -> T + Clone + 'static,
    {
        let ev = self.clone();
        move |arg| {
            let f = f.clone();
            ev.async_call(move || f(arg))
        }
    }

    /// A future that becomes ready `duration` from now.
    fn sleep(&self, duration: Duration) -> Future<()> {
        Future::<()>::sleep(self.handle(), duration)
    }
}

impl<L: EventLoop + Clone> EventLoopExt for L {}
