//! Single-threaded synchronous event loop.

use super::{CoroutineHandle, EventLoop, EventLoopExt};
use crate::coroutine::Coroutine;
use crate::util::assertion_failed;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::thread;
use std::time::Instant;
use tracing::trace;

/// A due-timed one-shot task. Insertion order breaks ties so that tasks
/// scheduled for the same instant dispatch first-in first-out.
struct ScheduledTask {
    due: Instant,
    seq: u64,
    run: Box<dyn FnOnce()>,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for a min-heap: earliest due time first, lowest
        // sequence number among equals.
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct LoopInner {
    queue: RefCell<BinaryHeap<ScheduledTask>>,
    next_seq: Cell<u64>,
    current: RefCell<Option<CoroutineHandle>>,
    running: Cell<bool>,
}

/// A cooperative event loop that runs tasks sequentially on the calling
/// thread, sleeping until the next due time.
///
/// The handle is cheap to clone; all clones share one task queue.
#[derive(Clone)]
pub struct SyncEventLoop {
    inner: Rc<LoopInner>,
}

impl SyncEventLoop {
    pub fn new() -> Self {
        SyncEventLoop {
            inner: Rc::new(LoopInner {
                queue: RefCell::new(BinaryHeap::new()),
                next_seq: Cell::new(0),
                current: RefCell::new(None),
                running: Cell::new(false),
            }),
        }
    }

    /// Dispatch tasks until the queue is empty.
    ///
    /// Sleeps the thread until the earliest due time, executes exactly that
    /// one task, and repeats. Tasks scheduled during execution join the
    /// queue and are dispatched in (due time, insertion) order.
    ///
    /// Fatal if the loop is already running.
    #[track_caller]
    pub fn run(&self) {
        if self.inner.running.replace(true) {
            assertion_failed("attempt to run an event loop that is already running");
        }

        loop {
            let Some(due) = self.inner.queue.borrow().peek().map(|task| task.due) else {
                break;
            };

            let now = Instant::now();
            if due > now {
                let wait = due - now;
                trace!(?wait, "sleeping until next due task");
                thread::sleep(wait);
            }

            // Single-threaded: nothing was enqueued while asleep, so the
            // head is still the task we slept for.
            let task = self.inner.queue.borrow_mut().pop();
            if let Some(task) = task {
                trace!(seq = task.seq, "dispatching task");
                (task.run)();
            }
        }

        self.inner.running.set(false);
    }

    /// One-shot convenience: build a loop, run `f` inside a coroutine on it,
    /// and dispatch until all transitively scheduled work has drained.
    pub fn create_and_run<F>(f: F)
    where
        F: FnOnce(SyncEventLoop) + 'static,
    {
        let ev = SyncEventLoop::new();
        let inner = ev.clone();
        ev.add_coroutine(Coroutine::new(move |_yielder, ()| f(inner)));
        ev.run();
    }
}

impl Default for SyncEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop for SyncEventLoop {
    fn schedule(&self, due: Instant, task: Box<dyn FnOnce()>) {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        trace!(seq, "task scheduled");
        self.inner
            .queue
            .borrow_mut()
            .push(ScheduledTask { due, seq, run: task });
    }

    fn set_current_coroutine(&self, cor: Option<CoroutineHandle>) -> Option<CoroutineHandle> {
        self.inner.current.replace(cor)
    }

    fn current_coroutine(&self) -> Option<CoroutineHandle> {
        self.inner.current.borrow().clone()
    }
}
