//! Stackful coroutines under a cooperative event loop with composable
//! futures.
//!
//! The crate is layered leaf to root:
//!
//! - [`arch`]: the machine-context switch (saved callee-saved registers plus
//!   instruction and stack pointers, switched with a few instructions of
//!   inline assembly)
//! - [`Coroutine`]: a routine with its own stack that exchanges one value in
//!   each direction with its resumer, plus cooperative cancellation
//! - [`Future`] / [`Promise`]: single-assignment asynchronous values whose
//!   producers run as coroutines and may themselves await
//! - [`SyncEventLoop`]: a single-threaded loop dispatching due-timed tasks
//!   in (due time, insertion) order
//!
//! Everything for one loop runs on one thread; suspension only ever happens
//! at a coroutine yield, at an await whose result is not ready, or while the
//! loop sleeps until the next due task.
//!
//! # Example
//!
//! ```
//! use coio::{EventLoopExt, SyncEventLoop};
//!
//! SyncEventLoop::create_and_run(|ev| {
//!     let sum = ev.async_call(|| 123 + 321).wait();
//!     assert_eq!(sum, 444);
//! });
//! ```

pub mod arch;
pub mod bond;
mod coroutine;
pub mod generation;
mod future;
mod runtime;
mod stack;
mod util;

pub use bond::Bond;
pub use coroutine::{Coroutine, Yielder};
pub use future::{Future, Promise};
pub use generation::{EndOfGeneration, Generation, end_generation};
pub use runtime::{CoroutineHandle, EventLoop, EventLoopExt, SyncEventLoop};
pub use stack::StackSize;
