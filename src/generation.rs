//! Generator-style iteration over a coroutine.
//!
//! A `Coroutine<R>` that takes no argument is a lazy producer of `R`s.
//! [`Coroutine::iter`] adapts it into a single-pass [`Iterator`]: each `next`
//! resumes the coroutine once, the final return value of a finite body
//! appears as the last item, and iteration stops when the coroutine is dead
//! or its body raises [`EndOfGeneration`].
//!
//! The underlying coroutine is single-pass; once the iterator has drained it
//! there is nothing left to restart.

use crate::coroutine::Coroutine;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Sentinel raised by a generator body to announce that the sequence is over.
///
/// Distinct from an ordinary return: an infinite generator can be stopped
/// from the inside without fabricating a final value.
///
/// ```
/// use coio::{Coroutine, generation};
///
/// let mut numbers: Coroutine<u32> = Coroutine::new(|yielder, ()| {
///     for n in 0..3 {
///         yielder.suspend(n);
///     }
///     generation::end_generation()
/// });
///
/// assert_eq!(numbers.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
/// ```
#[derive(Debug, Error)]
#[error("end of generation")]
pub struct EndOfGeneration;

/// Terminate the calling generator body, ending its iteration.
pub fn end_generation() -> ! {
    panic::panic_any(EndOfGeneration)
}

/// Single-pass iterator over the values of a `Coroutine<R>`.
pub struct Generation<'a, R: 'static> {
    cor: Option<&'a mut Coroutine<R, ()>>,
}

impl<R: 'static> Coroutine<R, ()> {
    /// Iterate over the values this coroutine produces.
    ///
    /// Lazy: nothing is resumed until the first `next` call.
    pub fn iter(&mut self) -> Generation<'_, R> {
        Generation { cor: Some(self) }
    }
}

impl<R: 'static> Iterator for Generation<'_, R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        let cor = self.cor.as_mut()?;

        if cor.is_dead() {
            self.cor = None;
            return None;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| cor.resume(()))) {
            Ok(value) => Some(value),
            Err(payload) if payload.is::<EndOfGeneration>() => {
                self.cor = None;
                None
            }
            // Any other body panic is a real error and keeps propagating.
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}
