//! Generator iteration example.
//!
//! A coroutine exposed as a plain `Iterator`: lazy, single-pass, stopped
//! either by returning or by raising the end-of-generation sentinel.

use coio::{Coroutine, generation};

fn main() {
    let mut squares: Coroutine<u64> = Coroutine::new(|yielder, ()| {
        for n in 1u64.. {
            if n * n > 500 {
                generation::end_generation();
            }
            yielder.suspend(n * n);
        }
        unreachable!()
    });

    for square in squares.iter() {
        println!("{square}");
    }
}
