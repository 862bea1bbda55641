//! Fibonacci generator example.
//!
//! A coroutine with its own stack yields an infinite sequence; the caller
//! pulls exactly as many values as it wants.

use coio::Coroutine;

const N: usize = 30;

fn main() {
    let mut fib: Coroutine<u64> = Coroutine::new(|yielder, ()| {
        let (mut prev, mut cur) = (0u64, 1u64);
        loop {
            yielder.suspend(cur);
            let next = prev + cur;
            prev = cur;
            cur = next;
        }
    });

    for pos in 0..N {
        println!("{}: {}", pos, fib.resume(()));
    }
}
