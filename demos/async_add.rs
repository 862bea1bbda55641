//! Event loop example: asynchronous calls, chaining, and sleeps.
//!
//! Run with `RUST_LOG=trace` to watch the loop schedule and dispatch tasks.

use coio::{EventLoopExt, SyncEventLoop};
use std::time::{Duration, Instant};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let start = Instant::now();

    SyncEventLoop::create_and_run(move |ev| {
        // A future scheduled early still waits for its await politely.
        let early = ev.async_call(|| 2 + 3);

        let sum = ev.async_call(|| 123 + 321).wait();
        println!("[{:>6.3}s] 123 + 321 = {}", start.elapsed().as_secs_f64(), sum);

        println!("[{:>6.3}s] early = {}", start.elapsed().as_secs_f64(), early.wait());

        // Chain: compute, then feed the result into another async call.
        let negate_ev = ev.clone();
        let negated = ev
            .async_call(|| {
                println!("calculating 100+200");
                100 + 200
            })
            .then(move |sum: i32| {
                negate_ev.async_call(move || {
                    println!("negating {sum}");
                    -sum
                })
            })
            .wait();
        println!("[{:>6.3}s] negated = {}", start.elapsed().as_secs_f64(), negated);

        ev.sleep(Duration::from_millis(200)).wait();
        println!("[{:>6.3}s] slept 200ms", start.elapsed().as_secs_f64());
    });

    println!("loop drained after {:?}", start.elapsed());
}
