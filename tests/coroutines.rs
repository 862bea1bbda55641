//! Black-box tests of the coroutine surface: value exchange, unwinding, and
//! generator iteration.

use coio::{Coroutine, StackSize, generation};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

#[test]
fn fibonacci_by_repeated_resume() {
    let mut fib: Coroutine<u64> = Coroutine::new(|yielder, ()| {
        let (mut prev, mut cur) = (0u64, 1u64);
        loop {
            yielder.suspend(cur);
            let next = prev + cur;
            prev = cur;
            cur = next;
        }
    });

    let mut values = Vec::new();
    for _ in 0..30 {
        values.push(fib.resume(()));
    }

    assert_eq!(
        &values[..12],
        &[1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144]
    );
    assert_eq!(values[29], 832_040);
    assert!(!fib.is_dead());
}

#[test]
fn a_finite_body_delivers_yields_then_the_return() {
    let mut cor: Coroutine<&'static str> = Coroutine::new(|yielder, ()| {
        yielder.suspend("one");
        yielder.suspend("two");
        "three"
    });

    assert_eq!(cor.resume(()), "one");
    assert_eq!(cor.resume(()), "two");
    assert_eq!(cor.resume(()), "three");
    assert!(cor.is_dead());
}

#[test]
fn arguments_flow_into_the_body_each_resume() {
    let mut echo: Coroutine<String, u32> = Coroutine::new(|yielder, first| {
        let mut n = first;
        for _ in 0..2 {
            n = yielder.suspend(format!("got {n}"));
        }
        format!("last {n}")
    });

    assert_eq!(echo.resume(7), "got 7");
    assert_eq!(echo.resume(8), "got 8");
    assert_eq!(echo.resume(9), "last 9");
}

#[test]
fn consumer_coroutines_accumulate_their_arguments() {
    let total = Rc::new(Cell::new(0u32));

    let sink = total.clone();
    let mut acc: Coroutine<(), u32> = Coroutine::new(move |yielder, mut n| {
        loop {
            sink.set(sink.get() + n);
            n = yielder.suspend(());
        }
    });

    acc.resume(1);
    acc.resume(2);
    acc.resume(3);
    assert_eq!(total.get(), 6);
}

#[test]
fn nested_coroutines_interleave() {
    let trace = Rc::new(RefCell::new(Vec::new()));

    let outer_trace = trace.clone();
    let mut outer: Coroutine<u32> = Coroutine::new(move |yielder, ()| {
        let inner_trace = outer_trace.clone();
        let mut inner: Coroutine<u32> = Coroutine::new(move |yielder, ()| {
            inner_trace.borrow_mut().push("inner first");
            yielder.suspend(1);
            inner_trace.borrow_mut().push("inner second");
            2
        });

        outer_trace.borrow_mut().push("outer resumes inner");
        let first = inner.resume(());
        outer_trace.borrow_mut().push("outer yields");
        yielder.suspend(first);

        outer_trace.borrow_mut().push("outer resumes inner again");
        inner.resume(())
    });

    assert_eq!(outer.resume(()), 1);
    assert_eq!(outer.resume(()), 2);
    assert!(outer.is_dead());

    assert_eq!(
        *trace.borrow(),
        vec![
            "outer resumes inner",
            "inner first",
            "outer yields",
            "outer resumes inner again",
            "inner second",
        ]
    );
}

#[test]
fn a_body_panic_surfaces_at_the_resumer_with_its_payload() {
    let mut cor: Coroutine<u32> = Coroutine::new(|yielder, ()| {
        yielder.suspend(1);
        panic!("deliberate failure {}", 42);
    });

    assert_eq!(cor.resume(()), 1);

    let payload = panic::catch_unwind(AssertUnwindSafe(|| cor.resume(()))).unwrap_err();
    let message = payload.downcast::<String>().unwrap();
    assert_eq!(*message, "deliberate failure 42");
    assert!(cor.is_dead());
}

struct ScopedResource {
    released: Rc<RefCell<u32>>,
}

impl Drop for ScopedResource {
    fn drop(&mut self) {
        *self.released.borrow_mut() += 1;
    }
}

#[test]
fn killing_a_sleeping_yield_loop_releases_resources_exactly_once() {
    let released = Rc::new(RefCell::new(0u32));

    let resource_counter = released.clone();
    let mut cor: Coroutine<u32> = Coroutine::new(move |yielder, ()| {
        let _resource = ScopedResource {
            released: resource_counter,
        };
        let mut n = 0;
        loop {
            yielder.suspend(n);
            n += 1;
        }
    });

    assert_eq!(cor.resume(()), 0);
    assert_eq!(cor.resume(()), 1);
    assert_eq!(*released.borrow(), 0);

    cor.kill();

    assert!(cor.is_dead());
    assert_eq!(*released.borrow(), 1);
}

#[test]
fn generator_iteration_with_a_custom_stack() {
    let mut r#gen: Coroutine<usize> =
        Coroutine::with_stack_size(StackSize::bytes(64 * 1024), |yielder, ()| {
            for n in 0..5 {
                yielder.suspend(n);
            }
            5
        });

    assert_eq!(r#gen.iter().sum::<usize>(), 15);
}

#[test]
fn end_of_generation_is_distinct_from_finishing() {
    let mut finite: Coroutine<u32> = Coroutine::new(|yielder, ()| {
        yielder.suspend(1);
        2
    });
    assert_eq!(finite.iter().collect::<Vec<_>>(), vec![1, 2]);
    assert!(finite.is_dead());

    let mut stopped: Coroutine<u32> = Coroutine::new(|yielder, ()| {
        yielder.suspend(1);
        generation::end_generation()
    });
    assert_eq!(stopped.iter().collect::<Vec<_>>(), vec![1]);
    assert!(stopped.is_dead());
}
