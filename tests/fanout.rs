//! Fork/join over a shared executor, driven through the public API only.

use anyhow::Result;
use std::sync::Arc;
use weft::executor::{Executor, ManualExecutor};
use weft::flow::{self, Aggregator, CancelKind};
use weft::outcome::{Captured, Outcome};
use weft::task::promise_task;

type Slot = Outcome<i32, Captured>;

#[test]
fn test_three_flows_fan_out_and_join_on_an_aggregator() -> Result<()> {
    let exec: Arc<ManualExecutor> = Arc::new(ManualExecutor::new());
    let agg: Aggregator<(Slot, Slot, Slot)> = Aggregator::new();

    let d0 = agg.delegate::<0>();
    flow::blueprint::<i32>()
        .via(Arc::clone(&exec))
        .transform(|v: i32| v * 2)
        .end_with(move |out: Slot| d0.complete(out))
        .fast_runner()
        .invoke(10);

    let d1 = agg.delegate::<1>();
    flow::blueprint::<i32>()
        .via(Arc::clone(&exec))
        .transform(|_: i32| -> i32 { panic!("branch one failed") })
        .end_with(move |out: Slot| d1.complete(out))
        .fast_runner()
        .invoke(0);

    let d2 = agg.delegate::<2>();
    flow::blueprint::<i32>()
        .transform(|v: i32| v - 1)
        .via(Arc::clone(&exec))
        .end_with(move |out: Slot| d2.complete(out))
        .fast_runner()
        .invoke(100);

    // All three suspended at their control node.
    assert_eq!(exec.pending(), 3);
    assert!(!agg.is_any_ready());

    // Drain from two worker threads until every branch has published.
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let exec = Arc::clone(&exec);
            let agg = agg.clone();
            std::thread::spawn(move || {
                while !agg.is_all_ready() {
                    if !exec.run_one() {
                        std::thread::yield_now();
                    }
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let values = agg.try_values().unwrap();
    assert_eq!(values.0, Outcome::value(20));
    assert_eq!(values.1.fault_ref().message(), Some("branch one failed"));
    assert_eq!(values.2, Outcome::value(99));
    Ok(())
}

#[test]
fn test_promise_task_dispatched_through_an_executor() -> Result<()> {
    let exec: Arc<ManualExecutor> = Arc::new(ManualExecutor::new());

    let (task, receipt) = promise_task(|| 21 * 2);
    exec.dispatch(task.into_task_wrapper());
    assert!(!receipt.is_ready());

    let drainer = {
        let exec = Arc::clone(&exec);
        std::thread::spawn(move || {
            while !exec.run_one() {
                std::thread::yield_now();
            }
        })
    };

    assert_eq!(receipt.wait().into_value(), 42);
    drainer.join().unwrap();
    Ok(())
}

#[test]
fn test_cancelling_one_controller_stops_sibling_runners() -> Result<()> {
    let exec: Arc<ManualExecutor> = Arc::new(ManualExecutor::new());
    let (tx, rx) = std::sync::mpsc::channel();

    let runner = flow::blueprint::<i32>()
        .via(Arc::clone(&exec))
        .transform(|v: i32| v + 1)
        .end_with(move |out: Slot| tx.send(out).unwrap())
        .runner();

    // Two invocations suspend; a shared hard cancel poisons both resumes.
    runner.invoke(1);
    runner.invoke(2);
    assert_eq!(exec.pending(), 2);

    runner.controller().cancel(CancelKind::Hard);
    exec.run_all();

    for _ in 0..2 {
        let fault = rx.recv()?.into_fault();
        assert_eq!(fault.cancel_kind(), Some(CancelKind::Hard));
    }
    Ok(())
}
