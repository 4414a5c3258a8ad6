use super::TaskWrapper;
use crate::outcome::{Captured, Outcome, PanicFault};
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

struct Shared<R> {
    done: Mutex<Option<Outcome<R, Captured>>>,
    cv: Condvar,
}

impl<R> Shared<R> {
    fn fulfill(&self, outcome: Outcome<R, Captured>) {
        let mut slot = self.done.lock();
        // First fulfilment wins; the fired flag normally prevents a second
        // one from ever being produced.
        if slot.is_none() {
            *slot = Some(outcome);
            self.cv.notify_all();
        }
    }
}

/// A run-once bundle whose completion fulfils a one-shot promise.
///
/// Invoking [`run`](PromiseTask::run) more than once is a no-op, enforced
/// by an atomic fired flag. A panic out of the bundle is captured and
/// surfaces as the receipt's fault arm; dropping the task without running
/// it fulfils the promise with a broken-promise fault so the waiter is
/// never stranded.
pub struct PromiseTask<F, R> {
    f: Option<F>,
    fired: AtomicBool,
    shared: Arc<Shared<R>>,
}

impl<F, R> PromiseTask<F, R>
where
    F: FnOnce() -> Outcome<R, Captured> + Send + 'static,
    R: Send + 'static,
{
    /// Runs the bundle and fulfils the promise. Subsequent calls do
    /// nothing.
    pub fn run(&mut self) {
        if self.fired.swap(true, Ordering::Relaxed) {
            return;
        }
        let Some(f) = self.f.take() else { return };
        let outcome = match catch_unwind(AssertUnwindSafe(f)) {
            Ok(outcome) => outcome,
            Err(payload) => Outcome::fault(Captured::captured(payload)),
        };
        self.shared.fulfill(outcome);
    }

    /// Erases the task into executor currency.
    pub fn into_task_wrapper(mut self) -> TaskWrapper {
        TaskWrapper::new(move || self.run())
    }
}

impl<F, R> Drop for PromiseTask<F, R> {
    fn drop(&mut self) {
        if self.f.take().is_some() {
            self.shared.fulfill(Outcome::fault(Captured::captured(Box::new(
                "promise task dropped without running",
            ))));
        }
    }
}

/// The receiving half of a promise pair.
///
/// The promise is one-shot, so every method that can yield the outcome
/// consumes the receipt; a receipt that still exists is one whose outcome
/// has not been taken yet, and waiting on it can never strand the caller
/// on an already-emptied slot.
pub struct Receipt<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Receipt<R> {
    /// Blocks until the task has run (or been dropped).
    pub fn wait(self) -> Outcome<R, Captured> {
        let mut slot = self.shared.done.lock();
        while slot.is_none() {
            self.shared.cv.wait(&mut slot);
        }
        slot.take().expect("fulfilled promise")
    }

    /// Takes the outcome if the task has already completed, handing the
    /// receipt back otherwise.
    pub fn try_take(self) -> Result<Outcome<R, Captured>, Self> {
        let taken = self.shared.done.lock().take();
        match taken {
            Some(outcome) => Ok(outcome),
            None => Err(self),
        }
    }

    /// Blocks up to `timeout` for the task to complete; on timeout the
    /// receipt comes back for a later attempt.
    pub fn wait_for(self, timeout: std::time::Duration) -> Result<Outcome<R, Captured>, Self> {
        let deadline = std::time::Instant::now() + timeout;
        {
            let mut slot = self.shared.done.lock();
            loop {
                if let Some(outcome) = slot.take() {
                    return Ok(outcome);
                }
                if self.shared.cv.wait_until(&mut slot, deadline).timed_out() {
                    match slot.take() {
                        Some(outcome) => return Ok(outcome),
                        None => break,
                    }
                }
            }
        }
        Err(self)
    }

    pub fn is_ready(&self) -> bool {
        self.shared.done.lock().is_some()
    }
}

impl<R> std::fmt::Debug for Receipt<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receipt")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Pairs `f` with a one-shot promise fulfilled by its return value.
pub fn promise_task<F, R>(
    f: F,
) -> (
    PromiseTask<impl FnOnce() -> Outcome<R, Captured> + Send + 'static, R>,
    Receipt<R>,
)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    promise_outcome_task(move || Outcome::value(f()))
}

/// As [`promise_task`], but for bundles that already produce an
/// [`Outcome`]; the result is flattened into the promise instead of being
/// wrapped a second time.
pub fn promise_outcome_task<F, R>(f: F) -> (PromiseTask<F, R>, Receipt<R>)
where
    F: FnOnce() -> Outcome<R, Captured> + Send + 'static,
    R: Send + 'static,
{
    let shared = Arc::new(Shared {
        done: Mutex::new(None),
        cv: Condvar::new(),
    });
    let task = PromiseTask {
        f: Some(f),
        fired: AtomicBool::new(false),
        shared: Arc::clone(&shared),
    };
    (task, Receipt { shared })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_fulfils_with_value() {
        let (mut task, receipt) = promise_task(|| 6 * 7);
        assert!(!receipt.is_ready());
        task.run();
        assert!(receipt.is_ready());
        assert_eq!(receipt.wait().into_value(), 42);
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let (mut task, receipt) = promise_task(|| 1);
        task.run();
        task.run();
        assert_eq!(receipt.wait().into_value(), 1);
    }

    #[test]
    fn test_panic_is_captured_into_fault_arm() {
        let (mut task, receipt) = promise_task(|| -> i32 { panic!("exploded") });
        task.run();
        let fault = receipt.wait().into_fault();
        assert_eq!(fault.message(), Some("exploded"));
    }

    #[test]
    fn test_outcome_bundle_is_flattened() {
        let (mut task, receipt) =
            promise_outcome_task(|| Outcome::<i32, Captured>::fault(Captured::captured(Box::new("direct"))));
        task.run();
        assert!(receipt.wait().has_fault());
    }

    #[test]
    fn test_dropped_task_breaks_the_promise() {
        let (task, receipt) = promise_task(|| 3);
        drop(task);
        assert!(receipt.wait().has_fault());
    }

    #[test]
    fn test_wait_for_times_out_then_succeeds() {
        let (mut task, receipt) = promise_task(|| 5);
        let receipt = receipt
            .wait_for(std::time::Duration::from_millis(10))
            .unwrap_err();
        task.run();
        let outcome = receipt
            .wait_for(std::time::Duration::from_millis(10))
            .unwrap();
        assert_eq!(outcome.into_value(), 5);
    }

    #[test]
    fn test_try_take_hands_the_receipt_back_until_completion() {
        let (mut task, receipt) = promise_task(|| 8);
        let receipt = receipt.try_take().unwrap_err();
        task.run();
        assert_eq!(receipt.try_take().unwrap().into_value(), 8);
    }

    #[test]
    fn test_completion_crosses_threads_via_task_wrapper() {
        let (task, receipt) = promise_task(|| String::from("from the other side"));
        let wrapper = task.into_task_wrapper();
        let handle = std::thread::spawn(move || wrapper.run());
        assert_eq!(receipt.wait().into_value(), "from the other side");
        handle.join().unwrap();
    }
}
