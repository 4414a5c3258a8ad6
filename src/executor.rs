use crate::queue::MpmcQueue;
use crate::task::TaskWrapper;
use std::sync::Arc;

/// A sink for erased tasks.
///
/// `dispatch` transfers ownership of the task and must not unwind; the
/// blueprint runner has already guaranteed the task itself cannot panic.
/// Implementations typically push into a queue and wake whatever drains
/// it — the event-loop integration lives outside this crate.
pub trait Executor {
    fn dispatch(&self, task: TaskWrapper);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn dispatch(&self, task: TaskWrapper) {
        (**self).dispatch(task);
    }
}

impl<E: Executor + ?Sized> Executor for &'static E {
    fn dispatch(&self, task: TaskWrapper) {
        (**self).dispatch(task);
    }
}

/// A deferred executor drained by its caller.
///
/// Dispatch parks the task; nothing runs until [`run_one`] or [`run_all`]
/// is called, from any thread. This is the mechanism half of an executor —
/// wiring it to threads or an event loop is the caller's policy, in the
/// same way the aggregator leaves waiting policy to its users.
///
/// [`run_one`]: ManualExecutor::run_one
/// [`run_all`]: ManualExecutor::run_all
pub struct ManualExecutor<const N: usize = 64> {
    queue: MpmcQueue<TaskWrapper, N>,
}

impl<const N: usize> ManualExecutor<N> {
    pub fn new() -> Self {
        ManualExecutor {
            queue: MpmcQueue::new(),
        }
    }

    /// Number of parked tasks (approximate under concurrent dispatch).
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Runs the oldest parked task, if any.
    pub fn run_one(&self) -> bool {
        match self.queue.try_pop() {
            Some(task) => {
                task.run();
                true
            }
            None => false,
        }
    }

    /// Drains and runs everything currently parked; returns how many ran.
    ///
    /// Tasks dispatched by the tasks themselves (a control node handing
    /// off to this same executor) are picked up in the same drain.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl<const N: usize> Default for ManualExecutor<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Executor for ManualExecutor<N> {
    fn dispatch(&self, task: TaskWrapper) {
        debug_assert!(task.has_value(), "dispatching an empty task");
        self.queue.push_wait(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    assert_impl_all!(ManualExecutor<64>: Send, Sync);

    #[test]
    fn test_dispatch_defers_until_driven() {
        let exec: ManualExecutor = ManualExecutor::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        exec.dispatch(TaskWrapper::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
        }));

        assert_eq!(exec.pending(), 1);
        assert_eq!(hits.load(Ordering::Relaxed), 0);

        assert!(exec.run_one());
        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(!exec.run_one());
    }

    #[test]
    fn test_run_all_includes_tasks_spawned_mid_drain() {
        let exec: Arc<ManualExecutor> = Arc::new(ManualExecutor::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let e = Arc::clone(&exec);
        let h = Arc::clone(&hits);
        exec.dispatch(TaskWrapper::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
            let h2 = Arc::clone(&h);
            e.dispatch(TaskWrapper::new(move || {
                h2.fetch_add(1, Ordering::Relaxed);
            }));
        }));

        assert_eq!(exec.run_all(), 2);
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }
}
