use crate::executor::{Executor, ManualExecutor};
use crate::task::TaskWrapper;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A [`ManualExecutor`] that counts every dispatch it receives, so tests
/// can assert how many hand-offs a flow actually performed.
pub(crate) struct SpyExecutor {
    inner: ManualExecutor,
    dispatched: AtomicUsize,
}

impl SpyExecutor {
    pub(crate) fn new() -> Self {
        SpyExecutor {
            inner: ManualExecutor::new(),
            dispatched: AtomicUsize::new(0),
        }
    }

    pub(crate) fn dispatch_count(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub(crate) fn pending(&self) -> usize {
        self.inner.pending()
    }

    pub(crate) fn run_one(&self) -> bool {
        self.inner.run_one()
    }

    pub(crate) fn run_all(&self) -> usize {
        self.inner.run_all()
    }
}

impl Executor for SpyExecutor {
    fn dispatch(&self, task: TaskWrapper) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.inner.dispatch(task);
    }
}
