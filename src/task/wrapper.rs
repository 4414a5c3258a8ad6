#![allow(unsafe_op_in_unsafe_fn)]

use super::{SboBuf, alloc_erased, fits_inline, free_erased};
use std::fmt;
use std::ptr::NonNull;

/// Vtable for an erased run-once task.
///
/// One instance exists per stored payload type, obtained by const promotion
/// of the generic thunks below. No move or relocation slots are needed:
/// moving the wrapper relocates the inline payload bytes (or the heap
/// pointer) wholesale, so `run` and `destroy` are the whole contract.
struct TaskVtable {
    /// Moves the payload out of the buffer and invokes it. The buffer is
    /// dead afterwards.
    run: unsafe fn(*mut u8),

    /// Drops the payload (and releases out-of-line storage) without
    /// running it.
    destroy: unsafe fn(*mut u8),
}

/// A move-only, type-erased `FnOnce() + Send` with small-buffer
/// optimization.
///
/// This is the unit of work handed from a blueprint's control node to an
/// [`Executor`](crate::executor::Executor). Payloads up to 64 bytes with
/// alignment up to 16 live inline; anything else is stored out of line.
/// Running consumes the wrapper; the stored invocable must not unwind, as
/// wrappers cross executor boundaries that have no way to surface a panic.
pub struct TaskWrapper {
    buf: SboBuf,
    vtable: Option<&'static TaskVtable>,
}

// Safety: construction requires the payload to be Send, and the buffer is
// just its bytes (or a pointer to them).
unsafe impl Send for TaskWrapper {}

impl TaskWrapper {
    /// An empty wrapper; running it is a precondition violation.
    pub const fn empty() -> Self {
        TaskWrapper {
            buf: SboBuf::new(),
            vtable: None,
        }
    }

    /// Wraps `f`, choosing inline or out-of-line storage by size and
    /// alignment at compile time.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut task = Self::empty();
        task.install(f);
        task
    }

    fn install<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        debug_assert!(self.vtable.is_none());
        if const { fits_inline::<F>() } {
            unsafe { self.buf.as_mut_ptr().cast::<F>().write(f) };
            self.vtable = Some(vtable_inline::<F>());
        } else {
            let ptr = alloc_erased(f);
            unsafe { self.buf.as_mut_ptr().cast::<*mut F>().write(ptr.as_ptr()) };
            self.vtable = Some(vtable_outline::<F>());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vtable.is_none()
    }

    pub fn has_value(&self) -> bool {
        !self.is_empty()
    }

    /// Installs a new invocable, destroying any previous one first.
    pub fn replace<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.clear();
        self.install(f);
    }

    /// Destroys the stored invocable without running it.
    pub fn clear(&mut self) {
        if let Some(vt) = self.vtable.take() {
            unsafe { (vt.destroy)(self.buf.as_mut_ptr()) };
        }
    }

    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Runs the stored invocable exactly once, consuming the wrapper.
    ///
    /// Precondition: `has_value()`.
    pub fn run(mut self) {
        let vt = self.vtable.take().expect("running an empty TaskWrapper");
        unsafe { (vt.run)(self.buf.as_mut_ptr()) };
    }
}

impl Default for TaskWrapper {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for TaskWrapper {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for TaskWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_empty() {
            "TaskWrapper(<empty>)"
        } else {
            "TaskWrapper(<armed>)"
        })
    }
}

fn vtable_inline<F: FnOnce()>() -> &'static TaskVtable {
    &TaskVtable {
        run: run_inline::<F>,
        destroy: destroy_inline::<F>,
    }
}

fn vtable_outline<F: FnOnce()>() -> &'static TaskVtable {
    &TaskVtable {
        run: run_outline::<F>,
        destroy: destroy_outline::<F>,
    }
}

unsafe fn run_inline<F: FnOnce()>(buf: *mut u8) {
    let f = buf.cast::<F>().read();
    f();
}

unsafe fn destroy_inline<F>(buf: *mut u8) {
    buf.cast::<F>().drop_in_place();
}

unsafe fn run_outline<F: FnOnce()>(buf: *mut u8) {
    let ptr = NonNull::new_unchecked(buf.cast::<*mut F>().read());
    let f = ptr.as_ptr().read();
    // Storage is released before the call so a long-running task does not
    // pin a pool block.
    free_erased(ptr);
    f();
}

unsafe fn destroy_outline<F>(buf: *mut u8) {
    let ptr = NonNull::new_unchecked(buf.cast::<*mut F>().read());
    ptr.as_ptr().drop_in_place();
    free_erased(ptr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_empty_default_and_clear() {
        let mut task = TaskWrapper::default();
        assert!(task.is_empty());
        task.clear();
        assert!(task.is_empty());
    }

    #[test]
    fn test_run_invokes_exactly_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let task = TaskWrapper::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
        });
        assert!(task.has_value());
        task.run();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_oversized_payload_goes_out_of_line_and_still_runs() {
        let big = [7u8; 256];
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let task = TaskWrapper::new(move || {
            assert!(big.iter().all(|&b| b == 7));
            h.fetch_add(1, Ordering::Relaxed);
        });
        task.run();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_drop_without_run_destroys_payload() {
        let token = Arc::new(());
        {
            let t = Arc::clone(&token);
            let task = TaskWrapper::new(move || drop(t));
            assert_eq!(Arc::strong_count(&token), 2);
            drop(task);
        }
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_replace_destroys_previous_payload() {
        let first = Arc::new(());
        let second = Arc::new(());
        let f = Arc::clone(&first);
        let s = Arc::clone(&second);

        let mut task = TaskWrapper::new(move || drop(f));
        task.replace(move || drop(s));
        assert_eq!(Arc::strong_count(&first), 1);
        assert_eq!(Arc::strong_count(&second), 2);
        task.run();
        assert_eq!(Arc::strong_count(&second), 1);
    }

    #[test]
    fn test_swap_exchanges_occupancy() {
        let mut armed = TaskWrapper::new(|| {});
        let mut idle = TaskWrapper::empty();
        armed.swap(&mut idle);
        assert!(armed.is_empty());
        assert!(idle.has_value());
        idle.run();
    }

    #[test]
    fn test_move_leaves_value_with_destination() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let task = TaskWrapper::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
        });
        let moved = task;
        moved.run();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[should_panic(expected = "running an empty TaskWrapper")]
    fn test_running_empty_wrapper_is_a_precondition_violation() {
        TaskWrapper::empty().run();
    }
}
