use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id source. Ids start at 1 so that 0 can serve as the "no
/// thread" sentinel in atomic slots.
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

/// Returns a small integer id unique to the calling thread.
///
/// Unlike [`std::thread::ThreadId`], the value is a plain `u64` that can be
/// stored in an atomic, which is what the hazard-pointer registry needs to
/// claim ownership of a record slot. The id is assigned on first use and
/// never reused within the process.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|cell| {
        let mut id = cell.get();
        if id == 0 {
            id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            cell.set(id);
        }
        id
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_is_stable_and_nonzero() {
        let a = current_thread_id();
        let b = current_thread_id();
        assert_ne!(a, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_thread_ids_differ_across_threads() {
        let mine = current_thread_id();
        let other = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(mine, other);
    }
}
