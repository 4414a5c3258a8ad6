#![allow(unsafe_op_in_unsafe_fn)]

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;

/// A fixed in-place slot holding at most one `T`, with an occupancy flag.
///
/// The flag and the storage always agree: `has_value()` is true exactly when
/// a live `T` sits in the buffer. Replacement is a plain Rust move, which is
/// infallible, so every `emplace` provides the strong guarantee.
pub struct InlineCell<T> {
    storage: MaybeUninit<T>,
    live: bool,
}

impl<T> InlineCell<T> {
    /// Creates an empty cell.
    pub const fn new() -> Self {
        InlineCell {
            storage: MaybeUninit::uninit(),
            live: false,
        }
    }

    pub fn has_value(&self) -> bool {
        self.live
    }

    /// Places `value` into an empty cell.
    ///
    /// Precondition: the cell is empty. Constructing over a live value would
    /// leak it, so this panics in that case; use [`emplace`](Self::emplace)
    /// when the cell may be occupied.
    pub fn construct(&mut self, value: T) {
        assert!(!self.live, "construct called on an occupied cell");
        self.storage.write(value);
        self.live = true;
    }

    /// Places `value` into the cell, dropping any previous occupant.
    pub fn emplace(&mut self, value: T) {
        self.destroy();
        self.storage.write(value);
        self.live = true;
    }

    /// Drops the occupant, if any, and marks the cell empty.
    pub fn destroy(&mut self) {
        if self.live {
            self.live = false;
            // Safety: the flag said a live T was present, and we cleared it
            // before dropping so a panicking Drop cannot double-drop.
            unsafe { self.storage.assume_init_drop() };
        }
    }

    /// Precondition: `has_value()`.
    pub fn get(&self) -> &T {
        assert!(self.live, "get called on an empty cell");
        // Safety: flag says initialized.
        unsafe { self.storage.assume_init_ref() }
    }

    /// Precondition: `has_value()`.
    pub fn get_mut(&mut self) -> &mut T {
        assert!(self.live, "get_mut called on an empty cell");
        unsafe { self.storage.assume_init_mut() }
    }

    /// Moves the occupant out, leaving the cell empty.
    ///
    /// Precondition: `has_value()`.
    pub fn steal(&mut self) -> T {
        assert!(self.live, "steal called on an empty cell");
        self.live = false;
        unsafe { self.storage.assume_init_read() }
    }

    /// Moves the occupant out if present.
    pub fn take(&mut self) -> Option<T> {
        if self.live { Some(self.steal()) } else { None }
    }

    /// Swaps in `value`, returning the previous occupant if any.
    pub fn replace(&mut self, value: T) -> Option<T> {
        let old = self.take();
        self.construct(value);
        old
    }

    /// Returns the occupant, constructing it first if the cell is empty.
    pub fn get_or_construct(&mut self, init: impl FnOnce() -> T) -> &mut T {
        if !self.live {
            self.construct(init());
        }
        self.get_mut()
    }
}

impl<T> Default for InlineCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for InlineCell<T> {
    fn clone(&self) -> Self {
        let mut cell = InlineCell::new();
        if self.live {
            cell.construct(self.get().clone());
        }
        cell
    }
}

impl<T: fmt::Debug> fmt::Debug for InlineCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.live {
            f.debug_tuple("InlineCell").field(self.get()).finish()
        } else {
            f.write_str("InlineCell(<empty>)")
        }
    }
}

impl<T> Drop for InlineCell<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Flagless in-place storage for one `T`, occupancy tracked externally.
///
/// Queue slots and free-list nodes pair one of these with an atomic
/// (`ready` byte, sequence counter, or tagged list head) that says whether
/// the slot is live. All accessors are unsafe: the caller's protocol is the
/// only thing standing between this and a double drop.
pub(crate) struct RawSlot<T> {
    storage: UnsafeCell<MaybeUninit<T>>,
}

impl<T> RawSlot<T> {
    pub(crate) const fn new() -> Self {
        RawSlot {
            storage: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Safety: the slot must be empty, and the caller must hold exclusive
    /// write access as established by the surrounding synchronization.
    pub(crate) unsafe fn write(&self, value: T) {
        (*self.storage.get()).write(value);
    }

    /// Safety: the slot must hold a live `T` and the caller must hold
    /// exclusive access; the slot is empty afterwards.
    pub(crate) unsafe fn read(&self) -> T {
        (*self.storage.get()).assume_init_read()
    }

    /// Safety: as for [`read`](Self::read); drops in place instead of
    /// moving out.
    pub(crate) unsafe fn drop_in_place(&self) {
        (*self.storage.get()).assume_init_drop();
    }
}

// Safety: RawSlot itself is inert storage; the queues and lists that embed
// it publish writes with release stores before any other thread reads.
unsafe impl<T: Send> Send for RawSlot<T> {}
unsafe impl<T: Send> Sync for RawSlot<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_construct_then_destroy_returns_to_empty() {
        let mut cell = InlineCell::new();
        assert!(!cell.has_value());
        cell.construct(41);
        assert!(cell.has_value());
        assert_eq!(*cell.get(), 41);
        cell.destroy();
        assert!(!cell.has_value());
        // destroy on an empty cell is a no-op
        cell.destroy();
    }

    #[test]
    fn test_emplace_never_leaks_previous_occupant() {
        let token = Arc::new(());
        let mut cell = InlineCell::new();
        cell.construct(Arc::clone(&token));
        cell.emplace(Arc::clone(&token));
        assert_eq!(Arc::strong_count(&token), 2);
        drop(cell);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_steal_clears_the_flag() {
        let mut cell = InlineCell::new();
        cell.construct(String::from("payload"));
        let s = cell.steal();
        assert_eq!(s, "payload");
        assert!(!cell.has_value());
        assert_eq!(cell.take(), None);
    }

    #[test]
    #[should_panic(expected = "construct called on an occupied cell")]
    fn test_construct_twice_panics() {
        let mut cell = InlineCell::new();
        cell.construct(1);
        cell.construct(2);
    }

    #[test]
    fn test_replace_and_get_or_construct() {
        let mut cell = InlineCell::new();
        assert_eq!(cell.replace(1), None);
        assert_eq!(cell.replace(2), Some(1));

        assert_eq!(*cell.get_or_construct(|| 99), 2);
        cell.destroy();
        assert_eq!(*cell.get_or_construct(|| 99), 99);
    }

    #[test]
    fn test_drop_runs_occupant_destructor() {
        let token = Arc::new(());
        {
            let mut cell = InlineCell::new();
            cell.construct(Arc::clone(&token));
            assert_eq!(Arc::strong_count(&token), 2);
        }
        assert_eq!(Arc::strong_count(&token), 1);
    }
}
