#![allow(unsafe_op_in_unsafe_fn)]

use crate::cell::RawSlot;
use crossbeam_utils::{Backoff, CachePadded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

struct Slot<T> {
    ready: AtomicU32,
    value: RawSlot<T>,
}

struct Inner<T, const N: usize> {
    slots: Box<[CachePadded<Slot<T>>]>,
}

impl<T, const N: usize> Inner<T, N> {
    const CAPACITY_OK: () = assert!(N > 0 && N.is_power_of_two(), "capacity must be a power of two");
    const MASK: usize = N - 1;
}

impl<T, const N: usize> Drop for Inner<T, N> {
    fn drop(&mut self) {
        // Both handles are gone; whatever is still published gets dropped.
        for slot in self.slots.iter() {
            if slot.ready.load(Ordering::Relaxed) != 0 {
                unsafe { slot.value.drop_in_place() };
            }
        }
    }
}

/// Creates a bounded single-producer/single-consumer ring of capacity `N`
/// (a power of two, checked at compile time).
///
/// Each side owns its own monotonic position; the only shared state is the
/// per-slot `ready` byte, published with release and observed with acquire,
/// which is what carries the value's happens-before edge.
pub fn channel<T: Send, const N: usize>() -> (SpscProducer<T, N>, SpscConsumer<T, N>) {
    let () = Inner::<T, N>::CAPACITY_OK;
    let inner = Arc::new(Inner {
        slots: (0..N)
            .map(|_| {
                CachePadded::new(Slot {
                    ready: AtomicU32::new(0),
                    value: RawSlot::new(),
                })
            })
            .collect(),
    });
    (
        SpscProducer {
            inner: Arc::clone(&inner),
            tail: 0,
        },
        SpscConsumer { inner, head: 0 },
    )
}

/// The writing half; not cloneable, movable across threads.
pub struct SpscProducer<T, const N: usize> {
    inner: Arc<Inner<T, N>>,
    tail: usize,
}

impl<T: Send, const N: usize> SpscProducer<T, N> {
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Publishes `value`, or hands it back when the ring is full.
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        let slot = &self.inner.slots[self.tail & Inner::<T, N>::MASK];
        if slot.ready.load(Ordering::Acquire) != 0 {
            return Err(value);
        }
        // Safety: ready == 0 means the consumer finished with this slot,
        // and we are the only producer.
        unsafe { slot.value.write(value) };
        slot.ready.store(1, Ordering::Release);
        self.tail += 1;
        Ok(())
    }

    /// Spins until a slot frees up.
    pub fn push_wait(&mut self, value: T) {
        let backoff = Backoff::new();
        let mut value = value;
        loop {
            match self.try_push(value) {
                Ok(()) => return,
                Err(v) => {
                    value = v;
                    backoff.snooze();
                }
            }
        }
    }
}

/// The reading half; not cloneable, movable across threads.
pub struct SpscConsumer<T, const N: usize> {
    inner: Arc<Inner<T, N>>,
    head: usize,
}

impl<T: Send, const N: usize> SpscConsumer<T, N> {
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Takes the oldest published value, if any.
    pub fn try_pop(&mut self) -> Option<T> {
        let slot = &self.inner.slots[self.head & Inner::<T, N>::MASK];
        if slot.ready.load(Ordering::Acquire) == 0 {
            return None;
        }
        // Safety: ready == 1 with acquire ordering means the producer's
        // write is visible, and we are the only consumer.
        let value = unsafe { slot.value.read() };
        slot.ready.store(0, Ordering::Release);
        self.head += 1;
        Some(value)
    }

    /// Spins until a value arrives.
    pub fn pop_wait(&mut self) -> T {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_pop() {
                return value;
            }
            backoff.snooze();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(SpscProducer<i32, 4>: Send);
    assert_impl_all!(SpscConsumer<i32, 4>: Send);

    #[test]
    fn test_capacity_four_fills_exactly() {
        let (mut tx, mut rx) = channel::<i32, 4>();
        for v in [1, 2, 3, 4] {
            assert!(tx.try_push(v).is_ok());
        }
        assert_eq!(tx.try_push(5), Err(5));

        for expected in [1, 2, 3, 4] {
            assert_eq!(rx.try_pop(), Some(expected));
        }
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn test_slot_reuse_after_pop() {
        let (mut tx, mut rx) = channel::<i32, 2>();
        tx.try_push(1).unwrap();
        tx.try_push(2).unwrap();
        assert_eq!(rx.try_pop(), Some(1));
        tx.try_push(3).unwrap();
        assert_eq!(rx.try_pop(), Some(2));
        assert_eq!(rx.try_pop(), Some(3));
    }

    #[test]
    fn test_drop_drains_unconsumed_values() {
        let token = std::sync::Arc::new(());
        let (mut tx, rx) = channel::<std::sync::Arc<()>, 4>();
        tx.try_push(std::sync::Arc::clone(&token)).unwrap();
        tx.try_push(std::sync::Arc::clone(&token)).unwrap();
        assert_eq!(std::sync::Arc::strong_count(&token), 3);
        drop(tx);
        drop(rx);
        assert_eq!(std::sync::Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_cross_thread_fifo_order() {
        const COUNT: usize = 100_000;
        let (mut tx, mut rx) = channel::<usize, 64>();

        let producer = std::thread::spawn(move || {
            for i in 0..COUNT {
                tx.push_wait(i);
            }
        });

        for expected in 0..COUNT {
            assert_eq!(rx.pop_wait(), expected);
        }
        producer.join().unwrap();
        assert_eq!(rx.try_pop(), None);
    }
}
