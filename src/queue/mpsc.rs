#![allow(unsafe_op_in_unsafe_fn)]

use crate::cell::RawSlot;
use crate::utils::spin_pause;
use crossbeam_utils::{Backoff, CachePadded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Producers that lose a slot race give up after this many attempts on the
/// try path.
const MAX_TRY_RETRY: usize = 8;

struct Slot<T> {
    ready: AtomicU32,
    value: RawSlot<T>,
}

struct Inner<T, const N: usize> {
    tail: CachePadded<AtomicUsize>,
    slots: Box<[CachePadded<Slot<T>>]>,
}

impl<T, const N: usize> Inner<T, N> {
    const CAPACITY_OK: () = assert!(N > 0 && N.is_power_of_two(), "capacity must be a power of two");
    const MASK: usize = N - 1;
}

impl<T, const N: usize> Drop for Inner<T, N> {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            if slot.ready.load(Ordering::Relaxed) != 0 {
                unsafe { slot.value.drop_in_place() };
            }
        }
    }
}

/// Creates a bounded multi-producer/single-consumer ring of capacity `N`.
///
/// Producers race to claim a tail index with a weak CAS and then publish
/// their slot's `ready` byte with release; the consumer walks slots in
/// ascending order waiting on `ready` with acquire. Producers observe each
/// other through the slot bytes, not the tail counter alone.
pub fn channel<T: Send, const N: usize>() -> (MpscSender<T, N>, MpscReceiver<T, N>) {
    let () = Inner::<T, N>::CAPACITY_OK;
    let inner = Arc::new(Inner {
        tail: CachePadded::new(AtomicUsize::new(0)),
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
        MpscSender {
            inner: Arc::clone(&inner),
        },
        MpscReceiver { inner, head: 0 },
    )
}

/// A producer handle; clone one per producing thread.
pub struct MpscSender<T, const N: usize> {
    inner: Arc<Inner<T, N>>,
}

impl<T, const N: usize> Clone for MpscSender<T, N> {
    fn clone(&self) -> Self {
        MpscSender {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send, const N: usize> MpscSender<T, N> {
    /// Publishes `value`, giving up (and handing it back) after a bounded
    /// number of claim attempts when the ring is full or heavily contended.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut value = value;
        for _ in 0..MAX_TRY_RETRY {
            match self.claim_once(value) {
                Ok(()) => return Ok(()),
                Err(v) => value = v,
            }
            spin_pause();
        }
        Err(value)
    }

    /// Spins until a slot is claimed.
    pub fn push_wait(&self, value: T) {
        let backoff = Backoff::new();
        let mut value = value;
        loop {
            match self.claim_once(value) {
                Ok(()) => return,
                Err(v) => value = v,
            }
            backoff.snooze();
        }
    }

    /// One claim attempt; on failure nothing happened and the value comes
    /// back.
    fn claim_once(&self, value: T) -> Result<(), T> {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let slot = &self.inner.slots[tail & Inner::<T, N>::MASK];
        if slot.ready.load(Ordering::Acquire) == 0
            && self
                .inner
                .tail
                .compare_exchange_weak(tail, tail + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            // Safety: the CAS made this producer the unique owner of the
            // claimed index, and ready == 0 means the consumer is done
            // with the slot.
            unsafe { slot.value.write(value) };
            slot.ready.store(1, Ordering::Release);
            Ok(())
        } else {
            Err(value)
        }
    }
}

/// The single consumer; reads slots in claim order.
pub struct MpscReceiver<T, const N: usize> {
    inner: Arc<Inner<T, N>>,
    head: usize,
}

impl<T: Send, const N: usize> MpscReceiver<T, N> {
    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn try_pop(&mut self) -> Option<T> {
        let slot = &self.inner.slots[self.head & Inner::<T, N>::MASK];
        if slot.ready.load(Ordering::Acquire) == 0 {
            return None;
        }
        let value = unsafe { slot.value.read() };
        slot.ready.store(0, Ordering::Release);
        self.head += 1;
        Some(value)
    }

    pub fn pop_wait(&mut self) -> T {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_pop() {
                return value;
            }
            backoff.snooze();
        }
    }

    /// Approximate occupancy; only the consumer's own view is exact.
    pub fn len(&self) -> usize {
        self.inner.tail.load(Ordering::Relaxed).wrapping_sub(self.head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::collections::HashSet;

    assert_impl_all!(MpscSender<i32, 4>: Send, Sync, Clone);
    assert_impl_all!(MpscReceiver<i32, 4>: Send);

    #[test]
    fn test_single_thread_round_trip() {
        let (tx, mut rx) = channel::<i32, 8>();
        tx.try_push(1).unwrap();
        tx.try_push(2).unwrap();
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.try_pop(), Some(1));
        assert_eq!(rx.try_pop(), Some(2));
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn test_full_ring_hands_value_back() {
        let (tx, _rx) = channel::<i32, 2>();
        tx.try_push(1).unwrap();
        tx.try_push(2).unwrap();
        assert_eq!(tx.try_push(3), Err(3));
    }

    #[test]
    fn test_multiple_producers_lose_nothing() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 25_000;
        let (tx, mut rx) = channel::<usize, 128>();

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let tx = tx.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        tx.push_wait(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut last_per_producer = vec![None::<usize>; PRODUCERS];
        for _ in 0..PRODUCERS * PER_PRODUCER {
            let v = rx.pop_wait();
            assert!(seen.insert(v), "duplicate value {v}");
            // Per-producer FIFO: values from one producer arrive in its
            // push order.
            let producer = v / PER_PRODUCER;
            if let Some(prev) = last_per_producer[producer] {
                assert!(v > prev, "producer {producer} reordered: {prev} then {v}");
            }
            last_per_producer[producer] = Some(v);
        }

        for h in handles {
            h.join().unwrap();
        }
        assert!(rx.is_empty());
    }
}
