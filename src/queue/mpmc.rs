#![allow(unsafe_op_in_unsafe_fn)]

use crate::cell::RawSlot;
use crossbeam_utils::{Backoff, CachePadded};
use std::sync::atomic::{AtomicUsize, Ordering};

struct SeqSlot<T> {
    /// Generation-counting state word: even = empty at generation
    /// `seq >> 1`, odd = full at that generation. Producers and consumers
    /// observe each other through this, not through the cursors.
    seq: AtomicUsize,
    value: RawSlot<T>,
}

/// Bounded multi-producer/multi-consumer ring of capacity `N` (a power of
/// two, checked at compile time).
///
/// A producer at position `i` expects its slot to read `(i / N) << 1` and
/// publishes `seq + 1` with release after writing; a consumer expects the
/// odd successor and publishes the next even generation after reading. A
/// negative signed distance between the observed and expected sequence
/// means full (producer side) or empty (consumer side).
pub struct MpmcQueue<T, const N: usize> {
    slots: Box<[CachePadded<SeqSlot<T>>]>,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

impl<T: Send, const N: usize> MpmcQueue<T, N> {
    const CAPACITY_OK: () = assert!(N > 0 && N.is_power_of_two(), "capacity must be a power of two");
    const MASK: usize = N - 1;

    pub fn new() -> Self {
        let () = Self::CAPACITY_OK;
        MpmcQueue {
            slots: (0..N)
                .map(|_| {
                    CachePadded::new(SeqSlot {
                        seq: AtomicUsize::new(0),
                        value: RawSlot::new(),
                    })
                })
                .collect(),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Single claim attempt. Fails when the ring is full or another
    /// producer won the slot race.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail & Self::MASK];
        let seq = slot.seq.load(Ordering::Acquire);
        let expected = (tail / N) << 1;

        if (seq as isize).wrapping_sub(expected as isize) < 0 {
            return Err(value);
        }
        if seq == expected
            && self
                .tail
                .compare_exchange(tail, tail + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            // Safety: winning the CAS at an even generation grants this
            // producer exclusive ownership of the slot.
            unsafe { slot.value.write(value) };
            slot.seq.store(expected + 1, Ordering::Release);
            return Ok(());
        }
        Err(value)
    }

    /// Spins until a slot is claimed.
    pub fn push_wait(&self, value: T) {
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

    /// Single claim attempt; `None` when the ring is empty or another
    /// consumer won the slot race.
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[head & Self::MASK];
        let seq = slot.seq.load(Ordering::Acquire);
        let expected = ((head / N) << 1) + 1;

        if (seq as isize).wrapping_sub(expected as isize) < 0 {
            return None;
        }
        if seq == expected
            && self
                .head
                .compare_exchange(head, head + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            // Safety: winning the CAS at an odd generation grants this
            // consumer exclusive ownership of the full slot.
            let value = unsafe { slot.value.read() };
            slot.seq.store(expected + 1, Ordering::Release);
            return Some(value);
        }
        None
    }

    /// Spins until a value arrives.
    pub fn pop_wait(&self) -> T {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_pop() {
                return value;
            }
            backoff.snooze();
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Approximate: both cursors may move concurrently. Observability only.
    pub fn len(&self) -> usize {
        self.tail
            .load(Ordering::Relaxed)
            .wrapping_sub(self.head.load(Ordering::Relaxed))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send, const N: usize> Default for MpmcQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for MpmcQueue<T, N> {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            if slot.seq.load(Ordering::Relaxed) & 1 == 1 {
                unsafe { slot.value.drop_in_place() };
            }
        }
    }
}
