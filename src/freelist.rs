#![allow(unsafe_op_in_unsafe_fn)]

use crate::cell::RawSlot;
use crossbeam_utils::{Backoff, CachePadded};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free LIFO over a fixed array of nodes, linked by index.
///
/// Both list heads (the live list and the free list) are tagged 64-bit words
/// packing `(generation, index)`. The generation is rotated every time a
/// node is re-linked, which defeats ABA on the CAS loops without needing
/// double-word atomics. The index value `N` is the empty sentinel.
///
/// Capacity must be a power of two below 2^32; both are checked at compile
/// time.
pub struct StaticList<T, const N: usize> {
    head: CachePadded<AtomicU64>,
    free: CachePadded<AtomicU64>,
    nodes: Box<[ListNode<T>]>,
}

struct ListNode<T> {
    next: AtomicU64,
    slot: RawSlot<T>,
}

impl<T, const N: usize> StaticList<T, N> {
    const CAPACITY_OK: () = {
        assert!(N > 0 && N.is_power_of_two(), "capacity must be a power of two");
        assert!(N < (1 << 32), "capacity must fit a 32-bit index");
    };

    /// Bits reserved for the index arm of a tag: enough for `0..=N`, where
    /// `N` itself is the empty sentinel.
    const OFF: u32 = (N as u64).trailing_zeros() + 1;
    const IDX_MASK: u64 = (1u64 << Self::OFF) - 1;
    const SEQ_MASK: u64 = u64::MAX >> Self::OFF;
    const EMPTY: u64 = N as u64;

    fn make_tag(seq: u64, idx: u64) -> u64 {
        (seq << Self::OFF) | idx
    }

    fn tag_seq(tag: u64) -> u64 {
        (tag >> Self::OFF) & Self::SEQ_MASK
    }

    fn tag_idx(tag: u64) -> u64 {
        tag & Self::IDX_MASK
    }

    /// Creates a list with every node on the free list.
    pub fn new() -> Self {
        let () = Self::CAPACITY_OK;

        let nodes = (0..N)
            .map(|i| ListNode {
                // Initial free chain: node i links to i + 1; the last node
                // links to the empty sentinel.
                next: AtomicU64::new(i as u64 + 1),
                slot: RawSlot::new(),
            })
            .collect();

        StaticList {
            head: CachePadded::new(AtomicU64::new(Self::EMPTY)),
            free: CachePadded::new(AtomicU64::new(Self::make_tag(0, 0))),
            nodes,
        }
    }

    /// Unlinks the top node of `list`, returning its tag, or the empty
    /// sentinel.
    fn pop_from(&self, list: &AtomicU64) -> u64 {
        let backoff = Backoff::new();
        let mut cur = list.load(Ordering::Acquire);
        loop {
            if Self::tag_idx(cur) == Self::EMPTY {
                return Self::EMPTY;
            }

            let idx = Self::tag_idx(cur) as usize;
            let next = self.nodes[idx].next.load(Ordering::Relaxed);
            match list.compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return cur,
                Err(observed) => {
                    cur = observed;
                    backoff.spin();
                }
            }
        }
    }

    /// Links the node named by `tag` as the new top of `list`.
    fn append_to(&self, list: &AtomicU64, tag: u64) {
        let idx = Self::tag_idx(tag) as usize;
        let backoff = Backoff::new();
        let mut cur = list.load(Ordering::Acquire);
        loop {
            self.nodes[idx].next.store(cur, Ordering::Relaxed);
            match list.compare_exchange_weak(cur, tag, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(observed) => {
                    cur = observed;
                    backoff.spin();
                }
            }
        }
    }

    /// Moves `value` onto the list. Fails (handing the value back) when all
    /// `N` nodes are in use.
    pub fn push(&self, value: T) -> Result<(), T> {
        let tag = self.pop_from(&self.free);
        if Self::tag_idx(tag) == Self::EMPTY {
            return Err(value);
        }

        let seq = Self::tag_seq(tag);
        let idx = Self::tag_idx(tag);
        // Safety: the node was unlinked from the free list, so this thread
        // has exclusive access and the slot is empty.
        unsafe { self.nodes[idx as usize].slot.write(value) };

        // Rotate the generation as the node changes lists.
        self.append_to(&self.head, Self::make_tag((seq + 1) & Self::SEQ_MASK, idx));
        Ok(())
    }

    /// Detaches and returns the most recently pushed value, if any.
    pub fn pop(&self) -> Option<T> {
        let tag = self.pop_from(&self.head);
        if Self::tag_idx(tag) == Self::EMPTY {
            return None;
        }

        let idx = Self::tag_idx(tag);
        // Safety: unlinked from the live list, exclusive access, slot full.
        let value = unsafe { self.nodes[idx as usize].slot.read() };

        self.append_to(&self.free, Self::make_tag(Self::tag_seq(tag), idx));
        Some(value)
    }

    /// Approximate: another thread may link or unlink concurrently. Only
    /// meaningful for observability.
    pub fn is_empty(&self) -> bool {
        Self::tag_idx(self.head.load(Ordering::Relaxed)) == Self::EMPTY
    }
}

impl<T, const N: usize> Default for StaticList<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for StaticList<T, N> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_push_pop_is_lifo() {
        let list: StaticList<i32, 8> = StaticList::new();
        assert!(list.is_empty());
        for i in 0..4 {
            list.push(i).unwrap();
        }
        for i in (0..4).rev() {
            assert_eq!(list.pop(), Some(i));
        }
        assert_eq!(list.pop(), None);
    }

    #[test]
    fn test_exhaustion_hands_value_back() {
        let list: StaticList<String, 2> = StaticList::new();
        list.push("a".into()).unwrap();
        list.push("b".into()).unwrap();
        let rejected = list.push("c".into()).unwrap_err();
        assert_eq!(rejected, "c");

        assert_eq!(list.pop().as_deref(), Some("b"));
        list.push("d".into()).unwrap();
    }

    #[test]
    fn test_drop_drains_live_nodes() {
        let token = Arc::new(());
        {
            let list: StaticList<Arc<()>, 4> = StaticList::new();
            list.push(Arc::clone(&token)).unwrap();
            list.push(Arc::clone(&token)).unwrap();
            assert_eq!(Arc::strong_count(&token), 3);
        }
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_concurrent_recycle_loses_nothing() {
        const PER_THREAD: usize = 2_000;
        let list: Arc<StaticList<usize, 64>> = Arc::new(StaticList::new());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let list = Arc::clone(&list);
                std::thread::spawn(move || {
                    let mut reclaimed = Vec::new();
                    for i in 0..PER_THREAD {
                        let value = t * PER_THREAD + i;
                        // Contend on both lists: push, then immediately try
                        // to take something back.
                        while list.push(value).is_err() {
                            if let Some(v) = list.pop() {
                                reclaimed.push(v);
                            }
                        }
                        if let Some(v) = list.pop() {
                            reclaimed.push(v);
                        }
                    }
                    reclaimed
                })
            })
            .collect();

        let mut seen: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        while let Some(v) = list.pop() {
            seen.push(v);
        }

        // Every pushed value observed exactly once.
        assert_eq!(seen.len(), 4 * PER_THREAD);
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(unique.len(), 4 * PER_THREAD);
    }
}
