#![allow(unsafe_op_in_unsafe_fn)]

//! Hazard-pointer reclamation.
//!
//! Readers pin a pointer by publishing it into one of a fixed set of
//! per-thread records; writers that want to free a shared object
//! [`retire`] it instead, and reclamation happens once no record points at
//! it. Deleters are type-erased noexcept closures
//! ([`Callable`](crate::task::Callable)) parked on a bounded
//! [`StaticList`](crate::freelist::StaticList); both stay off the global
//! allocator on the reclamation path thanks to the static
//! [`mempool`](crate::mempool).

use crate::freelist::StaticList;
use crate::task::Callable;
use crate::utils::current_thread_id;
use crossbeam_utils::CachePadded;
use std::ptr;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// Maximum number of concurrently live [`HazardPtr`] guards.
pub const MAX_SLOTS: usize = 128;

/// Retire-list capacity: twice the slot count, as in the reference sizing.
const RETIRE_CAPACITY: usize = MAX_SLOTS * 2;

/// Type-erased deleter: called exactly once with the retired pointer.
type Deleter = Callable<(*mut u8,), ()>;

struct HazardRecord {
    /// Owning thread id, 0 when vacant.
    tid: AtomicU64,
    /// The protected pointer, null when the owner is not reading.
    ptr: AtomicPtr<()>,
}

impl HazardRecord {
    const fn new() -> Self {
        HazardRecord {
            tid: AtomicU64::new(0),
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

static RECORDS: [CachePadded<HazardRecord>; MAX_SLOTS] =
    [const { CachePadded::new(HazardRecord::new()) }; MAX_SLOTS];

struct RetireNode {
    ptr: *mut u8,
    deleter: Deleter,
}

// Safety: the pointee is only touched through the deleter, which was
// Send-checked at retire time; the raw pointer itself is inert data here.
unsafe impl Send for RetireNode {}

impl RetireNode {
    fn reclaim(mut self) {
        self.deleter.call((self.ptr,));
    }
}

static RETIRED: LazyLock<StaticList<RetireNode, RETIRE_CAPACITY>> = LazyLock::new(StaticList::new);

fn acquire_record() -> Option<&'static CachePadded<HazardRecord>> {
    let tid = current_thread_id();
    RECORDS.iter().find(|record| {
        record
            .tid
            .compare_exchange(0, tid, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    })
}

/// Whether any record currently protects `p`.
pub fn is_hazard(p: *const ()) -> bool {
    RECORDS
        .iter()
        .any(|record| ptr::eq(record.ptr.load(Ordering::Acquire), p))
}

/// Number of entries parked on the retire list. Approximate; observability
/// only.
pub fn retired_len() -> usize {
    RETIRED_LEN.load(Ordering::Relaxed) as usize
}

static RETIRED_LEN: AtomicU64 = AtomicU64::new(0);

/// Hands `p` to the registry for deferred destruction via `Box::from_raw`.
///
/// Runs the drop immediately when no reader protects `p`.
pub fn retire<T: Send + 'static>(p: *mut T) {
    retire_with(p, |raw: *mut T| unsafe { drop(Box::from_raw(raw)) });
}

/// As [`retire`], with a caller-supplied deleter.
///
/// The deleter must not unwind; it may run on whichever thread sweeps.
pub fn retire_with<T, D>(p: *mut T, deleter: D)
where
    T: 'static,
    D: FnOnce(*mut T) + Send + 'static,
{
    if !is_hazard(p as *const ()) {
        deleter(p);
        return;
    }

    let mut once = Some(deleter);
    let erased: Deleter = Callable::new(move |raw: *mut u8| {
        if let Some(d) = once.take() {
            d(raw as *mut T);
        }
    });

    let mut node = RetireNode {
        ptr: p as *mut u8,
        deleter: erased,
    };
    // The list is sized so overflow means a backlog of reclaimable
    // entries; sweeping makes room.
    loop {
        match RETIRED.push(node) {
            Ok(()) => {
                RETIRED_LEN.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(back) => {
                node = back;
                sweep_and_reclaim();
            }
        }
    }
}

/// Detaches the retire list, reclaims every entry no longer protected, and
/// re-parks the rest. Returns the number of deleters run.
pub fn sweep_and_reclaim() -> usize {
    // Bounded drain: entries retired concurrently with this sweep are left
    // for the next one.
    let mut kept = Vec::new();
    let mut reclaimed = 0;
    for _ in 0..RETIRE_CAPACITY {
        let Some(node) = RETIRED.pop() else { break };
        RETIRED_LEN.fetch_sub(1, Ordering::Relaxed);
        if is_hazard(node.ptr as *const ()) {
            kept.push(node);
        } else {
            node.reclaim();
            reclaimed += 1;
        }
    }

    for node in kept {
        let mut node = node;
        // We popped at least this many entries, but concurrent retirers
        // may have raced for the freed capacity; spin until re-parked so
        // the deleter is never lost.
        loop {
            match RETIRED.push(node) {
                Ok(()) => {
                    RETIRED_LEN.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Err(back) => {
                    node = back;
                    crate::utils::spin_pause();
                }
            }
        }
    }
    reclaimed
}

/// A claimed registry slot, protecting at most one pointer at a time.
///
/// Construction claims one of [`MAX_SLOTS`] records for the calling
/// thread; when the registry is exhausted the guard is created
/// unavailable, and [`protect`](HazardPtr::protect) on it is a
/// precondition violation — check [`available`](HazardPtr::available)
/// first. The slot is released on drop.
pub struct HazardPtr {
    slot: Option<&'static CachePadded<HazardRecord>>,
}

impl HazardPtr {
    pub fn new() -> Self {
        HazardPtr {
            slot: acquire_record(),
        }
    }

    pub fn available(&self) -> bool {
        self.slot.is_some()
    }

    /// Re-attempts slot acquisition after an exhausted construction.
    pub fn reacquire(&mut self) -> bool {
        if self.slot.is_none() {
            self.slot = acquire_record();
        }
        self.available()
    }

    /// Publishes `p` as protected.
    ///
    /// Precondition: `available()`.
    pub fn protect(&self, p: *const ()) {
        let slot = self
            .slot
            .expect("hazard slots exhausted; check available() before protect");
        slot.ptr.store(p as *mut (), Ordering::Release);
    }

    /// Withdraws the current protection.
    pub fn unprotect(&self) {
        if let Some(slot) = self.slot {
            slot.ptr.store(ptr::null_mut(), Ordering::Release);
        }
    }

    /// Loads from `target` and protects the result, re-reading until the
    /// protected value is still current (the Michael protocol).
    ///
    /// Precondition: `available()`.
    pub fn acquire_protected<T>(&self, target: &AtomicPtr<T>) -> *mut T {
        loop {
            let p = target.load(Ordering::Acquire);
            self.protect(p as *const ());
            if ptr::eq(p, target.load(Ordering::Acquire)) {
                return p;
            }
        }
    }

    /// Clears the protection and returns the slot to the registry.
    pub fn release(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.ptr.store(ptr::null_mut(), Ordering::Release);
            slot.tid.store(0, Ordering::Release);
        }
    }
}

impl Default for HazardPtr {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HazardPtr {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests;
