#![allow(unsafe_op_in_unsafe_fn)]

//! Fork/join result collection.
//!
//! An [`Aggregator`] owns one slot per parallel branch, pre-seeded with a
//! default fault so an unfinished slot still reads as a defined (error)
//! value. Each branch gets a [`Delegate`] that may publish exactly once;
//! readiness is observable per slot, as any, or as all. No waiting policy
//! is provided — spin, yield, poll from an event loop, or park on your own
//! condition variable around [`is_all_ready`](Aggregator::is_all_ready).
//! The aggregator supplies the mechanism, callers pick the policy.

use crate::outcome::Outcome;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Highest supported branch count.
pub const MAX_ARITY: usize = 4;

/// A tuple of `Outcome`s usable as aggregator storage.
///
/// Implemented for tuples of arity 1 through [`MAX_ARITY`] whose fault
/// arms are `Default` (the seed value of an unpublished slot).
pub trait OutcomeTuple: Send + 'static {
    const ARITY: usize;

    /// The pre-publication state: every slot a default fault.
    fn seeded() -> Self;
}

/// Typed access to slot `I` of an outcome tuple.
pub trait TupleSlot<const I: usize>: OutcomeTuple {
    type Value: Send + 'static;
    type Fault: Send + 'static;

    /// Safety: the caller must hold exclusive access to slot `I` of the
    /// tuple behind `ptr` (the aggregator's claim protocol provides it).
    unsafe fn write_slot(ptr: *mut Self, value: Outcome<Self::Value, Self::Fault>);
}

macro_rules! impl_outcome_tuple {
    ($arity:expr, <$($V:ident, $F:ident),+>) => {
        impl<$($V: Send + 'static, $F: Default + Send + 'static),+> OutcomeTuple
            for ($(Outcome<$V, $F>,)+)
        {
            const ARITY: usize = $arity;

            fn seeded() -> Self {
                ($(Outcome::<$V, $F>::fault(<$F>::default()),)+)
            }
        }
    };
}

macro_rules! impl_tuple_slot {
    ($idx:tt, $VS:ident, $FS:ident, <$($V:ident, $F:ident),+>) => {
        impl<$($V: Send + 'static, $F: Default + Send + 'static),+> TupleSlot<$idx>
            for ($(Outcome<$V, $F>,)+)
        {
            type Value = $VS;
            type Fault = $FS;

            unsafe fn write_slot(ptr: *mut Self, value: Outcome<$VS, $FS>) {
                (*ptr).$idx = value;
            }
        }
    };
}

impl_outcome_tuple!(1, <V0, F0>);
impl_outcome_tuple!(2, <V0, F0, V1, F1>);
impl_outcome_tuple!(3, <V0, F0, V1, F1, V2, F2>);
impl_outcome_tuple!(4, <V0, F0, V1, F1, V2, F2, V3, F3>);

impl_tuple_slot!(0, V0, F0, <V0, F0>);

impl_tuple_slot!(0, V0, F0, <V0, F0, V1, F1>);
impl_tuple_slot!(1, V1, F1, <V0, F0, V1, F1>);

impl_tuple_slot!(0, V0, F0, <V0, F0, V1, F1, V2, F2>);
impl_tuple_slot!(1, V1, F1, <V0, F0, V1, F1, V2, F2>);
impl_tuple_slot!(2, V2, F2, <V0, F0, V1, F1, V2, F2>);

impl_tuple_slot!(0, V0, F0, <V0, F0, V1, F1, V2, F2, V3, F3>);
impl_tuple_slot!(1, V1, F1, <V0, F0, V1, F1, V2, F2, V3, F3>);
impl_tuple_slot!(2, V2, F2, <V0, F0, V1, F1, V2, F2, V3, F3>);
impl_tuple_slot!(3, V3, F3, <V0, F0, V1, F1, V2, F2, V3, F3>);

/// Shared state, cache-line aligned on the heap behind an `Arc`.
#[repr(align(128))]
struct AggState<Tup> {
    ready_count: CachePadded<AtomicUsize>,

    /// Set when a delegate for the slot has been handed out.
    claimed: [AtomicBool; MAX_ARITY],

    /// Set (release) once the slot's value is published.
    ready: [AtomicBool; MAX_ARITY],

    values: UnsafeCell<Tup>,
}

// Safety: slots are written only by the holder of the slot's claim, and
// read only after the ready publication is observed with acquire.
unsafe impl<Tup: Send> Send for AggState<Tup> {}
unsafe impl<Tup: Send + Sync> Sync for AggState<Tup> {}

/// N-slot collector for the outcomes of parallel flows.
pub struct Aggregator<Tup: OutcomeTuple> {
    state: Arc<AggState<Tup>>,
}

impl<Tup: OutcomeTuple> fmt::Debug for Aggregator<Tup> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator").finish_non_exhaustive()
    }
}

impl<Tup: OutcomeTuple> Aggregator<Tup> {
    const ARITY_OK: () = assert!(Tup::ARITY <= MAX_ARITY, "tuple arity exceeds MAX_ARITY");

    pub fn new() -> Self {
        let () = Self::ARITY_OK;
        Aggregator {
            state: Arc::new(AggState {
                ready_count: CachePadded::new(AtomicUsize::new(0)),
                claimed: [const { AtomicBool::new(false) }; MAX_ARITY],
                ready: [const { AtomicBool::new(false) }; MAX_ARITY],
                values: UnsafeCell::new(Tup::seeded()),
            }),
        }
    }

    /// Hands out the writer for slot `I`.
    ///
    /// Each slot has exactly one delegate; asking twice is a precondition
    /// violation and panics.
    pub fn delegate<const I: usize>(&self) -> Delegate<Tup, I>
    where
        Tup: TupleSlot<I>,
    {
        assert!(I < Tup::ARITY, "aggregator slot index out of range");
        let claimed = self.state.claimed[I].swap(true, Ordering::Relaxed);
        assert!(!claimed, "slot {I} already has a delegate");
        Delegate {
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_slot_ready<const I: usize>(&self) -> bool
    where
        Tup: TupleSlot<I>,
    {
        self.state.ready[I].load(Ordering::Acquire)
    }

    pub fn is_any_ready(&self) -> bool {
        self.value_got() != 0
    }

    pub fn is_all_ready(&self) -> bool {
        self.value_got() == Tup::ARITY
    }

    /// How many slots have published.
    pub fn value_got(&self) -> usize {
        self.state.ready_count.load(Ordering::Acquire)
    }

    /// The collected tuple, available once every slot has published.
    pub fn try_values(&self) -> Option<&Tup> {
        if self.is_all_ready() {
            // Safety: all writers have published (observed with acquire
            // through ready_count) and no writer can exist anymore.
            Some(unsafe { &*self.state.values.get() })
        } else {
            None
        }
    }

    /// Takes the tuple out, when all slots published and every delegate
    /// and aggregator clone is gone.
    pub fn try_into_values(self) -> Result<Tup, Self> {
        if !self.is_all_ready() {
            return Err(self);
        }
        match Arc::try_unwrap(self.state) {
            Ok(state) => Ok(state.values.into_inner()),
            Err(state) => Err(Aggregator { state }),
        }
    }
}

impl<Tup: OutcomeTuple> Default for Aggregator<Tup> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tup: OutcomeTuple> Clone for Aggregator<Tup> {
    fn clone(&self) -> Self {
        Aggregator {
            state: Arc::clone(&self.state),
        }
    }
}

/// The single writer for one aggregator slot.
///
/// Publishing consumes the delegate, so a slot is set at most once by
/// construction. A delegate dropped without publishing leaves its slot in
/// the seeded fault state and the aggregator never reports all-ready.
pub struct Delegate<Tup: TupleSlot<I>, const I: usize> {
    state: Arc<AggState<Tup>>,
}

impl<Tup: TupleSlot<I>, const I: usize> Delegate<Tup, I> {
    /// Publishes this slot's outcome: writes the value, releases the slot
    /// flag, then bumps the shared ready count.
    pub fn complete(self, outcome: Outcome<Tup::Value, Tup::Fault>) {
        // Safety: the claim protocol makes this delegate the slot's only
        // writer, and readers wait for the release publication below.
        unsafe { Tup::write_slot(self.state.values.get(), outcome) };
        self.state.ready[I].store(true, Ordering::Release);
        self.state.ready_count.fetch_add(1, Ordering::Release);
    }
}
