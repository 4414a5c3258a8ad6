//! Typed dataflow blueprints.
//!
//! A blueprint is built left to right by chaining adapters onto
//! [`blueprint`] and sealed with [`end`](FlowBuilder::end); values then
//! flow through the nodes in append order, wrapped in an
//! [`Outcome`](crate::outcome::Outcome):
//!
//! ```
//! use weft::flow;
//! use weft::outcome::{Captured, Outcome};
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! let bp = flow::blueprint::<i32>()
//!     .transform(|v: i32| v + 1)
//!     .transform(|v: i32| v * 2)
//!     .end_with(move |out: Outcome<i32, Captured>| tx.send(out).unwrap());
//!
//! bp.runner().invoke(3);
//! assert_eq!(rx.recv().unwrap().into_value(), 8);
//! ```
//!
//! Composition is checked at compile time: each adapter must accept the
//! previous node's output type, appending after `end` is impossible (the
//! sealed [`Blueprint`](runner::Blueprint) has no adapter methods), and a
//! custom error arm must implement [`CancelFault`] (and
//! [`PanicFault`](crate::outcome::PanicFault)) before the flow will build.
//!
//! Two structural rules from the composition contract are applied while
//! building: adjacent calc adapters are fused pairwise into a single node
//! (observable behavior is unchanged, one dispatch is saved), and of two
//! adjacent `via` hand-offs only the later one survives.

pub mod adapt;
pub mod node;
pub mod runner;

mod aggregator;
pub use aggregator::{Aggregator, Delegate, OutcomeTuple, TupleSlot};

pub use node::{DispatchTask, Payload, Push, Stage, Terminate, Transition};
pub use runner::{Blueprint, CancelFault, CancelKind, Controller, FastRunner, Runner};

use crate::executor::Executor;
use crate::outcome::{Captured, Outcome};
use adapt::{CatchPanic, EndCall, EndIdentity, Identity, MapValue, OnError, Then, ViaExec, Zip};
use node::{CalcNode, ControlNode, EndNode, OpenEnd};
use std::any::Any;
use std::marker::PhantomData;

/// Shorthand for a chain with `N` appended at its open tail.
type Committed<C, N> = <C as Push<N>>::Out;

/// A blueprint under construction: the committed chain `C` plus the most
/// recently added node `P`, staged so the fusion and collapse rules can
/// inspect it before it is nailed down.
pub struct FlowBuilder<C, P> {
    chain: C,
    pending: P,
}

/// Staged calc node of fusion depth one.
pub struct PendCalc<I, F> {
    f: F,
    _in: PhantomData<fn(I)>,
}

/// Staged calc node of fusion depth two; the next calc starts a new node.
pub struct PendFused<I, F> {
    f: F,
    _in: PhantomData<fn(I)>,
}

/// Staged control node; payload type `I` passes through unchanged.
pub struct PendControl<I, D> {
    dispatch: D,
    _in: PhantomData<fn(I)>,
}

/// Starts a blueprint whose source accepts `T` and whose error arm is the
/// canonical [`Captured`] panic handle.
pub fn blueprint<T>() -> FlowBuilder<OpenEnd, PendCalc<Outcome<T, Captured>, Identity>> {
    blueprint_with::<T, Captured>()
}

/// Starts a blueprint over a custom error arm.
pub fn blueprint_with<T, E>() -> FlowBuilder<OpenEnd, PendCalc<Outcome<T, E>, Identity>> {
    FlowBuilder {
        chain: OpenEnd,
        pending: PendCalc {
            f: Identity,
            _in: PhantomData,
        },
    }
}

// Staged calc, depth one: a further calc adapter fuses into the staged
// node instead of starting a new one.
impl<C, I, F> FlowBuilder<C, PendCalc<I, F>>
where
    I: Payload,
    F: Transition<I>,
{
    /// Maps the value arm with `f`; faults pass through. A panic in `f`
    /// is captured into the fault arm.
    pub fn transform<G>(self, f: G) -> FlowBuilder<C, PendFused<I, Zip<F, MapValue<G>>>>
    where
        MapValue<G>: Transition<F::Out>,
    {
        FlowBuilder {
            chain: self.chain,
            pending: PendFused {
                f: Zip::new(self.pending.f, MapValue::new(f)),
                _in: PhantomData,
            },
        }
    }

    /// Fallible continuation over the whole outcome.
    pub fn then<G>(self, f: G) -> FlowBuilder<C, PendFused<I, Zip<F, Then<G>>>>
    where
        Then<G>: Transition<F::Out>,
    {
        FlowBuilder {
            chain: self.chain,
            pending: PendFused {
                f: Zip::new(self.pending.f, Then::new(f)),
                _in: PhantomData,
            },
        }
    }

    /// Recovery: `f` runs only on the fault arm.
    pub fn on_error<G>(self, f: G) -> FlowBuilder<C, PendFused<I, Zip<F, OnError<G>>>>
    where
        OnError<G>: Transition<F::Out>,
    {
        FlowBuilder {
            chain: self.chain,
            pending: PendFused {
                f: Zip::new(self.pending.f, OnError::new(f)),
                _in: PhantomData,
            },
        }
    }

    /// Recovers faults whose captured panic payload is an `X`.
    pub fn catch_panic<X, G>(self, f: G) -> FlowBuilder<C, PendFused<I, Zip<F, CatchPanic<X, G>>>>
    where
        X: Any + Send + 'static,
        CatchPanic<X, G>: Transition<F::Out>,
    {
        FlowBuilder {
            chain: self.chain,
            pending: PendFused {
                f: Zip::new(self.pending.f, CatchPanic::new(f)),
                _in: PhantomData,
            },
        }
    }

    /// Suspends here: the remainder of the flow will resume wherever
    /// `exec` runs its tasks.
    pub fn via<Ex>(
        self,
        exec: Ex,
    ) -> FlowBuilder<Committed<C, CalcNode<I, F, OpenEnd>>, PendControl<F::Out, ViaExec<Ex>>>
    where
        C: Push<CalcNode<I, F, OpenEnd>>,
        Ex: Executor + Send + 'static,
    {
        FlowBuilder {
            chain: self.chain.push(CalcNode::new(self.pending.f)),
            pending: PendControl {
                dispatch: ViaExec::new(exec),
                _in: PhantomData,
            },
        }
    }

    /// Seals the blueprint with a discarding terminal.
    pub fn end(
        self,
    ) -> Blueprint<Committed<Committed<C, CalcNode<I, F, OpenEnd>>, EndNode<F::Out, EndIdentity>>>
    where
        C: Push<CalcNode<I, F, OpenEnd>>,
        Committed<C, CalcNode<I, F, OpenEnd>>: Push<EndNode<F::Out, EndIdentity>>,
        Committed<Committed<C, CalcNode<I, F, OpenEnd>>, EndNode<F::Out, EndIdentity>>: Stage,
    {
        Blueprint::new(
            self.chain
                .push(CalcNode::new(self.pending.f))
                .push(EndNode::new(EndIdentity)),
        )
    }

    /// Seals the blueprint with an observing terminal sink.
    pub fn end_with<G>(
        self,
        f: G,
    ) -> Blueprint<Committed<Committed<C, CalcNode<I, F, OpenEnd>>, EndNode<F::Out, EndCall<G>>>>
    where
        C: Push<CalcNode<I, F, OpenEnd>>,
        EndCall<G>: Terminate<F::Out>,
        Committed<C, CalcNode<I, F, OpenEnd>>: Push<EndNode<F::Out, EndCall<G>>>,
        Committed<Committed<C, CalcNode<I, F, OpenEnd>>, EndNode<F::Out, EndCall<G>>>: Stage,
    {
        Blueprint::new(
            self.chain
                .push(CalcNode::new(self.pending.f))
                .push(EndNode::new(EndCall::new(f))),
        )
    }
}

// Staged calc, depth two: the fusion budget is spent, so a further calc
// adapter commits the staged node and starts a fresh one.
impl<C, I, F> FlowBuilder<C, PendFused<I, F>>
where
    I: Payload,
    F: Transition<I>,
{
    pub fn transform<G>(
        self,
        f: G,
    ) -> FlowBuilder<Committed<C, CalcNode<I, F, OpenEnd>>, PendCalc<F::Out, MapValue<G>>>
    where
        C: Push<CalcNode<I, F, OpenEnd>>,
        MapValue<G>: Transition<F::Out>,
    {
        FlowBuilder {
            chain: self.chain.push(CalcNode::new(self.pending.f)),
            pending: PendCalc {
                f: MapValue::new(f),
                _in: PhantomData,
            },
        }
    }

    pub fn then<G>(
        self,
        f: G,
    ) -> FlowBuilder<Committed<C, CalcNode<I, F, OpenEnd>>, PendCalc<F::Out, Then<G>>>
    where
        C: Push<CalcNode<I, F, OpenEnd>>,
        Then<G>: Transition<F::Out>,
    {
        FlowBuilder {
            chain: self.chain.push(CalcNode::new(self.pending.f)),
            pending: PendCalc {
                f: Then::new(f),
                _in: PhantomData,
            },
        }
    }

    pub fn on_error<G>(
        self,
        f: G,
    ) -> FlowBuilder<Committed<C, CalcNode<I, F, OpenEnd>>, PendCalc<F::Out, OnError<G>>>
    where
        C: Push<CalcNode<I, F, OpenEnd>>,
        OnError<G>: Transition<F::Out>,
    {
        FlowBuilder {
            chain: self.chain.push(CalcNode::new(self.pending.f)),
            pending: PendCalc {
                f: OnError::new(f),
                _in: PhantomData,
            },
        }
    }

    pub fn catch_panic<X, G>(
        self,
        f: G,
    ) -> FlowBuilder<Committed<C, CalcNode<I, F, OpenEnd>>, PendCalc<F::Out, CatchPanic<X, G>>>
    where
        C: Push<CalcNode<I, F, OpenEnd>>,
        X: Any + Send + 'static,
        CatchPanic<X, G>: Transition<F::Out>,
    {
        FlowBuilder {
            chain: self.chain.push(CalcNode::new(self.pending.f)),
            pending: PendCalc {
                f: CatchPanic::new(f),
                _in: PhantomData,
            },
        }
    }

    pub fn via<Ex>(
        self,
        exec: Ex,
    ) -> FlowBuilder<Committed<C, CalcNode<I, F, OpenEnd>>, PendControl<F::Out, ViaExec<Ex>>>
    where
        C: Push<CalcNode<I, F, OpenEnd>>,
        Ex: Executor + Send + 'static,
    {
        FlowBuilder {
            chain: self.chain.push(CalcNode::new(self.pending.f)),
            pending: PendControl {
                dispatch: ViaExec::new(exec),
                _in: PhantomData,
            },
        }
    }

    pub fn end(
        self,
    ) -> Blueprint<Committed<Committed<C, CalcNode<I, F, OpenEnd>>, EndNode<F::Out, EndIdentity>>>
    where
        C: Push<CalcNode<I, F, OpenEnd>>,
        Committed<C, CalcNode<I, F, OpenEnd>>: Push<EndNode<F::Out, EndIdentity>>,
        Committed<Committed<C, CalcNode<I, F, OpenEnd>>, EndNode<F::Out, EndIdentity>>: Stage,
    {
        Blueprint::new(
            self.chain
                .push(CalcNode::new(self.pending.f))
                .push(EndNode::new(EndIdentity)),
        )
    }

    pub fn end_with<G>(
        self,
        f: G,
    ) -> Blueprint<Committed<Committed<C, CalcNode<I, F, OpenEnd>>, EndNode<F::Out, EndCall<G>>>>
    where
        C: Push<CalcNode<I, F, OpenEnd>>,
        EndCall<G>: Terminate<F::Out>,
        Committed<C, CalcNode<I, F, OpenEnd>>: Push<EndNode<F::Out, EndCall<G>>>,
        Committed<Committed<C, CalcNode<I, F, OpenEnd>>, EndNode<F::Out, EndCall<G>>>: Stage,
    {
        Blueprint::new(
            self.chain
                .push(CalcNode::new(self.pending.f))
                .push(EndNode::new(EndCall::new(f))),
        )
    }
}

// Staged control node: a calc adapter commits it; another `via` replaces
// it (adjacent controls collapse, the later one wins).
impl<C, I, D> FlowBuilder<C, PendControl<I, D>>
where
    I: Payload,
{
    pub fn transform<G>(
        self,
        f: G,
    ) -> FlowBuilder<Committed<C, ControlNode<D, OpenEnd>>, PendCalc<I, MapValue<G>>>
    where
        C: Push<ControlNode<D, OpenEnd>>,
        MapValue<G>: Transition<I>,
    {
        FlowBuilder {
            chain: self.chain.push(ControlNode::new(self.pending.dispatch)),
            pending: PendCalc {
                f: MapValue::new(f),
                _in: PhantomData,
            },
        }
    }

    pub fn then<G>(
        self,
        f: G,
    ) -> FlowBuilder<Committed<C, ControlNode<D, OpenEnd>>, PendCalc<I, Then<G>>>
    where
        C: Push<ControlNode<D, OpenEnd>>,
        Then<G>: Transition<I>,
    {
        FlowBuilder {
            chain: self.chain.push(ControlNode::new(self.pending.dispatch)),
            pending: PendCalc {
                f: Then::new(f),
                _in: PhantomData,
            },
        }
    }

    pub fn on_error<G>(
        self,
        f: G,
    ) -> FlowBuilder<Committed<C, ControlNode<D, OpenEnd>>, PendCalc<I, OnError<G>>>
    where
        C: Push<ControlNode<D, OpenEnd>>,
        OnError<G>: Transition<I>,
    {
        FlowBuilder {
            chain: self.chain.push(ControlNode::new(self.pending.dispatch)),
            pending: PendCalc {
                f: OnError::new(f),
                _in: PhantomData,
            },
        }
    }

    pub fn catch_panic<X, G>(
        self,
        f: G,
    ) -> FlowBuilder<Committed<C, ControlNode<D, OpenEnd>>, PendCalc<I, CatchPanic<X, G>>>
    where
        C: Push<ControlNode<D, OpenEnd>>,
        X: Any + Send + 'static,
        CatchPanic<X, G>: Transition<I>,
    {
        FlowBuilder {
            chain: self.chain.push(ControlNode::new(self.pending.dispatch)),
            pending: PendCalc {
                f: CatchPanic::new(f),
                _in: PhantomData,
            },
        }
    }

    /// Replaces the staged hand-off: of two adjacent `via`s, the later
    /// executor wins.
    pub fn via<Ex>(self, exec: Ex) -> FlowBuilder<C, PendControl<I, ViaExec<Ex>>>
    where
        Ex: Executor + Send + 'static,
    {
        FlowBuilder {
            chain: self.chain,
            pending: PendControl {
                dispatch: ViaExec::new(exec),
                _in: PhantomData,
            },
        }
    }

    pub fn end(
        self,
    ) -> Blueprint<Committed<Committed<C, ControlNode<D, OpenEnd>>, EndNode<I, EndIdentity>>>
    where
        C: Push<ControlNode<D, OpenEnd>>,
        Committed<C, ControlNode<D, OpenEnd>>: Push<EndNode<I, EndIdentity>>,
        Committed<Committed<C, ControlNode<D, OpenEnd>>, EndNode<I, EndIdentity>>: Stage,
    {
        Blueprint::new(
            self.chain
                .push(ControlNode::new(self.pending.dispatch))
                .push(EndNode::new(EndIdentity)),
        )
    }

    pub fn end_with<G>(
        self,
        f: G,
    ) -> Blueprint<Committed<Committed<C, ControlNode<D, OpenEnd>>, EndNode<I, EndCall<G>>>>
    where
        C: Push<ControlNode<D, OpenEnd>>,
        EndCall<G>: Terminate<I>,
        Committed<C, ControlNode<D, OpenEnd>>: Push<EndNode<I, EndCall<G>>>,
        Committed<Committed<C, ControlNode<D, OpenEnd>>, EndNode<I, EndCall<G>>>: Stage,
    {
        Blueprint::new(
            self.chain
                .push(ControlNode::new(self.pending.dispatch))
                .push(EndNode::new(EndCall::new(f))),
        )
    }
}
