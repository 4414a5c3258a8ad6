//! The transitions behind each builder adapter.
//!
//! Named structs rather than closures so the builder can spell out its
//! return types; each one implements [`Transition`] (or [`Terminate`] /
//! [`DispatchTask`]) for outcome-shaped payloads. Everything that runs
//! user code stops unwinds at its own boundary — the runner above never
//! sees a panic.

use super::node::{DispatchTask, Payload, Terminate, Transition};
use super::runner::CancelFault;
use crate::executor::Executor;
use crate::outcome::{Captured, Outcome, PanicFault};
use crate::task::TaskWrapper;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// The source node every blueprint starts from.
#[derive(Clone, Copy)]
pub struct Identity;

impl<I: Payload> Transition<I> for Identity {
    type Out = I;

    fn apply(self, input: I) -> I {
        input
    }
}

/// Two fused adjacent calc steps, applied first-then-second.
#[derive(Clone)]
pub struct Zip<F, G> {
    first: F,
    second: G,
}

impl<F, G> Zip<F, G> {
    pub(super) fn new(first: F, second: G) -> Self {
        Zip { first, second }
    }
}

impl<I, F, G> Transition<I> for Zip<F, G>
where
    F: Transition<I>,
    G: Transition<F::Out>,
{
    type Out = G::Out;

    fn apply(self, input: I) -> G::Out {
        self.second.apply(self.first.apply(input))
    }
}

/// `transform(f)`: maps the value arm, passes faults through untouched.
#[derive(Clone)]
pub struct MapValue<G> {
    g: G,
}

impl<G> MapValue<G> {
    pub(super) fn new(g: G) -> Self {
        MapValue { g }
    }
}

impl<T, E, U, G> Transition<Outcome<T, E>> for MapValue<G>
where
    G: FnOnce(T) -> U + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
    E: PanicFault + CancelFault + Send + 'static,
{
    type Out = Outcome<U, E>;

    fn apply(self, input: Outcome<T, E>) -> Outcome<U, E> {
        match input.into_result() {
            Ok(value) => {
                let g = self.g;
                match catch_unwind(AssertUnwindSafe(move || g(value))) {
                    Ok(out) => Outcome::value(out),
                    Err(payload) => Outcome::fault(E::captured(payload)),
                }
            }
            Err(fault) => Outcome::fault(fault),
        }
    }
}

/// `then(f)`: a fallible continuation. `f` sees the whole outcome on the
/// value arm and may produce either arm; an incoming fault passes through
/// without invoking `f`.
#[derive(Clone)]
pub struct Then<G> {
    g: G,
}

impl<G> Then<G> {
    pub(super) fn new(g: G) -> Self {
        Then { g }
    }
}

impl<T, E, U, G> Transition<Outcome<T, E>> for Then<G>
where
    G: FnOnce(Outcome<T, E>) -> Outcome<U, E> + Send + 'static,
    T: Send + 'static,
    U: Send + 'static,
    E: PanicFault + CancelFault + Send + 'static,
{
    type Out = Outcome<U, E>;

    fn apply(self, input: Outcome<T, E>) -> Outcome<U, E> {
        if input.has_fault() {
            return Outcome::fault(input.into_fault());
        }
        let g = self.g;
        match catch_unwind(AssertUnwindSafe(move || g(input))) {
            Ok(out) => out,
            Err(payload) => Outcome::fault(E::captured(payload)),
        }
    }
}

/// `on_error(f)`: recovery. Values pass through; `f` sees the fault
/// outcome and may recover it to a value.
#[derive(Clone)]
pub struct OnError<G> {
    g: G,
}

impl<G> OnError<G> {
    pub(super) fn new(g: G) -> Self {
        OnError { g }
    }
}

impl<T, E, G> Transition<Outcome<T, E>> for OnError<G>
where
    G: FnOnce(Outcome<T, E>) -> Outcome<T, E> + Send + 'static,
    T: Send + 'static,
    E: PanicFault + CancelFault + Send + 'static,
{
    type Out = Outcome<T, E>;

    fn apply(self, input: Outcome<T, E>) -> Outcome<T, E> {
        if input.has_value() {
            return input;
        }
        let g = self.g;
        match catch_unwind(AssertUnwindSafe(move || g(input))) {
            Ok(out) => out,
            Err(payload) => Outcome::fault(E::captured(payload)),
        }
    }
}

/// `catch_panic::<X>(f)`: recovers faults whose captured payload is an
/// `X`, promoting `f`'s result to the value arm; any other fault
/// (including cancellation) is re-raised downstream unchanged. Only exists
/// for the canonical [`Captured`](crate::outcome::Captured) error arm.
pub struct CatchPanic<X, G> {
    g: G,
    _x: PhantomData<fn() -> X>,
}

impl<X, G> CatchPanic<X, G> {
    pub(super) fn new(g: G) -> Self {
        CatchPanic {
            g,
            _x: PhantomData,
        }
    }
}

impl<X, G: Clone> Clone for CatchPanic<X, G> {
    fn clone(&self) -> Self {
        CatchPanic {
            g: self.g.clone(),
            _x: PhantomData,
        }
    }
}

impl<T, X, G> Transition<Outcome<T, Captured>> for CatchPanic<X, G>
where
    T: Send + 'static,
    X: Any + Send + 'static,
    G: FnOnce(X) -> T + Send + 'static,
{
    type Out = Outcome<T, Captured>;

    fn apply(self, input: Outcome<T, Captured>) -> Outcome<T, Captured> {
        let fault = match input {
            Outcome::Value(v) => return Outcome::value(v),
            Outcome::Fault(f) => f.into_inner(),
        };
        match fault.downcast::<X>() {
            Ok(payload) => {
                let g = self.g;
                match catch_unwind(AssertUnwindSafe(move || g(payload))) {
                    Ok(v) => Outcome::value(v),
                    Err(p) => Outcome::fault(Captured::captured(p)),
                }
            }
            Err(original) => Outcome::fault(original),
        }
    }
}

/// `via(executor)`: the dispatch half of a control node.
#[derive(Clone)]
pub struct ViaExec<Ex> {
    exec: Ex,
}

impl<Ex> ViaExec<Ex> {
    pub(super) fn new(exec: Ex) -> Self {
        ViaExec { exec }
    }
}

impl<Ex> DispatchTask for ViaExec<Ex>
where
    Ex: Executor + Send + 'static,
{
    fn dispatch(self, task: TaskWrapper) {
        self.exec.dispatch(task);
    }
}

/// `end()`: terminal sink that simply discards the final payload.
#[derive(Clone, Copy)]
pub struct EndIdentity;

impl<I: Payload> Terminate<I> for EndIdentity {
    fn finish(self, _input: I) {}
}

/// `end_with(f)`: terminal sink running a final observer. Its return
/// value is discarded and a panic out of it stops here.
#[derive(Clone)]
pub struct EndCall<G> {
    g: G,
}

impl<G> EndCall<G> {
    pub(super) fn new(g: G) -> Self {
        EndCall { g }
    }
}

impl<T, E, R, G> Terminate<Outcome<T, E>> for EndCall<G>
where
    G: FnOnce(Outcome<T, E>) -> R + Send + 'static,
    T: Send + 'static,
    E: CancelFault + Send + 'static,
    R: 'static,
{
    fn finish(self, input: Outcome<T, E>) {
        let g = self.g;
        let _ = catch_unwind(AssertUnwindSafe(move || g(input)));
    }
}
