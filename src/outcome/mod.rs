//! Two-state result carrier.
//!
//! [`Outcome`] is the value that flows along a blueprint: either a value or
//! a [`Fault`]. It differs from [`std::result::Result`] in the contracts the
//! flow machinery relies on: the fault arm is a distinct wrapper type so the
//! two arms can never be confused when `T` and `E` overlap, accessors are
//! precondition-checked rather than `Option`-returning, and in-place
//! replacement is part of the surface.

mod captured;
pub use captured::{Captured, PanicFault};

use std::fmt;

/// Wrapper for the error arm of an [`Outcome`].
///
/// Has no empty state: constructing one requires an `E`. Keeping the error
/// behind a wrapper means `Outcome<T, E>` construction is unambiguous even
/// when `T` and `E` are the same type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fault<E>(E);

impl<E> Fault<E> {
    pub fn new(error: E) -> Self {
        Fault(error)
    }

    pub fn get(&self) -> &E {
        &self.0
    }

    pub fn get_mut(&mut self) -> &mut E {
        &mut self.0
    }

    pub fn into_inner(self) -> E {
        self.0
    }
}

impl<E: fmt::Debug> fmt::Debug for Fault<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fault").field(&self.0).finish()
    }
}

/// A value or a fault; never empty, exactly one arm live.
///
/// `T` may be `()` for flows that carry no payload. Reassignment and
/// [`swap`](Outcome::swap) are plain moves, so replacement always provides
/// the strong guarantee.
#[derive(Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Value(T),
    Fault(Fault<E>),
}

impl<T, E> Outcome<T, E> {
    /// Constructs the value arm.
    pub fn value(value: T) -> Self {
        Outcome::Value(value)
    }

    /// Constructs the fault arm from a bare error.
    pub fn fault(error: E) -> Self {
        Outcome::Fault(Fault::new(error))
    }

    pub fn has_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn has_fault(&self) -> bool {
        !self.has_value()
    }

    /// Precondition: `has_value()`.
    pub fn value_ref(&self) -> &T {
        match self {
            Outcome::Value(v) => v,
            Outcome::Fault(_) => panic!("value_ref called on a fault outcome"),
        }
    }

    /// Precondition: `has_value()`.
    pub fn value_mut(&mut self) -> &mut T {
        match self {
            Outcome::Value(v) => v,
            Outcome::Fault(_) => panic!("value_mut called on a fault outcome"),
        }
    }

    /// Precondition: `has_fault()`.
    pub fn fault_ref(&self) -> &E {
        match self {
            Outcome::Fault(f) => f.get(),
            Outcome::Value(_) => panic!("fault_ref called on a value outcome"),
        }
    }

    /// Precondition: `has_fault()`.
    pub fn fault_mut(&mut self) -> &mut E {
        match self {
            Outcome::Fault(f) => f.get_mut(),
            Outcome::Value(_) => panic!("fault_mut called on a value outcome"),
        }
    }

    /// Precondition: `has_value()`.
    pub fn into_value(self) -> T {
        match self {
            Outcome::Value(v) => v,
            Outcome::Fault(_) => panic!("into_value called on a fault outcome"),
        }
    }

    /// Precondition: `has_fault()`.
    pub fn into_fault(self) -> E {
        match self {
            Outcome::Fault(f) => f.into_inner(),
            Outcome::Value(_) => panic!("into_fault called on a value outcome"),
        }
    }

    /// Bridges into the standard result type.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Fault(f) => Err(f.into_inner()),
        }
    }

    /// Replaces whatever arm is live with the value arm.
    pub fn emplace_value(&mut self, value: T) {
        *self = Outcome::Value(value);
    }

    /// Replaces whatever arm is live with the fault arm.
    pub fn emplace_fault(&mut self, error: E) {
        *self = Outcome::fault(error);
    }

    /// Converts both arms into wider types.
    pub fn widen<U, F>(self) -> Outcome<U, F>
    where
        U: From<T>,
        F: From<E>,
    {
        match self {
            Outcome::Value(v) => Outcome::Value(U::from(v)),
            Outcome::Fault(f) => Outcome::fault(F::from(f.into_inner())),
        }
    }

    /// Maps the value arm, leaving a fault untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U, E> {
        match self {
            Outcome::Value(v) => Outcome::Value(f(v)),
            Outcome::Fault(e) => Outcome::Fault(e),
        }
    }

    /// Maps the fault arm, leaving a value untouched.
    pub fn map_fault<F>(self, f: impl FnOnce(E) -> F) -> Outcome<T, F> {
        match self {
            Outcome::Value(v) => Outcome::Value(v),
            Outcome::Fault(e) => Outcome::fault(f(e.into_inner())),
        }
    }

    /// Chains a fallible continuation on the value arm.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U, E>) -> Outcome<U, E> {
        match self {
            Outcome::Value(v) => f(v),
            Outcome::Fault(e) => Outcome::Fault(e),
        }
    }

    /// Recovers the fault arm with a fallible handler.
    pub fn or_else(self, f: impl FnOnce(E) -> Outcome<T, E>) -> Outcome<T, E> {
        match self {
            Outcome::Value(v) => Outcome::Value(v),
            Outcome::Fault(e) => f(e.into_inner()),
        }
    }

    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(res: Result<T, E>) -> Self {
        match res {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::fault(e),
        }
    }
}

impl<T, E> From<Fault<E>> for Outcome<T, E> {
    fn from(fault: Fault<E>) -> Self {
        Outcome::Fault(fault)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Outcome<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Outcome::Fault(e) => f.debug_tuple("Fault").field(e.get()).finish(),
        }
    }
}
