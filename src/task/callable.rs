#![allow(unsafe_op_in_unsafe_fn)]

use super::{SboBuf, alloc_erased, fits_inline, free_erased};
use crate::outcome::{Captured, Outcome, PanicFault};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::NonNull;
use thiserror::Error;

/// Attempted to clone a [`Callable`] whose payload was installed without
/// clone support (or which is empty).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the stored invocable is not cloneable")]
pub struct NotCloneable;

/// Adapter from a tuple of arguments to an `FnMut` call.
///
/// [`Callable`] erases its payload down to `unsafe fn(*mut u8, Args) -> R`,
/// so the argument list must travel as a single value; this trait does the
/// un-tupling. Implemented for closures of arity 0 through 4.
pub trait TupleCall<Args> {
    type Output;
    fn invoke(&mut self, args: Args) -> Self::Output;
}

macro_rules! impl_tuple_call {
    ($(($($arg:ident : $ty:ident),*)),+ $(,)?) => {
        $(
            impl<Fun, Ret, $($ty),*> TupleCall<($($ty,)*)> for Fun
            where
                Fun: FnMut($($ty),*) -> Ret,
            {
                type Output = Ret;

                #[allow(non_snake_case, unused_variables)]
                fn invoke(&mut self, args: ($($ty,)*)) -> Ret {
                    let ($($arg,)*) = args;
                    self($($arg),*)
                }
            }
        )+
    };
}

impl_tuple_call! {
    (),
    (a: A),
    (a: A, b: B),
    (a: A, b: B, c: C),
    (a: A, b: B, c: C, d: D),
}

struct CallVtable<Args: 'static, R: 'static> {
    call: unsafe fn(*mut u8, Args) -> R,

    /// Present only when the payload was installed via
    /// [`Callable::cloneable`].
    clone: Option<unsafe fn(*const u8) -> Callable<Args, R>>,

    destroy: unsafe fn(*mut u8),
}

/// A reusable, type-erased invocable with signature `FnMut(Args...) -> R`.
///
/// Same storage scheme as [`TaskWrapper`](super::TaskWrapper) (64-byte
/// inline buffer, out-of-line fallback through the static pool), but
/// call-by-reference and therefore re-invocable. Copyability is opt-in:
/// payloads installed through [`cloneable`](Callable::cloneable) carry a
/// clone slot in their vtable, everything else reports [`NotCloneable`] at
/// [`try_clone`](Callable::try_clone).
///
/// The hazard registry's retire-list deleters are `Callable<(*mut u8,), ()>`.
pub struct Callable<Args: 'static, R: 'static> {
    buf: SboBuf,
    vtable: Option<&'static CallVtable<Args, R>>,
}

// Safety: construction requires the payload to be Send; Args/R only appear
// in the vtable's function signatures.
unsafe impl<Args, R> Send for Callable<Args, R> {}

impl<Args: 'static, R: 'static> Callable<Args, R> {
    pub const fn empty() -> Self {
        Callable {
            buf: SboBuf::new(),
            vtable: None,
        }
    }

    /// Erases `f` without clone support.
    pub fn new<F>(f: F) -> Self
    where
        F: TupleCall<Args, Output = R> + Send + 'static,
    {
        let mut callable = Self::empty();
        let vt = if const { fits_inline::<F>() } {
            vtable_inline::<F, Args, R>()
        } else {
            vtable_outline::<F, Args, R>()
        };
        callable.install(f, vt);
        callable
    }

    /// Erases `f`, keeping the ability to clone the stored payload.
    pub fn cloneable<F>(f: F) -> Self
    where
        F: TupleCall<Args, Output = R> + Clone + Send + 'static,
    {
        let mut callable = Self::empty();
        let vt = if const { fits_inline::<F>() } {
            vtable_inline_cloneable::<F, Args, R>()
        } else {
            vtable_outline_cloneable::<F, Args, R>()
        };
        callable.install(f, vt);
        callable
    }

    fn install<F>(&mut self, f: F, vt: &'static CallVtable<Args, R>)
    where
        F: TupleCall<Args, Output = R> + Send + 'static,
    {
        debug_assert!(self.vtable.is_none());
        if const { fits_inline::<F>() } {
            unsafe { self.buf.as_mut_ptr().cast::<F>().write(f) };
        } else {
            let ptr = alloc_erased(f);
            unsafe { self.buf.as_mut_ptr().cast::<*mut F>().write(ptr.as_ptr()) };
        }
        self.vtable = Some(vt);
    }

    pub fn is_empty(&self) -> bool {
        self.vtable.is_none()
    }

    pub fn has_value(&self) -> bool {
        !self.is_empty()
    }

    /// Invokes the stored payload.
    ///
    /// Precondition: `has_value()`.
    pub fn call(&mut self, args: Args) -> R {
        let vt = self.vtable.expect("calling an empty Callable");
        unsafe { (vt.call)(self.buf.as_mut_ptr(), args) }
    }

    /// Invokes the stored payload, capturing any panic into the fault arm.
    pub fn catch_call(&mut self, args: Args) -> Outcome<R, Captured> {
        match catch_unwind(AssertUnwindSafe(|| self.call(args))) {
            Ok(value) => Outcome::value(value),
            Err(payload) => Outcome::fault(Captured::captured(payload)),
        }
    }

    /// Duplicates the callable when the payload supports it.
    pub fn try_clone(&self) -> Result<Self, NotCloneable> {
        match self.vtable {
            None => Ok(Self::empty()),
            Some(vt) => match vt.clone {
                Some(clone) => Ok(unsafe { clone(self.buf.as_ptr()) }),
                None => Err(NotCloneable),
            },
        }
    }

    /// Destroys the stored payload, leaving the callable empty.
    pub fn clear(&mut self) {
        if let Some(vt) = self.vtable.take() {
            unsafe { (vt.destroy)(self.buf.as_mut_ptr()) };
        }
    }

    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }
}

impl<Args: 'static, R: 'static> Default for Callable<Args, R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<Args: 'static, R: 'static> Drop for Callable<Args, R> {
    fn drop(&mut self) {
        if let Some(vt) = self.vtable.take() {
            unsafe { (vt.destroy)(self.buf.as_mut_ptr()) };
        }
    }
}

impl<Args: 'static, R: 'static> fmt::Debug for Callable<Args, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_empty() {
            "Callable(<empty>)"
        } else {
            "Callable(<armed>)"
        })
    }
}

fn vtable_inline<F, Args, R>() -> &'static CallVtable<Args, R>
where
    F: TupleCall<Args, Output = R> + Send + 'static,
    Args: 'static,
    R: 'static,
{
    &CallVtable {
        call: call_inline::<F, Args>,
        clone: None,
        destroy: destroy_inline::<F>,
    }
}

fn vtable_inline_cloneable<F, Args, R>() -> &'static CallVtable<Args, R>
where
    F: TupleCall<Args, Output = R> + Clone + Send + 'static,
    Args: 'static,
    R: 'static,
{
    &CallVtable {
        call: call_inline::<F, Args>,
        clone: Some(clone_any::<F, Args, R>),
        destroy: destroy_inline::<F>,
    }
}

fn vtable_outline<F, Args, R>() -> &'static CallVtable<Args, R>
where
    F: TupleCall<Args, Output = R> + Send + 'static,
    Args: 'static,
    R: 'static,
{
    &CallVtable {
        call: call_outline::<F, Args>,
        clone: None,
        destroy: destroy_outline::<F>,
    }
}

fn vtable_outline_cloneable<F, Args, R>() -> &'static CallVtable<Args, R>
where
    F: TupleCall<Args, Output = R> + Clone + Send + 'static,
    Args: 'static,
    R: 'static,
{
    &CallVtable {
        call: call_outline::<F, Args>,
        clone: Some(clone_any::<F, Args, R>),
        destroy: destroy_outline::<F>,
    }
}

unsafe fn call_inline<F: TupleCall<Args>, Args>(buf: *mut u8, args: Args) -> F::Output {
    (*buf.cast::<F>()).invoke(args)
}

unsafe fn call_outline<F: TupleCall<Args>, Args>(buf: *mut u8, args: Args) -> F::Output {
    let ptr = buf.cast::<*mut F>().read();
    (*ptr).invoke(args)
}

unsafe fn destroy_inline<F>(buf: *mut u8) {
    buf.cast::<F>().drop_in_place();
}

unsafe fn destroy_outline<F>(buf: *mut u8) {
    let ptr = NonNull::new_unchecked(buf.cast::<*mut F>().read());
    ptr.as_ptr().drop_in_place();
    free_erased(ptr);
}

/// Clone slot shared by the inline and out-of-line vtables; locates the
/// payload by the same storage rule the other slots use.
unsafe fn clone_any<F, Args, R>(buf: *const u8) -> Callable<Args, R>
where
    F: TupleCall<Args, Output = R> + Clone + Send + 'static,
    Args: 'static,
    R: 'static,
{
    let payload: &F = if const { fits_inline::<F>() } {
        &*buf.cast::<F>()
    } else {
        &*buf.cast::<*const F>().read()
    };
    Callable::cloneable(payload.clone())
}

/// Shared-call counterpart of [`TupleCall`]: invocation through `&self`.
///
/// This is what a `const`-qualified call signature becomes in Rust: the
/// payload promises not to mutate, so the erased container can be invoked
/// through a shared reference (and, with a `Sync` payload, from several
/// threads at once).
pub trait TupleCallShared<Args>: TupleCall<Args> {
    fn invoke_shared(&self, args: Args) -> Self::Output;
}

macro_rules! impl_tuple_call_shared {
    ($(($($arg:ident : $ty:ident),*)),+ $(,)?) => {
        $(
            impl<Fun, Ret, $($ty),*> TupleCallShared<($($ty,)*)> for Fun
            where
                Fun: Fn($($ty),*) -> Ret,
            {
                #[allow(non_snake_case, unused_variables)]
                fn invoke_shared(&self, args: ($($ty,)*)) -> Ret {
                    let ($($arg,)*) = args;
                    self($($arg),*)
                }
            }
        )+
    };
}

impl_tuple_call_shared! {
    (),
    (a: A),
    (a: A, b: B),
    (a: A, b: B, c: C),
    (a: A, b: B, c: C, d: D),
}

struct SharedCallVtable<Args: 'static, R: 'static> {
    call: unsafe fn(*const u8, Args) -> R,
    clone: unsafe fn(*const u8) -> SharedCallable<Args, R>,
    destroy: unsafe fn(*mut u8),
}

/// A type-erased `Fn(Args...) -> R`, invocable through `&self`.
///
/// The immutable sibling of [`Callable`]: same storage scheme, but the
/// payload is required to be `Fn` (and `Clone`), so calls never need
/// exclusive access and every `SharedCallable` is cloneable. Use this
/// where the same erased function is invoked from several places — the
/// mutable variant stays the right tool for stateful payloads.
pub struct SharedCallable<Args: 'static, R: 'static> {
    buf: SboBuf,
    vtable: Option<&'static SharedCallVtable<Args, R>>,
}

// Safety: construction requires the payload to be Send + Sync, and
// shared calls go through `&self` only.
unsafe impl<Args, R> Send for SharedCallable<Args, R> {}
unsafe impl<Args, R> Sync for SharedCallable<Args, R> {}

impl<Args: 'static, R: 'static> SharedCallable<Args, R> {
    pub const fn empty() -> Self {
        SharedCallable {
            buf: SboBuf::new(),
            vtable: None,
        }
    }

    pub fn new<F>(f: F) -> Self
    where
        F: TupleCallShared<Args, Output = R> + Clone + Send + Sync + 'static,
    {
        let mut callable = Self::empty();
        if const { fits_inline::<F>() } {
            unsafe { callable.buf.as_mut_ptr().cast::<F>().write(f) };
            callable.vtable = Some(shared_vtable_inline::<F, Args, R>());
        } else {
            let ptr = alloc_erased(f);
            unsafe {
                callable
                    .buf
                    .as_mut_ptr()
                    .cast::<*mut F>()
                    .write(ptr.as_ptr())
            };
            callable.vtable = Some(shared_vtable_outline::<F, Args, R>());
        }
        callable
    }

    pub fn is_empty(&self) -> bool {
        self.vtable.is_none()
    }

    pub fn has_value(&self) -> bool {
        !self.is_empty()
    }

    /// Invokes the stored payload through a shared reference.
    ///
    /// Precondition: `has_value()`.
    pub fn call(&self, args: Args) -> R {
        let vt = self.vtable.expect("calling an empty SharedCallable");
        unsafe { (vt.call)(self.buf.as_ptr(), args) }
    }

    /// Invokes the stored payload, capturing any panic into the fault arm.
    pub fn catch_call(&self, args: Args) -> Outcome<R, Captured> {
        match catch_unwind(AssertUnwindSafe(|| self.call(args))) {
            Ok(value) => Outcome::value(value),
            Err(payload) => Outcome::fault(Captured::captured(payload)),
        }
    }

    pub fn clear(&mut self) {
        if let Some(vt) = self.vtable.take() {
            unsafe { (vt.destroy)(self.buf.as_mut_ptr()) };
        }
    }

    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }
}

impl<Args: 'static, R: 'static> Clone for SharedCallable<Args, R> {
    fn clone(&self) -> Self {
        match self.vtable {
            None => Self::empty(),
            Some(vt) => unsafe { (vt.clone)(self.buf.as_ptr()) },
        }
    }
}

impl<Args: 'static, R: 'static> Default for SharedCallable<Args, R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<Args: 'static, R: 'static> Drop for SharedCallable<Args, R> {
    fn drop(&mut self) {
        if let Some(vt) = self.vtable.take() {
            unsafe { (vt.destroy)(self.buf.as_mut_ptr()) };
        }
    }
}

impl<Args: 'static, R: 'static> fmt::Debug for SharedCallable<Args, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_empty() {
            "SharedCallable(<empty>)"
        } else {
            "SharedCallable(<armed>)"
        })
    }
}

fn shared_vtable_inline<F, Args, R>() -> &'static SharedCallVtable<Args, R>
where
    F: TupleCallShared<Args, Output = R> + Clone + Send + Sync + 'static,
    Args: 'static,
    R: 'static,
{
    &SharedCallVtable {
        call: shared_call_inline::<F, Args>,
        clone: shared_clone_any::<F, Args, R>,
        destroy: destroy_inline::<F>,
    }
}

fn shared_vtable_outline<F, Args, R>() -> &'static SharedCallVtable<Args, R>
where
    F: TupleCallShared<Args, Output = R> + Clone + Send + Sync + 'static,
    Args: 'static,
    R: 'static,
{
    &SharedCallVtable {
        call: shared_call_outline::<F, Args>,
        clone: shared_clone_any::<F, Args, R>,
        destroy: destroy_outline::<F>,
    }
}

unsafe fn shared_call_inline<F: TupleCallShared<Args>, Args>(buf: *const u8, args: Args) -> F::Output {
    (*buf.cast::<F>()).invoke_shared(args)
}

unsafe fn shared_call_outline<F: TupleCallShared<Args>, Args>(
    buf: *const u8,
    args: Args,
) -> F::Output {
    let ptr = buf.cast::<*const F>().read();
    (*ptr).invoke_shared(args)
}

unsafe fn shared_clone_any<F, Args, R>(buf: *const u8) -> SharedCallable<Args, R>
where
    F: TupleCallShared<Args, Output = R> + Clone + Send + Sync + 'static,
    Args: 'static,
    R: 'static,
{
    let payload: &F = if const { fits_inline::<F>() } {
        &*buf.cast::<F>()
    } else {
        &*buf.cast::<*const F>().read()
    };
    SharedCallable::new(payload.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_call_with_various_arities() {
        let mut nullary: Callable<(), i32> = Callable::new(|| 9);
        assert_eq!(nullary.call(()), 9);

        let mut unary: Callable<(i32,), i32> = Callable::new(|v: i32| v * 2);
        assert_eq!(unary.call((21,)), 42);

        let mut binary: Callable<(i32, i32), i32> = Callable::new(|a: i32, b: i32| a + b);
        assert_eq!(binary.call((40, 2)), 42);
    }

    #[test]
    fn test_callable_is_reusable_and_stateful() {
        let mut counter = 0usize;
        let mut tally: Callable<(), usize> = Callable::new(move || {
            counter += 1;
            counter
        });
        assert_eq!(tally.call(()), 1);
        assert_eq!(tally.call(()), 2);
    }

    #[test]
    fn test_catch_call_captures_panics() {
        let mut faulty: Callable<(i32,), i32> = Callable::new(|v: i32| {
            if v < 0 {
                panic!("negative input");
            }
            v
        });

        assert_eq!(faulty.catch_call((3,)).into_value(), 3);
        let fault = faulty.catch_call((-1,)).into_fault();
        assert_eq!(fault.message(), Some("negative input"));
        // Still usable after a captured panic.
        assert_eq!(faulty.call((5,)), 5);
    }

    #[test]
    fn test_try_clone_requires_opt_in() -> Result<()> {
        let mut original: Callable<(i32,), i32> = Callable::cloneable(|v: i32| v + 1);
        let mut copy = original.try_clone()?;
        assert_eq!(original.call((1,)), 2);
        assert_eq!(copy.call((10,)), 11);

        let plain: Callable<(), ()> = Callable::new(|| {});
        assert_eq!(plain.try_clone().unwrap_err(), NotCloneable);

        let empty: Callable<(), ()> = Callable::empty();
        assert!(empty.try_clone()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_oversized_payload_goes_out_of_line() {
        let blob = [3u8; 128];
        let mut big: Callable<(), usize> =
            Callable::new(move || blob.iter().map(|&b| b as usize).sum());
        assert_eq!(big.call(()), 3 * 128);
        big.clear();
        assert!(big.is_empty());
    }

    #[test]
    #[should_panic(expected = "calling an empty Callable")]
    fn test_calling_empty_is_a_precondition_violation() {
        let mut empty: Callable<(), ()> = Callable::empty();
        empty.call(());
    }

    #[test]
    fn test_shared_callable_invokes_through_shared_refs() {
        let base = 100;
        let shared: SharedCallable<(i32,), i32> = SharedCallable::new(move |v: i32| v + base);
        assert_eq!(shared.call((1,)), 101);
        assert_eq!(shared.call((2,)), 102);

        let copy = shared.clone();
        assert_eq!(copy.call((3,)), 103);
    }

    #[test]
    fn test_shared_callable_catch_call() {
        let shared: SharedCallable<(i32,), i32> = SharedCallable::new(|v: i32| {
            assert!(v >= 0, "refused");
            v
        });
        assert_eq!(shared.call((7,)), 7);
        let fault = shared.catch_call((-1,)).into_fault();
        assert!(fault.message().unwrap().contains("refused"));
    }

    #[test]
    fn test_shared_callable_usable_from_many_threads() {
        let shared: std::sync::Arc<SharedCallable<(u64,), u64>> =
            std::sync::Arc::new(SharedCallable::new(|v: u64| v * 2));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = std::sync::Arc::clone(&shared);
                std::thread::spawn(move || shared.call((i,)))
            })
            .collect();
        let mut results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, vec![0, 2, 4, 6]);
    }
}
