use crate::flow::CancelKind;
use std::any::Any;
use std::fmt;
use std::panic::resume_unwind;

/// The payload of an in-flight panic, carried as an opaque handle.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// Conversion from a captured panic into an error arm.
///
/// Adapters that run user code (`transform`, `then`, `on_error`,
/// `catch_panic`, `Callable::catch_call`, the promise adapter) stop unwinds
/// at their boundary and route the payload through this trait, so a
/// blueprint's error arm decides how panics are represented. [`Captured`] is
/// the canonical implementation; custom error types opt in by implementing
/// it themselves.
pub trait PanicFault: Sized {
    fn captured(payload: PanicPayload) -> Self;
}

/// Marker payload for cancellation faults on the canonical error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cancelled(CancelKind);

/// An opaque handle to a captured panic (or a cancellation), the canonical
/// error arm of a blueprint.
///
/// The payload can be inspected with [`downcast`](Captured::downcast) or
/// [`message`](Captured::message), or re-raised with
/// [`resume`](Captured::resume).
pub struct Captured(PanicPayload);

impl Captured {
    pub fn new(payload: PanicPayload) -> Self {
        Captured(payload)
    }

    /// The panic message, when the payload is a `&str` or `String`.
    pub fn message(&self) -> Option<&str> {
        if let Some(s) = self.0.downcast_ref::<&'static str>() {
            Some(s)
        } else if let Some(s) = self.0.downcast_ref::<String>() {
            Some(s)
        } else {
            None
        }
    }

    /// Recovers the typed payload, handing the handle back on mismatch.
    pub fn downcast<X: Any>(self) -> Result<X, Captured> {
        match self.0.downcast::<X>() {
            Ok(payload) => Ok(*payload),
            Err(payload) => Err(Captured(payload)),
        }
    }

    /// When this fault was produced by runner cancellation, the kind.
    pub fn cancel_kind(&self) -> Option<CancelKind> {
        self.0.downcast_ref::<Cancelled>().map(|c| c.0)
    }

    /// Re-raises the captured panic on the current thread.
    pub fn resume(self) -> ! {
        resume_unwind(self.0)
    }

    pub fn into_payload(self) -> PanicPayload {
        self.0
    }
}

impl PanicFault for Captured {
    fn captured(payload: PanicPayload) -> Self {
        Captured(payload)
    }
}

/// The not-yet-published seed used by aggregator slots.
impl Default for Captured {
    fn default() -> Self {
        Captured(Box::new("empty captured fault"))
    }
}

impl crate::flow::CancelFault for Captured {
    fn cancelled(kind: CancelKind) -> Self {
        Captured(Box::new(Cancelled(kind)))
    }
}

impl fmt::Debug for Captured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kind) = self.cancel_kind() {
            write!(f, "Captured(cancelled: {kind:?})")
        } else if let Some(msg) = self.message() {
            write!(f, "Captured({msg:?})")
        } else {
            f.write_str("Captured(<opaque payload>)")
        }
    }
}
