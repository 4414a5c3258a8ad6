use super::node::{Payload, Stage};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// How a flow is being cancelled.
///
/// `Soft` is cooperative: the node in flight finishes and every later node
/// observes a cancellation fault in place of its input (so `on_error` can
/// react). `Hard` skips everything and jumps straight to the terminal node
/// with the fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancelKind {
    Soft = 1,
    Hard = 2,
}

/// Factory turning a cancellation into a blueprint's error arm.
///
/// The crate provides the implementation for the canonical
/// [`Captured`](crate::outcome::Captured) error type; a blueprint built
/// over a custom error arm will not compile until its error type
/// implements this.
pub trait CancelFault: Sized {
    fn cancelled(kind: CancelKind) -> Self;
}

const CANCEL_NONE: u8 = 0;

/// Shared cancellation state observed by runners between nodes.
///
/// Transitions are monotonic: none → soft → hard, never back. Loads and
/// stores are relaxed; runners observe cancellation on a best-effort basis
/// at node boundaries, never mid-node.
pub struct Controller {
    state: AtomicU8,
}

impl Controller {
    pub fn new() -> Self {
        Controller {
            state: AtomicU8::new(CANCEL_NONE),
        }
    }

    pub fn cancel(&self, kind: CancelKind) {
        self.state.fetch_max(kind as u8, Ordering::Relaxed);
    }

    pub fn is_soft_cancelled(&self) -> bool {
        self.state.load(Ordering::Relaxed) == CancelKind::Soft as u8
    }

    pub fn is_hard_cancelled(&self) -> bool {
        self.state.load(Ordering::Relaxed) == CancelKind::Hard as u8
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Relaxed) != CANCEL_NONE
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Relaxed) {
            CANCEL_NONE => "none",
            1 => "soft",
            _ => "hard",
        };
        f.debug_struct("Controller").field("state", &state).finish()
    }
}

/// A sealed, immutable dataflow plan.
///
/// Produced by [`FlowBuilder::end`](super::FlowBuilder::end); the node
/// chain is fixed from here on. Hand it to a [`Runner`] (shared,
/// re-invocable) or a [`FastRunner`] (one-shot, consuming).
pub struct Blueprint<C> {
    pub(super) chain: C,
}

impl<C: Stage> Blueprint<C> {
    pub(super) fn new(chain: C) -> Self {
        Blueprint { chain }
    }

    /// Shorthand for a shared runner with a fresh controller.
    pub fn runner(self) -> Runner<C>
    where
        C: Clone,
    {
        Runner::new(Arc::new(self))
    }

    /// Shorthand for a consuming one-shot runner.
    pub fn fast_runner(self) -> FastRunner<C> {
        FastRunner::new(self)
    }
}

/// Drives values through a shared blueprint.
///
/// The blueprint is behind an `Arc` and each invocation clones the node
/// chain out of it, so a runner can be invoked repeatedly and cloned
/// freely; control nodes re-enter on other threads with their own copy of
/// the remaining chain. The whole run path is panic-free: adapters capture
/// user panics into the error arm before they reach the runner.
pub struct Runner<C> {
    bp: Arc<Blueprint<C>>,
    ctl: Arc<Controller>,
}

impl<C> Runner<C>
where
    C: Stage + Clone,
{
    pub fn new(bp: Arc<Blueprint<C>>) -> Self {
        Self::with_controller(bp, Arc::new(Controller::new()))
    }

    /// Attaches an existing controller, so several runners can be
    /// cancelled together.
    pub fn with_controller(bp: Arc<Blueprint<C>>, ctl: Arc<Controller>) -> Self {
        Runner { bp, ctl }
    }

    pub fn controller(&self) -> Arc<Controller> {
        Arc::clone(&self.ctl)
    }

    /// Feeds `value` into the source node and drives it toward the
    /// terminal, suspending at control nodes.
    pub fn invoke(&self, value: <C::Input as Payload>::Value) {
        self.bp
            .chain
            .clone()
            .run(<C::Input as Payload>::from_value(value), &self.ctl);
    }
}

impl<C> Clone for Runner<C> {
    fn clone(&self) -> Self {
        Runner {
            bp: Arc::clone(&self.bp),
            ctl: Arc::clone(&self.ctl),
        }
    }
}

/// One-shot runner owning its blueprint by value.
///
/// Invocation consumes the plan, so no chain clone and no shared-pointer
/// bump happens; control nodes move the remaining tail into the dispatched
/// task.
pub struct FastRunner<C> {
    chain: C,
    ctl: Arc<Controller>,
}

impl<C: Stage> FastRunner<C> {
    pub fn new(bp: Blueprint<C>) -> Self {
        Self::with_controller(bp, Arc::new(Controller::new()))
    }

    pub fn with_controller(bp: Blueprint<C>, ctl: Arc<Controller>) -> Self {
        FastRunner {
            chain: bp.chain,
            ctl,
        }
    }

    pub fn controller(&self) -> Arc<Controller> {
        Arc::clone(&self.ctl)
    }

    pub fn invoke(self, value: <C::Input as Payload>::Value) {
        self.chain
            .run(<C::Input as Payload>::from_value(value), &self.ctl);
    }
}
