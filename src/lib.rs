//! Concurrency foundations for composing asynchronous computations as
//! typed dataflow blueprints and executing them on user-supplied
//! executors.
//!
//! The pieces fit together like this: a [`flow`] blueprint composes pure
//! transforms, fallible continuations, recoveries and executor hand-offs
//! into an immutable plan; a runner drives an [`outcome::Outcome`] through
//! it with cooperative cancellation; control nodes package the remaining
//! work as a [`task::TaskWrapper`] and hand it to an
//! [`executor::Executor`], typically backed by one of the [`queue`]s.
//! Fan-out joins on a [`flow::Aggregator`], and the lock-free substrate
//! ([`freelist`], [`hazard`], [`mempool`]) keeps reclamation off the
//! global allocator.
//!
//! Nothing here spawns threads, arms timers, or touches the network; the
//! event-loop integration that drains an executor lives outside this
//! crate.

pub mod cell;
pub use cell::InlineCell;

pub mod executor;
pub use executor::{Executor, ManualExecutor};

pub mod flow;
pub use flow::{Aggregator, Blueprint, CancelKind, Controller, FastRunner, Runner};

pub mod freelist;
pub use freelist::StaticList;

pub mod hazard;

pub mod mempool;

pub mod outcome;
pub use outcome::{Captured, Fault, Outcome};

pub mod queue;

pub mod task;
pub use task::{Callable, TaskWrapper};

pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;
