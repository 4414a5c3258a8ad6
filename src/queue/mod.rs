//! Bounded lock-free queues.
//!
//! Three ring buffers over the same slot scheme: a power-of-two capacity
//! indexed by `position & (N - 1)`, cache-line-padded cursors, and per-slot
//! publication (a `ready` byte for the single-consumer queues, a
//! generation-counting sequence word for MPMC). `try_` operations hand the
//! value back on failure and never block; `_wait` variants spin with
//! [`crossbeam_utils::Backoff`].
//!
//! Queues are expected to be empty at shutdown; destructors drain leftover
//! slots as a last resort but establish no cross-thread ordering of their
//! own.

pub mod spsc;
pub use spsc::{SpscConsumer, SpscProducer};

pub mod mpsc;
pub use mpsc::{MpscReceiver, MpscSender};

pub mod mpmc;
pub use mpmc::MpmcQueue;
