pub(crate) mod pause;
pub use pause::spin_pause;

pub(crate) mod thread_id;
pub use thread_id::current_thread_id;
