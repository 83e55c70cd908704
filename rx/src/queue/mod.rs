//! Queues used as transport inside subjects and asynchronous stages.

mod replay_log;
mod spsc_linked;

pub(crate) use replay_log::{ReplayCursor, ReplayLog};
pub(crate) use spsc_linked::SpscLinkedQueue;
pub use spsc_linked::{spsc_linked, LinkedConsumer, LinkedProducer};
