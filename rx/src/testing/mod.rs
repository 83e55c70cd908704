//! Test doubles: a recording observer and a virtual-time scheduler.

mod observer;
mod scheduler;

pub use observer::{Event, TestObserver};
pub use scheduler::TestScheduler;
