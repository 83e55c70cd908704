//! Lock-free building blocks for push-based event sequences.
//!
//! Producers emit values followed by at most one terminal signal to one or
//! more observers, from any thread and without external locking. This crate
//! is the concurrency substrate underneath such sequences:
//!
//! - [`ResourceSlot`]: an atomic slot for one cancelable resource.
//! - [`ErrorAggregator`]: wait-free accumulation of racing failures.
//! - [`HalfSerializer`]: serialized, exactly-once-terminal delivery from
//!   racing producers to one observer.
//! - [`queue::spsc_linked`]: an unbounded single-producer/single-consumer
//!   queue of linked array islands.
//! - [`fusion`]: the handshake that lets a consumer pull from its source's
//!   buffer.
//! - [`subject`]: publish, replay, unicast, maybe and ref-counting subjects.
//!
//! [`ObserveOn`] and the [`Scheduler`] contract show the pieces working
//! together in an asynchronous stage; [`testing`] holds the test doubles.

pub mod config;
pub mod disposable;
pub mod error;
pub mod error_aggregator;
pub mod fusion;
pub mod half_serializer;
pub mod observe_on;
pub mod observer;
pub mod queue;
pub mod resource_slot;
pub mod scheduler;
pub mod source;
pub mod subject;
pub mod telemetry;
pub mod testing;

mod internal;

pub use config::QueueConfig;
pub use disposable::{Disposable, DisposeHandle};
pub use error::{CompositeError, RxError, SharedError};
pub use error_aggregator::ErrorAggregator;
pub use fusion::{FusedQueue, FusionMode, Pull};
pub use half_serializer::HalfSerializer;
pub use observe_on::ObserveOn;
pub use observer::{Observable, Observer, ObserverRef, Upstream};
pub use resource_slot::ResourceSlot;
pub use scheduler::{Scheduler, Task};
pub use subject::{MaybeSubject, PublishSubject, RefCountSubject, ReplaySubject, Subject, UnicastSubject};
