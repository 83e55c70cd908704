// rx/src/subject/mod.rs

//! Hubs that are an observer of one upstream and an observable for any
//! number of downstream observers.
//!
//! Every subject moves from active to exactly one terminal state, once.
//! Downstream observers may attach and detach at any time, including after
//! termination.

mod maybe;
mod observers;
mod publish;
mod ref_count;
mod replay;
mod unicast;

pub use maybe::MaybeSubject;
pub use publish::PublishSubject;
pub use ref_count::RefCountSubject;
pub use replay::ReplaySubject;
pub use unicast::UnicastSubject;

use crate::error::SharedError;
use crate::observer::{Observable, Observer};

/// Introspection shared by all subjects.
pub trait Subject<T>: Observer<T> + Observable<T> {
  fn has_observers(&self) -> bool {
    self.observer_count() > 0
  }

  fn observer_count(&self) -> usize;

  /// Whether a terminal signal has been received.
  fn is_terminated(&self) -> bool;

  /// The error the subject terminated with, if any.
  fn error(&self) -> Option<SharedError>;
}

/// The stored terminal signal of a subject.
#[derive(Debug, Clone)]
pub(crate) enum Terminal {
  Completed,
  Errored(SharedError),
}

impl Terminal {
  pub(crate) fn deliver<T>(&self, observer: &dyn Observer<T>) {
    match self {
      Terminal::Completed => observer.on_complete(),
      Terminal::Errored(e) => observer.on_error(e.clone()),
    }
  }

  pub(crate) fn error(&self) -> Option<SharedError> {
    match self {
      Terminal::Completed => None,
      Terminal::Errored(e) => Some(e.clone()),
    }
  }
}
