// rx/src/error_aggregator.rs

//! Wait-free accumulation of failure causes.
//!
//! Used wherever two terminal paths (an upstream error and a cleanup action's
//! own failure, or two racing callbacks) must both be preserved.

use core::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{report_undeliverable, CompositeError, SharedError};

enum Causes {
  Empty,
  Recorded(Vec<SharedError>),
  Terminated,
}

/// Holds nothing, one cause, several causes, or the terminal marker.
///
/// Once terminated, [`add`](ErrorAggregator::add) fails without touching the
/// container.
pub struct ErrorAggregator {
  state: ArcSwap<Causes>,
}

impl Default for ErrorAggregator {
  fn default() -> Self {
    Self::new()
  }
}

impl ErrorAggregator {
  pub fn new() -> Self {
    ErrorAggregator {
      state: ArcSwap::from_pointee(Causes::Empty),
    }
  }

  /// Records `error`. Returns `false` if the aggregator was already
  /// terminated; the error is not stored in that case.
  ///
  /// Concurrent adds are linearized by the compare-and-swap loop, so the
  /// composite reflects one arrival order and never loses a cause.
  pub fn add(&self, error: SharedError) -> bool {
    let mut current = self.state.load();
    loop {
      let next = match &**current {
        Causes::Terminated => return false,
        Causes::Empty => Causes::Recorded(vec![error.clone()]),
        Causes::Recorded(causes) => {
          let mut extended = Vec::with_capacity(causes.len() + 1);
          extended.extend(causes.iter().cloned());
          extended.push(error.clone());
          Causes::Recorded(extended)
        }
      };
      let previous = self.state.compare_and_swap(&*current, Arc::new(next));
      if Arc::ptr_eq(&*previous, &*current) {
        return true;
      }
      current = previous;
    }
  }

  /// Records `error`, logging it instead if the aggregator is terminated.
  ///
  /// Returns whether it was recorded.
  pub fn add_or_report(&self, error: SharedError) -> bool {
    if self.add(error.clone()) {
      true
    } else {
      report_undeliverable(&error, "error_aggregator");
      false
    }
  }

  /// Atomically swaps in the terminal marker and returns what had been
  /// accumulated: `None`, the single cause, or a [`CompositeError`].
  ///
  /// Only the first call can return anything; later calls see the marker and
  /// return `None`.
  pub fn terminate(&self) -> Option<SharedError> {
    let previous = self.state.swap(Arc::new(Causes::Terminated));
    match &*previous {
      Causes::Empty | Causes::Terminated => None,
      Causes::Recorded(causes) => Some(merge(causes)),
    }
  }

  /// Whether `terminate` has been called.
  pub fn is_terminated(&self) -> bool {
    matches!(**self.state.load(), Causes::Terminated)
  }

  /// Whether at least one cause is waiting to be taken by `terminate`.
  pub fn has_errors(&self) -> bool {
    matches!(**self.state.load(), Causes::Recorded(_))
  }

  /// A snapshot of what is currently recorded, without terminating.
  pub fn peek(&self) -> Option<SharedError> {
    match &**self.state.load() {
      Causes::Recorded(causes) => Some(merge(causes)),
      _ => None,
    }
  }
}

fn merge(causes: &[SharedError]) -> SharedError {
  if causes.len() == 1 {
    causes[0].clone()
  } else {
    Arc::new(CompositeError::new(causes.to_vec()))
  }
}

impl fmt::Debug for ErrorAggregator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.load();
    let (name, count) = match &**state {
      Causes::Empty => ("Empty", 0),
      Causes::Recorded(c) => ("Recorded", c.len()),
      Causes::Terminated => ("Terminated", 0),
    };
    f.debug_struct("ErrorAggregator")
      .field("state", &name)
      .field("count", &count)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::RxError;

  #[test]
  fn single_cause_is_returned_as_is() {
    let agg = ErrorAggregator::new();
    assert!(agg.add(RxError::AlreadyTerminated.shared()));
    let e = agg.terminate().unwrap();
    assert_eq!(e.to_string(), "subject already terminated");
    assert!(e.downcast_ref::<CompositeError>().is_none());
  }

  #[test]
  fn several_causes_become_composite_in_order() {
    let agg = ErrorAggregator::new();
    agg.add(RxError::AlreadyTerminated.shared());
    agg.add(RxError::AlreadyHasObserver.shared());
    agg.add(RxError::DisposableAlreadySet.shared());
    let e = agg.terminate().unwrap();
    let composite = e.downcast_ref::<CompositeError>().unwrap();
    let texts: Vec<String> = composite.causes().iter().map(|c| c.to_string()).collect();
    assert_eq!(
      texts,
      vec![
        "subject already terminated",
        "subject already has an observer",
        "disposable already set"
      ]
    );
  }

  #[test]
  fn add_after_terminate_fails_without_mutation() {
    let agg = ErrorAggregator::new();
    assert!(agg.terminate().is_none());
    assert!(!agg.add(RxError::AlreadyTerminated.shared()));
    assert!(agg.is_terminated());
    assert!(!agg.has_errors());
    assert!(agg.terminate().is_none());
  }

  #[test]
  fn peek_does_not_terminate() {
    let agg = ErrorAggregator::new();
    assert!(agg.peek().is_none());
    agg.add(RxError::AlreadyTerminated.shared());
    assert!(agg.peek().is_some());
    assert!(!agg.is_terminated());
    assert!(agg.add(RxError::AlreadyTerminated.shared()));
  }
}
