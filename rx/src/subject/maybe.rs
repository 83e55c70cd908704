// rx/src/subject/maybe.rs

use core::fmt;
use std::sync::Arc;

use crate::disposable::DisposeHandle;
use crate::error::{report_undeliverable, RxError, SharedError};
use crate::observer::{Observable, Observer, ObserverRef, Upstream};
use crate::subject::observers::{Entry, ObserverSet};
use crate::subject::Subject;

#[derive(Clone)]
enum Outcome<T> {
  Success(T),
  Completed,
  Errored(SharedError),
}

impl<T: Clone> Outcome<T> {
  fn deliver(&self, observer: &dyn Observer<T>) {
    match self {
      Outcome::Success(value) => {
        observer.on_next(value.clone());
        observer.on_complete();
      }
      Outcome::Completed => observer.on_complete(),
      Outcome::Errored(e) => observer.on_error(e.clone()),
    }
  }
}

type Observers<T> = ObserverSet<Entry<T, Outcome<T>>, Outcome<T>>;

/// A subject that terminates with exactly one value, with no value, or with
/// an error.
///
/// The first of [`on_success`](Self::on_success),
/// [`on_complete`](Self::on_complete) and [`on_error`](Self::on_error) wins;
/// any further call is a usage error and returns
/// [`RxError::AlreadyTerminated`]. Late subscribers receive the stored
/// outcome.
pub struct MaybeSubject<T> {
  observers: Arc<Observers<T>>,
}

impl<T: Clone> Default for MaybeSubject<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Clone> MaybeSubject<T> {
  pub fn new() -> Self {
    MaybeSubject {
      observers: Arc::new(ObserverSet::new()),
    }
  }

  pub fn on_success(&self, value: T) -> Result<(), RxError> {
    self.terminate(Outcome::Success(value))
  }

  pub fn on_complete(&self) -> Result<(), RxError> {
    self.terminate(Outcome::Completed)
  }

  pub fn on_error(&self, error: SharedError) -> Result<(), RxError> {
    let result = self.terminate(Outcome::Errored(error.clone()));
    if result.is_err() {
      report_undeliverable(&error, "maybe_subject");
    }
    result
  }

  /// The success value, if the subject succeeded.
  pub fn value(&self) -> Option<T> {
    match self.observers.terminal() {
      Some(Outcome::Success(value)) => Some(value),
      _ => None,
    }
  }

  pub fn has_value(&self) -> bool {
    matches!(self.observers.terminal(), Some(Outcome::Success(_)))
  }

  /// Whether the subject completed without a value.
  pub fn has_complete(&self) -> bool {
    matches!(self.observers.terminal(), Some(Outcome::Completed))
  }

  fn terminate(&self, outcome: Outcome<T>) -> Result<(), RxError> {
    let Some(last) = self.observers.terminate(outcome.clone()) else {
      tracing::warn!(target: "fibre_rx", "maybe subject signalled after it terminated");
      return Err(RxError::AlreadyTerminated);
    };
    tracing::trace!(target: "fibre_rx", "maybe subject terminated");
    for entry in last.iter() {
      if entry.finish() {
        outcome.deliver(&*entry.observer);
      }
    }
    Ok(())
  }
}

impl<T> Observer<T> for MaybeSubject<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn on_subscribe(&self, upstream: Upstream<T>) {
    if self.observers.is_terminated() {
      upstream.dispose();
    }
  }

  fn on_next(&self, value: T) {
    let _ = self.on_success(value);
  }

  fn on_error(&self, error: SharedError) {
    let _ = MaybeSubject::on_error(self, error);
  }

  fn on_complete(&self) {
    let _ = MaybeSubject::on_complete(self);
  }
}

impl<T> Observable<T> for MaybeSubject<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn subscribe(&self, observer: ObserverRef<T>) -> DisposeHandle {
    let entry = Arc::new(Entry::new(observer.clone(), &self.observers));
    let handle: DisposeHandle = entry.clone();
    observer.on_subscribe(Upstream::Plain(handle.clone()));

    match self.observers.add(entry.clone()) {
      Ok(()) => {
        if !entry.is_live() {
          self.observers.remove(Arc::as_ptr(&entry));
        }
      }
      Err(outcome) => {
        if entry.finish() {
          outcome.deliver(&*observer);
        }
      }
    }
    handle
  }
}

impl<T> Subject<T> for MaybeSubject<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn observer_count(&self) -> usize {
    self.observers.len()
  }

  fn is_terminated(&self) -> bool {
    self.observers.is_terminated()
  }

  fn error(&self) -> Option<SharedError> {
    match self.observers.terminal() {
      Some(Outcome::Errored(e)) => Some(e),
      _ => None,
    }
  }
}

impl<T> fmt::Debug for MaybeSubject<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MaybeSubject")
      .field("observers", &self.observers)
      .finish()
  }
}
