// rx/src/subject/publish.rs

use core::fmt;
use std::sync::Arc;

use crate::disposable::DisposeHandle;
use crate::error::{report_undeliverable, SharedError};
use crate::observer::{Observable, Observer, ObserverRef, Upstream};
use crate::subject::observers::{Entry, ObserverSet};
use crate::subject::{Subject, Terminal};

type Observers<T> = ObserverSet<Entry<T, Terminal>, Terminal>;

/// A hot broadcast subject: observers see only the values emitted after they
/// subscribed.
///
/// A late subscriber to a terminated subject receives the stored terminal
/// signal and nothing else.
pub struct PublishSubject<T> {
  observers: Arc<Observers<T>>,
}

impl<T> Default for PublishSubject<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> PublishSubject<T> {
  pub fn new() -> Self {
    PublishSubject {
      observers: Arc::new(ObserverSet::new()),
    }
  }

  pub fn has_complete(&self) -> bool {
    matches!(self.observers.terminal(), Some(Terminal::Completed))
  }

  pub fn has_error(&self) -> bool {
    matches!(self.observers.terminal(), Some(Terminal::Errored(_)))
  }

  fn terminate(&self, terminal: Terminal) -> bool {
    let Some(last) = self.observers.terminate(terminal.clone()) else {
      return false;
    };
    tracing::trace!(target: "fibre_rx", ?terminal, "publish subject terminated");
    for entry in last.iter() {
      if entry.finish() {
        terminal.deliver(&*entry.observer);
      }
    }
    true
  }
}

impl<T> Observer<T> for PublishSubject<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn on_subscribe(&self, upstream: Upstream<T>) {
    if self.observers.is_terminated() {
      upstream.dispose();
    }
  }

  fn on_next(&self, value: T) {
    for entry in self.observers.snapshot().iter() {
      if entry.is_live() {
        entry.observer.on_next(value.clone());
      }
    }
  }

  fn on_error(&self, error: SharedError) {
    if !self.terminate(Terminal::Errored(error.clone())) {
      report_undeliverable(&error, "publish_subject");
    }
  }

  fn on_complete(&self) {
    self.terminate(Terminal::Completed);
  }
}

impl<T> Observable<T> for PublishSubject<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn subscribe(&self, observer: ObserverRef<T>) -> DisposeHandle {
    let entry = Arc::new(Entry::new(observer.clone(), &self.observers));
    let handle: DisposeHandle = entry.clone();
    observer.on_subscribe(Upstream::Plain(handle.clone()));

    match self.observers.add(entry.clone()) {
      Ok(()) => {
        // Disposed from inside on_subscribe, before it was registered.
        if !entry.is_live() {
          self.observers.remove(Arc::as_ptr(&entry));
        }
      }
      Err(terminal) => {
        if entry.finish() {
          terminal.deliver(&*observer);
        }
      }
    }
    handle
  }
}

impl<T> Subject<T> for PublishSubject<T>
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
    self.observers.terminal().and_then(|t| t.error())
  }
}

impl<T> fmt::Debug for PublishSubject<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PublishSubject")
      .field("observers", &self.observers)
      .finish()
  }
}
