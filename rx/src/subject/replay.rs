// rx/src/subject/replay.rs

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::config::QueueConfig;
use crate::disposable::{Disposable, DisposeHandle};
use crate::error::{report_undeliverable, SharedError};
use crate::internal::cell::OwnerCell;
use crate::internal::wip::Wip;
use crate::observer::{Observable, Observer, ObserverRef, Upstream};
use crate::queue::{ReplayCursor, ReplayLog};
use crate::subject::observers::ObserverSet;
use crate::subject::{Subject, Terminal};
use crate::telemetry;

struct Shared<T> {
  log: ReplayLog<T>,
  observers: ObserverSet<ReplayEntry<T>, Terminal>,
}

/// One subscriber's replay position. Doubles as its detach handle.
struct ReplayEntry<T> {
  observer: ObserverRef<T>,
  wip: Wip,
  /// Touched only by the owner of `wip`.
  cursor: OwnerCell<ReplayCursor<T>>,
  disposed: AtomicBool,
  parent: Weak<Shared<T>>,
}

impl<T> ReplayEntry<T>
where
  T: Clone,
{
  /// Delivers everything the log holds beyond this entry's cursor, then the
  /// terminal signal once the log is exhausted and the subject has terminated.
  fn replay(&self, shared: &Shared<T>) {
    if !self.wip.enter() {
      return;
    }
    let mut missed = 1;
    loop {
      // SAFETY: `wip` is held; the cursor was created by `shared.log`.
      let cursor = unsafe { self.cursor.get_mut() };
      loop {
        if self.disposed.load(Ordering::Acquire) {
          return;
        }
        match unsafe { shared.log.read(cursor) } {
          Some(value) => self.observer.on_next(value.clone()),
          None => break,
        }
      }

      if let Some(terminal) = shared.observers.terminal() {
        // Values appended before the terminal transition are visible now.
        if cursor.index() < shared.log.len() {
          continue;
        }
        if !self.disposed.swap(true, Ordering::AcqRel) {
          terminal.deliver(&*self.observer);
        }
        return;
      }

      missed = self.wip.leave(missed);
      if missed == 0 {
        return;
      }
    }
  }
}

impl<T> Disposable for ReplayEntry<T>
where
  T: Send + Sync + 'static,
{
  fn dispose(&self) {
    if !self.disposed.swap(true, Ordering::AcqRel) {
      if let Some(shared) = self.parent.upgrade() {
        shared.observers.remove(self as *const ReplayEntry<T>);
      }
    }
  }

  fn is_disposed(&self) -> bool {
    self.disposed.load(Ordering::Acquire)
  }
}

/// Records every value and replays the whole log, followed by the terminal
/// signal if there is one, to each new subscriber.
///
/// Values are appended to the log before fan-out, so a subscriber that
/// attaches mid-emission sees a consistent prefix and then the live tail,
/// without gaps or duplicates.
pub struct ReplaySubject<T> {
  shared: Arc<Shared<T>>,
}

impl<T> Default for ReplaySubject<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> ReplaySubject<T> {
  pub fn new() -> Self {
    Self::with_config(QueueConfig::default())
  }

  /// A subject whose log starts with room for at least `hint` values.
  pub fn with_capacity_hint(hint: usize) -> Self {
    Self::with_config(QueueConfig::with_capacity_hint(hint))
  }

  pub fn with_config(config: QueueConfig) -> Self {
    ReplaySubject {
      shared: Arc::new(Shared {
        log: ReplayLog::new(config),
        observers: ObserverSet::new(),
      }),
    }
  }

  /// Snapshot of every value recorded so far.
  pub fn values(&self) -> Vec<T>
  where
    T: Clone,
  {
    self.shared.log.to_vec()
  }

  pub fn size(&self) -> usize {
    self.shared.log.len()
  }

  pub fn has_value(&self) -> bool {
    self.size() > 0
  }

  pub fn has_complete(&self) -> bool {
    matches!(self.shared.observers.terminal(), Some(Terminal::Completed))
  }
}

impl<T> ReplaySubject<T>
where
  T: Clone,
{
  fn terminate(&self, terminal: Terminal) -> bool {
    let Some(last) = self.shared.observers.terminate(terminal) else {
      return false;
    };
    tracing::trace!(target: "fibre_rx", size = self.shared.log.len(), "replay subject terminated");
    for entry in last.iter() {
      entry.replay(&self.shared);
    }
    true
  }
}

impl<T> Observer<T> for ReplaySubject<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn on_subscribe(&self, upstream: Upstream<T>) {
    if self.shared.observers.is_terminated() {
      upstream.dispose();
    }
  }

  fn on_next(&self, value: T) {
    if self.shared.observers.is_terminated() {
      return;
    }
    if self.shared.log.push(value).is_err() {
      tracing::warn!(target: "fibre_rx", "concurrent on_next on a replay subject; value dropped");
      telemetry::increment_counter("replay_subject", "concurrent_next");
      return;
    }
    for entry in self.shared.observers.snapshot().iter() {
      entry.replay(&self.shared);
    }
  }

  fn on_error(&self, error: SharedError) {
    if !self.terminate(Terminal::Errored(error.clone())) {
      report_undeliverable(&error, "replay_subject");
    }
  }

  fn on_complete(&self) {
    self.terminate(Terminal::Completed);
  }
}

impl<T> Observable<T> for ReplaySubject<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn subscribe(&self, observer: ObserverRef<T>) -> DisposeHandle {
    let entry = Arc::new(ReplayEntry {
      observer: observer.clone(),
      wip: Wip::new(),
      cursor: OwnerCell::new(self.shared.log.cursor()),
      disposed: AtomicBool::new(false),
      parent: Arc::downgrade(&self.shared),
    });
    let handle: DisposeHandle = entry.clone();
    observer.on_subscribe(Upstream::Plain(handle.clone()));

    // A terminated subject replays without registering the observer.
    if self.shared.observers.add(entry.clone()).is_ok() && entry.is_disposed() {
      self.shared.observers.remove(Arc::as_ptr(&entry));
      return handle;
    }
    entry.replay(&self.shared);
    handle
  }
}

impl<T> Subject<T> for ReplaySubject<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn observer_count(&self) -> usize {
    self.shared.observers.len()
  }

  fn is_terminated(&self) -> bool {
    self.shared.observers.is_terminated()
  }

  fn error(&self) -> Option<SharedError> {
    self.shared.observers.terminal().and_then(|t| t.error())
  }
}

impl<T> fmt::Debug for ReplaySubject<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ReplaySubject")
      .field("log", &self.shared.log)
      .field("observers", &self.shared.observers)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::RxError;
  use crate::testing::TestObserver;

  #[test]
  fn early_and_late_subscribers_see_everything() {
    let subject = ReplaySubject::with_capacity_hint(2);
    let early = TestObserver::new();
    subject.subscribe(early.clone());
    for i in 1..=5 {
      subject.on_next(i);
    }
    subject.on_complete();

    let late = TestObserver::new();
    subject.subscribe(late.clone());

    early.assert_values(&[1, 2, 3, 4, 5]);
    early.assert_complete();
    late.assert_values(&[1, 2, 3, 4, 5]);
    late.assert_complete();
    assert_eq!(subject.values(), vec![1, 2, 3, 4, 5]);
    assert_eq!(subject.size(), 5);
    assert!(subject.has_complete());
  }

  #[test]
  fn mid_stream_subscriber_gets_prefix_then_live_values() {
    let subject = ReplaySubject::new();
    subject.on_next("a");
    let to = TestObserver::new();
    subject.subscribe(to.clone());
    subject.on_next("b");
    to.assert_values(&["a", "b"]);
    to.assert_not_complete();
    assert_eq!(subject.observer_count(), 1);
  }

  #[test]
  fn error_is_replayed_after_values() {
    let subject = ReplaySubject::new();
    subject.on_next(1);
    subject.on_error(RxError::AlreadyTerminated.shared());
    subject.on_next(2);
    let late = TestObserver::new();
    subject.subscribe(late.clone());
    late.assert_values(&[1]);
    late.assert_error_count(1);
    assert!(subject.error().is_some());
    assert!(!subject.has_observers());
  }

  #[test]
  fn disposed_subscriber_stops_receiving() {
    let subject = ReplaySubject::new();
    let to = TestObserver::new();
    let handle = subject.subscribe(to.clone());
    subject.on_next(1);
    handle.dispose();
    subject.on_next(2);
    subject.on_complete();
    to.assert_values(&[1]);
    to.assert_not_complete();
  }
}
