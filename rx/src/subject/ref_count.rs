// rx/src/subject/ref_count.rs

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::disposable::{Disposable, DisposeHandle};
use crate::error::SharedError;
use crate::observer::{Observable, Observer, ObserverRef, Upstream};
use crate::resource_slot::ResourceSlot;
use crate::subject::Subject;

struct Shared<S> {
  subject: S,
  upstream: ResourceSlot,
  count: AtomicUsize,
}

impl<S> Shared<S> {
  fn cancel_upstream(&self, reason: &'static str) {
    // The slot's transition flag makes the two racing paths cancel once.
    if self.upstream.dispose() {
      tracing::debug!(target: "fibre_rx", reason, "ref-count subject canceled its upstream");
    }
  }
}

/// Wraps a subject so that its upstream is canceled once nobody is listening.
///
/// The upstream handle is taken from this subject's own `on_subscribe`. It is
/// canceled exactly once: when the last observer detaches while the subject
/// is still active, or when the subject terminates, whichever comes first.
pub struct RefCountSubject<S> {
  shared: Arc<Shared<S>>,
}

impl<S> RefCountSubject<S> {
  pub fn new(subject: S) -> Self {
    RefCountSubject {
      shared: Arc::new(Shared {
        subject,
        upstream: ResourceSlot::new(),
        count: AtomicUsize::new(0),
      }),
    }
  }

  /// The wrapped subject.
  pub fn inner(&self) -> &S {
    &self.shared.subject
  }

  /// Whether the upstream has been canceled.
  pub fn is_upstream_canceled(&self) -> bool {
    self.shared.upstream.is_disposed()
  }
}

/// Downstream's handle: detaches from the wrapped subject and releases one
/// reference.
struct RefCountHandle<S> {
  inner: ResourceSlot,
  shared: Weak<Shared<S>>,
  released: AtomicBool,
}

impl<S> RefCountHandle<S> {
  /// Gives back this observer's reference. Runs on dispose and on any
  /// terminal signal the observer receives, whichever happens first.
  fn release(&self) {
    if self.released.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(shared) = self.shared.upgrade() {
      if shared.count.fetch_sub(1, Ordering::AcqRel) == 1 {
        shared.cancel_upstream("last observer released");
      }
    }
  }
}

impl<S: Send + Sync> Disposable for RefCountHandle<S> {
  fn dispose(&self) {
    self.inner.dispose();
    self.release();
  }

  fn is_disposed(&self) -> bool {
    self.inner.is_disposed()
  }
}

/// Sits between the wrapped subject and the real observer so the observer
/// sees a [`RefCountHandle`] instead of the subject's own entry.
struct RefCountObserver<T, S> {
  downstream: ObserverRef<T>,
  handle: Arc<RefCountHandle<S>>,
}

impl<T, S> Observer<T> for RefCountObserver<T, S>
where
  T: 'static,
  S: Send + Sync + 'static,
{
  fn on_subscribe(&self, upstream: Upstream<T>) {
    // If the observer already disposed, the slot cancels the entry.
    self.handle.inner.set_if_empty(upstream.to_handle());
    self.downstream.on_subscribe(Upstream::Plain(self.handle.clone()));
  }

  fn on_next(&self, value: T) {
    self.downstream.on_next(value);
  }

  // A terminated observer holds no reference, including one the wrapped
  // subject turned away with an error.
  fn on_error(&self, error: SharedError) {
    self.downstream.on_error(error);
    self.handle.release();
  }

  fn on_complete(&self) {
    self.downstream.on_complete();
    self.handle.release();
  }
}

impl<T, S> Observer<T> for RefCountSubject<S>
where
  T: 'static,
  S: Subject<T> + 'static,
{
  fn on_subscribe(&self, upstream: Upstream<T>) {
    // A second upstream is a usage error; set_once cancels and logs it.
    let _ = self.shared.upstream.set_once(upstream.to_handle());
  }

  fn on_next(&self, value: T) {
    self.shared.subject.on_next(value);
  }

  fn on_error(&self, error: SharedError) {
    self.shared.subject.on_error(error);
    self.shared.cancel_upstream("terminated");
  }

  fn on_complete(&self) {
    self.shared.subject.on_complete();
    self.shared.cancel_upstream("terminated");
  }
}

impl<T, S> Observable<T> for RefCountSubject<S>
where
  T: 'static,
  S: Subject<T> + 'static,
{
  fn subscribe(&self, observer: ObserverRef<T>) -> DisposeHandle {
    self.shared.count.fetch_add(1, Ordering::AcqRel);
    let handle = Arc::new(RefCountHandle {
      inner: ResourceSlot::new(),
      shared: Arc::downgrade(&self.shared),
      released: AtomicBool::new(false),
    });
    let wrapped = Arc::new(RefCountObserver {
      downstream: observer,
      handle: handle.clone(),
    });
    self.shared.subject.subscribe(wrapped);
    handle
  }
}

impl<T, S> Subject<T> for RefCountSubject<S>
where
  T: 'static,
  S: Subject<T> + 'static,
{
  fn observer_count(&self) -> usize {
    self.shared.subject.observer_count()
  }

  fn is_terminated(&self) -> bool {
    self.shared.subject.is_terminated()
  }

  fn error(&self) -> Option<SharedError> {
    self.shared.subject.error()
  }
}

impl<S: fmt::Debug> fmt::Debug for RefCountSubject<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RefCountSubject")
      .field("subject", &self.shared.subject)
      .field("upstream", &self.shared.upstream)
      .field("count", &self.shared.count.load(Ordering::Relaxed))
      .finish()
  }
}
