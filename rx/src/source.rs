// rx/src/source.rs

//! Finite in-memory sources. Both offer SYNC fusion.

use core::fmt;
use std::iter::Peekable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::disposable::{Disposable, DisposeHandle};
use crate::error::RxError;
use crate::fusion::{FusedQueue, FusionMode, Pull};
use crate::internal::cell::OwnerCell;
use crate::internal::guard::Exclusive;
use crate::observer::{Observable, Observer, ObserverRef, Upstream};

/// Emits the items of a cloneable collection, then completes.
pub struct IterSource<I> {
  items: I,
  /// Advancing the iterator runs caller code, which must not be moved
  /// across a thread boundary by fusion.
  thread_bound: bool,
}

/// A source over already materialized values. Fuses even across a boundary.
pub fn from_vec<T>(values: Vec<T>) -> IterSource<Vec<T>>
where
  T: Clone,
{
  IterSource {
    items: values,
    thread_bound: false,
  }
}

/// A source over a lazily evaluated iterable. Refuses boundary fusion.
pub fn from_iter<I>(items: I) -> IterSource<I>
where
  I: IntoIterator + Clone,
{
  IterSource {
    items,
    thread_bound: true,
  }
}

impl<I> Observable<I::Item> for IterSource<I>
where
  I: IntoIterator + Clone + Send + Sync,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
{
  fn subscribe(&self, observer: ObserverRef<I::Item>) -> DisposeHandle {
    let subscription = Arc::new(IterSubscription {
      iter: OwnerCell::new(self.items.clone().into_iter().peekable()),
      guard: Exclusive::new(),
      thread_bound: self.thread_bound,
      fused: AtomicBool::new(false),
      exhausted: AtomicBool::new(false),
      disposed: AtomicBool::new(false),
    });
    observer.on_subscribe(Upstream::Fuseable(subscription.clone()));
    if !subscription.fused.load(Ordering::Acquire) {
      subscription.push_all(&*observer);
    }
    subscription
  }
}

impl<I> fmt::Debug for IterSource<I> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IterSource")
      .field("thread_bound", &self.thread_bound)
      .finish_non_exhaustive()
  }
}

struct IterSubscription<It: Iterator> {
  /// Touched only while `guard` is claimed.
  iter: OwnerCell<Peekable<It>>,
  guard: Exclusive,
  thread_bound: bool,
  fused: AtomicBool,
  exhausted: AtomicBool,
  disposed: AtomicBool,
}

impl<It> IterSubscription<It>
where
  It: Iterator,
{
  fn push_all(&self, observer: &dyn Observer<It::Item>) {
    let Some(_claim) = self.guard.try_claim() else {
      return;
    };
    // SAFETY: the claim is held for the whole loop.
    let iter = unsafe { self.iter.get_mut() };
    loop {
      if self.disposed.load(Ordering::Acquire) {
        return;
      }
      match iter.next() {
        Some(value) => observer.on_next(value),
        None => {
          self.exhausted.store(true, Ordering::Release);
          if !self.disposed.load(Ordering::Acquire) {
            observer.on_complete();
          }
          return;
        }
      }
    }
  }
}

impl<It> Disposable for IterSubscription<It>
where
  It: Iterator + Send,
  It::Item: Send,
{
  fn dispose(&self) {
    self.disposed.store(true, Ordering::Release);
  }

  fn is_disposed(&self) -> bool {
    self.disposed.load(Ordering::Acquire)
  }
}

impl<It> FusedQueue<It::Item> for IterSubscription<It>
where
  It: Iterator + Send,
  It::Item: Send,
{
  fn request_fusion(&self, mode: FusionMode) -> FusionMode {
    let granted = FusionMode::negotiate(mode, FusionMode::SYNC, self.thread_bound);
    if granted == FusionMode::SYNC {
      self.fused.store(true, Ordering::Release);
    }
    tracing::trace!(target: "fibre_rx", ?mode, ?granted, "iterable source fusion request");
    granted
  }

  fn try_poll(&self) -> Pull<It::Item> {
    if !self.fused.load(Ordering::Acquire) {
      tracing::warn!(target: "fibre_rx", error = %RxError::QueueFusionViolation, "poll without fusion");
      return Pull::Empty;
    }
    if self.disposed.load(Ordering::Acquire) || self.exhausted.load(Ordering::Acquire) {
      return Pull::Done;
    }
    let Some(_claim) = self.guard.try_claim() else {
      return Pull::Empty;
    };
    // SAFETY: the claim is held.
    match unsafe { self.iter.get_mut() }.next() {
      Some(value) => Pull::Value(value),
      None => {
        self.exhausted.store(true, Ordering::Release);
        Pull::Done
      }
    }
  }

  fn is_empty(&self) -> bool {
    if self.exhausted.load(Ordering::Acquire) {
      return true;
    }
    match self.guard.try_claim() {
      // SAFETY: the claim is held.
      Some(_claim) => unsafe { self.iter.get_mut() }.peek().is_none(),
      None => false,
    }
  }

  fn clear(&self) {
    self.exhausted.store(true, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::TestObserver;

  #[test]
  fn pushes_values_then_completes() {
    let source = from_vec(vec![1, 2, 3]);
    let to = TestObserver::new();
    source.subscribe(to.clone());
    to.assert_values(&[1, 2, 3]);
    to.assert_complete();
    assert_eq!(to.fusion_mode(), FusionMode::NONE);
  }

  #[test]
  fn sync_fusion_drains_the_same_sequence() {
    let source = from_vec(vec![1, 2, 3]);
    let to = TestObserver::with_fusion(FusionMode::ANY);
    source.subscribe(to.clone());
    assert_eq!(to.fusion_mode(), FusionMode::SYNC);
    to.assert_values(&[1, 2, 3]);
    to.assert_complete();
  }

  #[test]
  fn lazy_iterable_rejects_boundary_fusion() {
    let source = from_iter((0..4).map(|x| x * 10));
    let to = TestObserver::with_fusion(FusionMode::SYNC | FusionMode::BOUNDARY);
    source.subscribe(to.clone());
    assert_eq!(to.fusion_mode(), FusionMode::NONE);
    to.assert_values(&[0, 10, 20, 30]);
    to.assert_complete();
  }

  #[test]
  fn dispose_stops_emission() {
    let source = from_vec(vec![1, 2, 3]);
    let to = TestObserver::new();
    to.dispose_after(1);
    source.subscribe(to.clone());
    to.assert_values(&[1]);
    to.assert_not_complete();
  }
}
