// rx/src/observer.rs

//! The push contracts between sources and consumers.
//!
//! A source delivers `on_subscribe` first, then any number of `on_next`, then
//! at most one of `on_error` / `on_complete`. Nothing follows a terminal
//! signal.

use core::fmt;
use std::sync::Arc;

use crate::disposable::{Disposable, DisposeHandle};
use crate::error::SharedError;
use crate::fusion::{FusedQueue, FusionMode};

/// The consumer side.
///
/// Callbacks take `&self`: observers are shared between the source and the
/// handles that cancel them, and may be invoked from any thread (though never
/// from two at once by a well-behaved source).
pub trait Observer<T>: Send + Sync {
  fn on_subscribe(&self, upstream: Upstream<T>);
  fn on_next(&self, value: T);
  fn on_error(&self, error: SharedError);
  fn on_complete(&self);

  /// ASYNC-fused consumers only: the source's queue may have new values.
  fn on_ready(&self) {}
}

pub type ObserverRef<T> = Arc<dyn Observer<T>>;

/// The source side.
pub trait Observable<T>: Send + Sync {
  /// Attaches `observer`. The returned handle detaches it again; it is the
  /// same resource handed to `on_subscribe`.
  fn subscribe(&self, observer: ObserverRef<T>) -> DisposeHandle;
}

impl<T, O> Observable<T> for Arc<O>
where
  O: Observable<T> + ?Sized,
{
  fn subscribe(&self, observer: ObserverRef<T>) -> DisposeHandle {
    (**self).subscribe(observer)
  }
}

/// What a source hands over in `on_subscribe`.
pub enum Upstream<T> {
  /// A plain cancel handle; fusion requests are answered with `NONE`.
  Plain(DisposeHandle),
  /// A handle that can additionally be pulled from once fusion is granted.
  Fuseable(Arc<dyn FusedQueue<T>>),
}

impl<T: 'static> Upstream<T> {
  /// Negotiates fusion. Must be called from within `on_subscribe`, at most
  /// once.
  pub fn request_fusion(&self, mode: FusionMode) -> FusionMode {
    match self {
      Upstream::Plain(_) => FusionMode::NONE,
      Upstream::Fuseable(q) => q.request_fusion(mode),
    }
  }

  /// The pull handle, if this upstream supports fusion at all.
  pub fn fused(&self) -> Option<&Arc<dyn FusedQueue<T>>> {
    match self {
      Upstream::Plain(_) => None,
      Upstream::Fuseable(q) => Some(q),
    }
  }

  pub fn dispose(&self) {
    match self {
      Upstream::Plain(d) => d.dispose(),
      Upstream::Fuseable(q) => q.dispose(),
    }
  }

  pub fn is_disposed(&self) -> bool {
    match self {
      Upstream::Plain(d) => d.is_disposed(),
      Upstream::Fuseable(q) => q.is_disposed(),
    }
  }

  /// The cancel side of this upstream as a plain handle.
  pub fn to_handle(&self) -> DisposeHandle {
    match self {
      Upstream::Plain(d) => d.clone(),
      Upstream::Fuseable(q) => Arc::new(FusedHandle(q.clone())),
    }
  }
}

impl<T> Clone for Upstream<T> {
  fn clone(&self) -> Self {
    match self {
      Upstream::Plain(d) => Upstream::Plain(d.clone()),
      Upstream::Fuseable(q) => Upstream::Fuseable(q.clone()),
    }
  }
}

impl<T> fmt::Debug for Upstream<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Upstream::Plain(_) => f.write_str("Upstream::Plain(..)"),
      Upstream::Fuseable(_) => f.write_str("Upstream::Fuseable(..)"),
    }
  }
}

struct FusedHandle<T>(Arc<dyn FusedQueue<T>>);

impl<T> Disposable for FusedHandle<T> {
  fn dispose(&self) {
    self.0.dispose();
  }

  fn is_disposed(&self) -> bool {
    self.0.is_disposed()
  }
}
