// rx/src/disposable.rs

//! Cancel handles.

use core::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

/// A cancelable resource.
///
/// `dispose` must be idempotent: only the first call has an effect.
pub trait Disposable: Send + Sync {
  fn dispose(&self);
  fn is_disposed(&self) -> bool;
}

/// A shared handle to a cancelable resource, as returned by `subscribe`.
pub type DisposeHandle = Arc<dyn Disposable>;

type Action = Box<dyn FnOnce() + Send>;

/// Runs a closure on first disposal.
///
/// The closure lives behind an atomic pointer; whichever caller swaps it out
/// first owns it and runs it.
pub struct ActionDisposable {
  action: AtomicPtr<Action>,
}

impl ActionDisposable {
  pub fn new<F>(action: F) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    let boxed: Box<Action> = Box::new(Box::new(action));
    ActionDisposable {
      action: AtomicPtr::new(Box::into_raw(boxed)),
    }
  }
}

impl Disposable for ActionDisposable {
  fn dispose(&self) {
    let ptr = self.action.swap(ptr::null_mut(), Ordering::AcqRel);
    if !ptr.is_null() {
      // SAFETY: the pointer came from `Box::into_raw` and the swap above
      // transferred sole ownership of it to this call.
      let action = unsafe { Box::from_raw(ptr) };
      action();
    }
  }

  fn is_disposed(&self) -> bool {
    self.action.load(Ordering::Acquire).is_null()
  }
}

impl Drop for ActionDisposable {
  fn drop(&mut self) {
    let ptr = *self.action.get_mut();
    if !ptr.is_null() {
      // Never disposed: release the closure without running it.
      drop(unsafe { Box::from_raw(ptr) });
    }
  }
}

impl fmt::Debug for ActionDisposable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ActionDisposable")
      .field("disposed", &self.is_disposed())
      .finish_non_exhaustive()
  }
}

/// A flag with no cleanup attached.
#[derive(Debug, Default)]
pub struct BooleanDisposable {
  disposed: AtomicBool,
}

impl BooleanDisposable {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Disposable for BooleanDisposable {
  fn dispose(&self) {
    self.disposed.store(true, Ordering::Release);
  }

  fn is_disposed(&self) -> bool {
    self.disposed.load(Ordering::Acquire)
  }
}

/// A handle that runs `action` the first time it is disposed.
pub fn from_fn<F>(action: F) -> DisposeHandle
where
  F: FnOnce() + Send + 'static,
{
  Arc::new(ActionDisposable::new(action))
}

/// A live handle with no cleanup attached.
pub fn empty() -> DisposeHandle {
  Arc::new(BooleanDisposable::new())
}

/// A handle that is already disposed, for subscriptions that ended before
/// they began.
pub fn disposed() -> DisposeHandle {
  let d = BooleanDisposable::new();
  d.dispose();
  Arc::new(d)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  #[test]
  fn action_runs_once() {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let d = from_fn(move || {
      c.fetch_add(1, Ordering::SeqCst);
    });
    assert!(!d.is_disposed());
    d.dispose();
    d.dispose();
    assert!(d.is_disposed());
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn disposed_handle_starts_disposed() {
    assert!(disposed().is_disposed());
    assert!(!empty().is_disposed());
  }
}
