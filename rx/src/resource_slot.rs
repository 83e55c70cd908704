// rx/src/resource_slot.rs

//! An atomic slot holding at most one cancelable resource.
//!
//! The slot is either empty, holds a resource, or holds the "disposed"
//! sentinel. Once disposed it never stores anything again: every resource
//! raced into it afterwards is canceled on the spot.
//!
//! Every operation is a single `swap` or a `compare_exchange` retry loop on an
//! `AtomicPtr`. A pointer is only ever dereferenced by the thread that removed
//! it from the slot, so no reclamation scheme is needed.

use core::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::disposable::{Disposable, DisposeHandle};
use crate::error::RxError;

type Entry = DisposeHandle;

// Address used as the disposed marker. Never dereferenced.
static DISPOSED_MARKER: u8 = 0;

#[inline(always)]
fn disposed_marker() -> *mut Entry {
  &DISPOSED_MARKER as *const u8 as *mut Entry
}

#[inline]
fn into_raw(resource: DisposeHandle) -> *mut Entry {
  Box::into_raw(Box::new(resource))
}

/// Reclaims a pointer previously produced by `into_raw`.
///
/// # Safety
///
/// `raw` must be non-null, not the marker, and owned by the caller.
#[inline]
unsafe fn from_raw(raw: *mut Entry) -> DisposeHandle {
  *Box::from_raw(raw)
}

pub struct ResourceSlot {
  current: AtomicPtr<Entry>,
}

impl Default for ResourceSlot {
  fn default() -> Self {
    Self::new()
  }
}

impl ResourceSlot {
  /// An empty slot.
  pub fn new() -> Self {
    ResourceSlot {
      current: AtomicPtr::new(ptr::null_mut()),
    }
  }

  /// A slot already holding `resource`.
  pub fn with(resource: DisposeHandle) -> Self {
    ResourceSlot {
      current: AtomicPtr::new(into_raw(resource)),
    }
  }

  /// Stores `resource`, canceling whatever the slot held before.
  ///
  /// Returns `false` if the slot was already disposed, in which case
  /// `resource` is canceled instead of stored.
  pub fn set(&self, resource: DisposeHandle) -> bool {
    match self.swap_in(resource) {
      Ok(Some(previous)) => {
        previous.dispose();
        true
      }
      Ok(None) => true,
      Err(()) => false,
    }
  }

  /// Stores `resource` without canceling the previous one, which is dropped.
  ///
  /// Returns `false` if the slot was already disposed, in which case
  /// `resource` is canceled instead of stored.
  pub fn replace(&self, resource: DisposeHandle) -> bool {
    self.swap_in(resource).is_ok()
  }

  /// Stores `resource` only into an empty slot.
  ///
  /// Setting twice is a caller bug: the new resource is canceled, the problem
  /// is logged and `Err(RxError::DisposableAlreadySet)` is returned. A slot
  /// that was disposed in the meantime is a legitimate race and yields
  /// `Ok(false)` after canceling `resource`.
  pub fn set_once(&self, resource: DisposeHandle) -> Result<bool, RxError> {
    let raw = into_raw(resource);
    match self
      .current
      .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
    {
      Ok(_) => Ok(true),
      Err(actual) => {
        // SAFETY: the exchange failed, so `raw` was never published.
        let resource = unsafe { from_raw(raw) };
        resource.dispose();
        if actual == disposed_marker() {
          Ok(false)
        } else {
          tracing::warn!(target: "fibre_rx", "resource slot set twice");
          Err(RxError::DisposableAlreadySet)
        }
      }
    }
  }

  /// Stores `resource` only into an empty slot, reporting a lost race as
  /// `false` rather than an error.
  ///
  /// `resource` is canceled only if the slot turned out to be disposed. When
  /// another resource won the race it is left untouched.
  pub fn set_if_empty(&self, resource: DisposeHandle) -> bool {
    let raw = into_raw(resource);
    match self
      .current
      .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
    {
      Ok(_) => true,
      Err(actual) => {
        // SAFETY: the exchange failed, so `raw` was never published.
        let resource = unsafe { from_raw(raw) };
        if actual == disposed_marker() {
          resource.dispose();
        }
        false
      }
    }
  }

  /// Moves the slot to its disposed state, canceling the held resource.
  ///
  /// Returns `true` only for the call that performed the transition, so the
  /// cancellation side effects run exactly once however many threads race.
  pub fn dispose(&self) -> bool {
    let previous = self.current.swap(disposed_marker(), Ordering::AcqRel);
    if previous == disposed_marker() {
      return false;
    }
    if !previous.is_null() {
      // SAFETY: the swap removed `previous` from the slot; we own it now.
      let resource = unsafe { from_raw(previous) };
      resource.dispose();
    }
    true
  }

  pub fn is_disposed(&self) -> bool {
    self.current.load(Ordering::Acquire) == disposed_marker()
  }

  /// Whether a live resource is currently stored.
  pub fn has_resource(&self) -> bool {
    let p = self.current.load(Ordering::Acquire);
    !p.is_null() && p != disposed_marker()
  }

  /// Installs `resource` unless the slot is disposed. `Ok` carries the
  /// displaced resource, if any.
  fn swap_in(&self, resource: DisposeHandle) -> Result<Option<DisposeHandle>, ()> {
    let raw = into_raw(resource);
    let mut current = self.current.load(Ordering::Acquire);
    loop {
      if current == disposed_marker() {
        // SAFETY: `raw` was never published.
        let resource = unsafe { from_raw(raw) };
        resource.dispose();
        return Err(());
      }
      match self
        .current
        .compare_exchange_weak(current, raw, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(previous) => {
          if previous.is_null() {
            return Ok(None);
          }
          // SAFETY: the exchange removed `previous` from the slot.
          return Ok(Some(unsafe { from_raw(previous) }));
        }
        Err(actual) => current = actual,
      }
    }
  }
}

impl Disposable for ResourceSlot {
  fn dispose(&self) {
    let _ = ResourceSlot::dispose(self);
  }

  fn is_disposed(&self) -> bool {
    ResourceSlot::is_disposed(self)
  }
}

impl Drop for ResourceSlot {
  fn drop(&mut self) {
    let p = *self.current.get_mut();
    if !p.is_null() && p != disposed_marker() {
      // Dropping the slot releases the handle without canceling it.
      drop(unsafe { from_raw(p) });
    }
  }
}

impl fmt::Debug for ResourceSlot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = if self.is_disposed() {
      "Disposed"
    } else if self.has_resource() {
      "Held"
    } else {
      "Empty"
    };
    f.debug_struct("ResourceSlot").field("state", &state).finish()
  }
}
