// rx/src/internal/cell.rs

use std::cell::UnsafeCell;

/// State touched only by whoever currently owns a drain loop (or by the one
/// producer / one consumer of a single-producer structure).
///
/// Exclusivity is established externally, by a [`Wip`](super::wip::Wip)
/// counter or by the single-producer/single-consumer contract; the acquire
/// and release orderings on that counter carry the happens-before edges.
pub(crate) struct OwnerCell<T> {
  value: UnsafeCell<T>,
}

// Access is serialized by the owner protocol described above.
unsafe impl<T: Send> Send for OwnerCell<T> {}
unsafe impl<T: Send> Sync for OwnerCell<T> {}

impl<T> OwnerCell<T> {
  pub(crate) const fn new(value: T) -> Self {
    OwnerCell {
      value: UnsafeCell::new(value),
    }
  }

  /// # Safety
  ///
  /// The caller must hold exclusive ownership for the lifetime of the
  /// returned reference.
  #[inline]
  #[allow(clippy::mut_from_ref)]
  pub(crate) unsafe fn get_mut(&self) -> &mut T {
    &mut *self.value.get()
  }
}
