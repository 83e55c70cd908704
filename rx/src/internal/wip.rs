// rx/src/internal/wip.rs

//! Work-in-progress counter behind every drain loop.
//!
//! A thread that moves the counter from 0 becomes the sole drain owner. Any
//! other thread only bumps the counter and leaves, trusting the owner to see
//! the bump when it tries to release ownership and to loop once more.

use core::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

pub(crate) struct Wip {
  count: CachePadded<AtomicUsize>,
}

impl Wip {
  pub(crate) fn new() -> Self {
    Wip {
      count: CachePadded::new(AtomicUsize::new(0)),
    }
  }

  /// Registers one unit of work. `true` means the caller is now the owner
  /// and must drain.
  #[inline]
  pub(crate) fn enter(&self) -> bool {
    self.count.fetch_add(1, Ordering::AcqRel) == 0
  }

  /// Claims ownership only if nobody holds it, without registering work
  /// otherwise.
  #[inline]
  pub(crate) fn try_enter_idle(&self) -> bool {
    self.count.load(Ordering::Relaxed) == 0
      && self
        .count
        .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed)
        .is_ok()
  }

  /// Gives back `missed` units. Returns the units registered meanwhile; zero
  /// means ownership has been released and the caller must stop draining.
  #[inline]
  pub(crate) fn leave(&self, missed: usize) -> usize {
    self.count.fetch_sub(missed, Ordering::AcqRel) - missed
  }
}

impl fmt::Debug for Wip {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Wip")
      .field(&self.count.load(Ordering::Relaxed))
      .finish()
  }
}
