// rx/src/internal/guard.rs

use std::sync::atomic::{AtomicBool, Ordering};

/// A non-blocking claim on one side of a single-producer or single-consumer
/// structure.
///
/// The observer contract already serializes callers; the claim turns a
/// contract violation (two threads calling `on_next` at once) into a refused
/// call instead of a data race. Nobody ever waits on it.
pub(crate) struct Exclusive {
  busy: AtomicBool,
}

impl Exclusive {
  pub(crate) const fn new() -> Self {
    Exclusive {
      busy: AtomicBool::new(false),
    }
  }

  /// `None` if another caller currently holds the claim.
  #[inline]
  pub(crate) fn try_claim(&self) -> Option<Claim<'_>> {
    if self.busy.swap(true, Ordering::Acquire) {
      None
    } else {
      Some(Claim { busy: &self.busy })
    }
  }
}

pub(crate) struct Claim<'a> {
  busy: &'a AtomicBool,
}

impl Drop for Claim<'_> {
  fn drop(&mut self) {
    self.busy.store(false, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_claim_is_refused_until_release() {
    let ex = Exclusive::new();
    let first = ex.try_claim();
    assert!(first.is_some());
    assert!(ex.try_claim().is_none());
    drop(first);
    assert!(ex.try_claim().is_some());
  }
}
