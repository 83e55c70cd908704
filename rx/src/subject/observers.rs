// rx/src/subject/observers.rs

//! Copy-on-write observer snapshots shared by the multicast subjects.
//!
//! The set is either `Active` with an immutable array of entries or
//! `Terminated` with the stored terminal signal. Every add, remove, and the
//! single terminal transition publishes a brand-new state through one
//! compare-and-swap; fan-out iterates whatever snapshot it loaded and is never
//! disturbed by concurrent changes.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;

use crate::disposable::Disposable;
use crate::observer::ObserverRef;

pub(crate) enum Slots<E, S> {
  Active(Vec<Arc<E>>),
  Terminated(S),
}

/// A loaded state. Iterating a terminated snapshot yields nothing.
pub(crate) struct Snapshot<E, S>(Arc<Slots<E, S>>);

impl<E, S> Snapshot<E, S> {
  pub(crate) fn iter(&self) -> std::slice::Iter<'_, Arc<E>> {
    match &*self.0 {
      Slots::Active(entries) => entries.iter(),
      Slots::Terminated(_) => <&[Arc<E>]>::default().iter(),
    }
  }
}

pub(crate) struct ObserverSet<E, S> {
  state: ArcSwap<Slots<E, S>>,
}

impl<E, S: Clone> ObserverSet<E, S> {
  pub(crate) fn new() -> Self {
    ObserverSet {
      state: ArcSwap::from_pointee(Slots::Active(Vec::new())),
    }
  }

  /// Appends `entry`, or hands back the terminal signal if the set has
  /// already terminated (the entry is not registered then).
  pub(crate) fn add(&self, entry: Arc<E>) -> Result<(), S> {
    let mut current = self.state.load();
    loop {
      let next = match &**current {
        Slots::Terminated(terminal) => return Err(terminal.clone()),
        Slots::Active(entries) => {
          let mut grown = Vec::with_capacity(entries.len() + 1);
          grown.extend(entries.iter().cloned());
          grown.push(entry.clone());
          Slots::Active(grown)
        }
      };
      let previous = self.state.compare_and_swap(&*current, Arc::new(next));
      if Arc::ptr_eq(&*previous, &*current) {
        return Ok(());
      }
      current = previous;
    }
  }

  /// Removes `entry` if present. Returns the number of entries left, or `None`
  /// if it was not registered (already removed, or the set terminated).
  pub(crate) fn remove(&self, entry: *const E) -> Option<usize> {
    let mut current = self.state.load();
    loop {
      let next = match &**current {
        Slots::Terminated(_) => return None,
        Slots::Active(entries) => {
          let index = entries.iter().position(|e| Arc::as_ptr(e) == entry)?;
          let mut shrunk = Vec::with_capacity(entries.len() - 1);
          shrunk.extend(entries[..index].iter().cloned());
          shrunk.extend(entries[index + 1..].iter().cloned());
          shrunk
        }
      };
      let remaining = next.len();
      let previous = self
        .state
        .compare_and_swap(&*current, Arc::new(Slots::Active(next)));
      if Arc::ptr_eq(&*previous, &*current) {
        return Some(remaining);
      }
      current = previous;
    }
  }

  /// Loads the current snapshot for fan-out.
  pub(crate) fn snapshot(&self) -> Snapshot<E, S> {
    Snapshot(self.state.load_full())
  }

  /// Moves from `Active` to `Terminated(terminal)`. Only the first caller
  /// wins and receives the last active snapshot to fan the signal out to;
  /// from then on the set holds no observer references.
  pub(crate) fn terminate(&self, terminal: S) -> Option<Snapshot<E, S>> {
    let terminated = Arc::new(Slots::Terminated(terminal));
    let mut current = self.state.load();
    loop {
      if let Slots::Terminated(_) = &**current {
        return None;
      }
      let previous = self.state.compare_and_swap(&*current, terminated.clone());
      if Arc::ptr_eq(&*previous, &*current) {
        return Some(Snapshot(arc_swap::Guard::into_inner(previous)));
      }
      current = previous;
    }
  }

  /// The stored terminal signal, if terminated.
  pub(crate) fn terminal(&self) -> Option<S> {
    match &**self.state.load() {
      Slots::Terminated(terminal) => Some(terminal.clone()),
      Slots::Active(_) => None,
    }
  }

  pub(crate) fn is_terminated(&self) -> bool {
    matches!(**self.state.load(), Slots::Terminated(_))
  }

  pub(crate) fn len(&self) -> usize {
    match &**self.state.load() {
      Slots::Active(entries) => entries.len(),
      Slots::Terminated(_) => 0,
    }
  }
}

impl<E, S> fmt::Debug for ObserverSet<E, S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &**self.state.load() {
      Slots::Active(entries) => f
        .debug_struct("ObserverSet")
        .field("active", &entries.len())
        .finish(),
      Slots::Terminated(_) => f.debug_struct("ObserverSet").field("terminated", &true).finish(),
    }
  }
}

/// A registered observer of a broadcast subject. Doubles as the detach handle
/// handed to the observer and returned from `subscribe`.
pub(crate) struct Entry<T, S> {
  pub(crate) observer: ObserverRef<T>,
  disposed: AtomicBool,
  parent: Weak<ObserverSet<Entry<T, S>, S>>,
}

impl<T, S> Entry<T, S> {
  pub(crate) fn new(observer: ObserverRef<T>, parent: &Arc<ObserverSet<Entry<T, S>, S>>) -> Self {
    Entry {
      observer,
      disposed: AtomicBool::new(false),
      parent: Arc::downgrade(parent),
    }
  }

  /// Whether this entry may still receive signals.
  #[inline]
  pub(crate) fn is_live(&self) -> bool {
    !self.disposed.load(Ordering::Acquire)
  }

  /// Marks the entry finished after its terminal signal, so later disposal
  /// does not touch the (already terminated) set.
  #[inline]
  pub(crate) fn finish(&self) -> bool {
    !self.disposed.swap(true, Ordering::AcqRel)
  }
}

impl<T: 'static, S: Clone + Send + Sync + 'static> Disposable for Entry<T, S> {
  fn dispose(&self) {
    if self.finish() {
      if let Some(parent) = self.parent.upgrade() {
        parent.remove(self as *const Entry<T, S>);
      }
    }
  }

  fn is_disposed(&self) -> bool {
    !self.is_live()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn add_remove_and_terminate() {
    let set: ObserverSet<u32, &'static str> = ObserverSet::new();
    let a = Arc::new(1);
    let b = Arc::new(2);
    assert!(set.add(a.clone()).is_ok());
    assert!(set.add(b.clone()).is_ok());
    assert_eq!(set.len(), 2);

    let snap = set.snapshot();
    assert_eq!(set.remove(Arc::as_ptr(&a)), Some(1));
    // The old snapshot is unaffected by the removal.
    assert_eq!(snap.iter().count(), 2);
    assert_eq!(set.remove(Arc::as_ptr(&a)), None);

    let last = set.terminate("done").unwrap();
    assert_eq!(last.iter().map(|e| **e).collect::<Vec<_>>(), vec![2]);
    assert!(set.terminate("again").is_none());
    assert_eq!(set.terminal(), Some("done"));
    assert_eq!(set.add(Arc::new(3)), Err("done"));
    assert_eq!(set.len(), 0);
  }
}
