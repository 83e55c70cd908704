// rx/src/queue/replay_log.rs

use core::fmt;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::config::QueueConfig;
use crate::internal::cell::OwnerCell;
use crate::internal::guard::Exclusive;
use crate::telemetry;

struct Segment<T> {
  slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
  next: AtomicPtr<Segment<T>>,
}

impl<T> Segment<T> {
  fn new(capacity: usize) -> Box<Self> {
    let slots = (0..capacity)
      .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
      .collect::<Vec<_>>()
      .into_boxed_slice();
    Box::new(Segment {
      slots,
      next: AtomicPtr::new(ptr::null_mut()),
    })
  }

  #[inline]
  fn capacity(&self) -> usize {
    self.slots.len()
  }
}

struct Tail<T> {
  segment: *mut Segment<T>,
  offset: usize,
}

/// A reader's position in a [`ReplayLog`].
pub(crate) struct ReplayCursor<T> {
  segment: *mut Segment<T>,
  offset: usize,
  index: usize,
}

// The cursor only points into segments kept alive by the log it came from.
unsafe impl<T: Send + Sync> Send for ReplayCursor<T> {}

impl<T> ReplayCursor<T> {
  /// Number of values this cursor has moved past.
  #[inline]
  pub(crate) fn index(&self) -> usize {
    self.index
  }
}

/// Append-only, single-writer, many-reader log of values.
///
/// Values are written into segments that double in size per the
/// [`QueueConfig`] and are never moved or removed until the log is dropped,
/// so a reader can hand out references while the writer keeps appending.
/// `size` is the publication point: a reader only touches slots below it.
pub(crate) struct ReplayLog<T> {
  config: QueueConfig,
  head: *mut Segment<T>,
  tail: OwnerCell<Tail<T>>,
  writer: Exclusive,
  size: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send + Sync> Send for ReplayLog<T> {}
unsafe impl<T: Send + Sync> Sync for ReplayLog<T> {}

impl<T> ReplayLog<T> {
  pub(crate) fn new(config: QueueConfig) -> Self {
    let config = config.normalized();
    let head = Box::into_raw(Segment::new(config.initial_island_capacity));
    ReplayLog {
      config,
      head,
      tail: OwnerCell::new(Tail {
        segment: head,
        offset: 0,
      }),
      writer: Exclusive::new(),
      size: CachePadded::new(AtomicUsize::new(0)),
    }
  }

  /// Appends `value`. Hands it back if another thread is appending at the
  /// same moment.
  pub(crate) fn push(&self, value: T) -> Result<(), T> {
    let Some(_claim) = self.writer.try_claim() else {
      return Err(value);
    };
    unsafe {
      let tail = self.tail.get_mut();
      let mut segment = &*tail.segment;
      if tail.offset == segment.capacity() {
        let capacity = self.config.next_capacity(segment.capacity());
        let next = Box::into_raw(Segment::new(capacity));
        segment.next.store(next, Ordering::Release);
        tail.segment = next;
        tail.offset = 0;
        segment = &*next;
        telemetry::increment_counter("replay_log", "segment_linked");
      }
      (*segment.slots[tail.offset].get()).write(value);
      tail.offset += 1;
    }
    self.size.fetch_add(1, Ordering::Release);
    Ok(())
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.size.load(Ordering::Acquire)
  }

  /// A cursor positioned before the first value.
  pub(crate) fn cursor(&self) -> ReplayCursor<T> {
    ReplayCursor {
      segment: self.head,
      offset: 0,
      index: 0,
    }
  }

  /// The value under `cursor`, advancing it, or `None` if the cursor has
  /// caught up with the writer.
  ///
  /// # Safety
  ///
  /// `cursor` must have been created by this log's [`cursor`](Self::cursor).
  pub(crate) unsafe fn read<'a>(&'a self, cursor: &mut ReplayCursor<T>) -> Option<&'a T> {
    if cursor.index >= self.len() {
      return None;
    }
    let mut segment = &*cursor.segment;
    if cursor.offset == segment.capacity() {
      // A value beyond this segment was published, so the link is too.
      let next = segment.next.load(Ordering::Acquire);
      cursor.segment = next;
      cursor.offset = 0;
      segment = &*next;
    }
    let value = (*segment.slots[cursor.offset].get()).assume_init_ref();
    cursor.offset += 1;
    cursor.index += 1;
    Some(value)
  }

  /// Clones every value published so far.
  pub(crate) fn to_vec(&self) -> Vec<T>
  where
    T: Clone,
  {
    let mut cursor = self.cursor();
    let mut values = Vec::with_capacity(self.len());
    // SAFETY: the cursor was created just above from this log.
    while let Some(v) = unsafe { self.read(&mut cursor) } {
      values.push(v.clone());
    }
    values
  }
}

impl<T> Drop for ReplayLog<T> {
  fn drop(&mut self) {
    let mut remaining = *self.size.get_mut();
    let mut segment_ptr = self.head;
    while !segment_ptr.is_null() {
      // SAFETY: `&mut self`; every segment is owned by the log.
      let mut segment = unsafe { Box::from_raw(segment_ptr) };
      let filled = remaining.min(segment.capacity());
      for slot in segment.slots[..filled].iter() {
        unsafe { (*slot.get()).assume_init_drop() };
      }
      remaining -= filled;
      segment_ptr = *segment.next.get_mut();
    }
  }
}

impl<T> fmt::Debug for ReplayLog<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ReplayLog")
      .field("len", &self.len())
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn reader_follows_writer_across_segments() {
    let log = ReplayLog::new(QueueConfig::new(2, 4));
    let mut cursor = log.cursor();
    for i in 0..11 {
      log.push(i).unwrap();
    }
    let mut seen = Vec::new();
    while let Some(v) = unsafe { log.read(&mut cursor) } {
      seen.push(*v);
    }
    assert_eq!(seen, (0..11).collect::<Vec<_>>());
    assert_eq!(cursor.index(), 11);

    log.push(11).unwrap();
    assert_eq!(unsafe { log.read(&mut cursor) }, Some(&11));
    assert_eq!(log.to_vec().len(), 12);
  }

  #[test]
  fn drop_releases_every_value() {
    let marker = Arc::new(());
    {
      let log = ReplayLog::new(QueueConfig::new(1, 2));
      for _ in 0..7 {
        log.push(marker.clone()).unwrap();
      }
      assert_eq!(Arc::strong_count(&marker), 8);
    }
    assert_eq!(Arc::strong_count(&marker), 1);
  }

  #[test]
  fn concurrent_reader_sees_a_consistent_prefix() {
    let log = Arc::new(ReplayLog::new(QueueConfig::new(2, 16)));
    let reader_log = log.clone();
    let reader = thread::spawn(move || {
      let mut cursor = reader_log.cursor();
      let mut expected = 0u32;
      while expected < 5_000 {
        match unsafe { reader_log.read(&mut cursor) } {
          Some(v) => {
            assert_eq!(*v, expected);
            expected += 1;
          }
          None => thread::yield_now(),
        }
      }
    });
    for i in 0..5_000u32 {
      log.push(i).unwrap();
    }
    reader.join().unwrap();
  }
}
