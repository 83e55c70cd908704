// rx/src/queue/spsc_linked.rs

use core::fmt;
use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::config::QueueConfig;
use crate::telemetry;

/// A fixed-size array segment. Islands are linked in producer order.
struct Island<T> {
  slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
  /// Number of slots the producer has written and published.
  written: AtomicUsize,
  /// Published by the producer once it moves on to the next island. The link
  /// owns the island it points to.
  next: AtomicPtr<Island<T>>,
}

impl<T> Island<T> {
  fn new(capacity: usize) -> Box<Self> {
    let slots = (0..capacity)
      .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
      .collect::<Vec<_>>()
      .into_boxed_slice();
    Box::new(Island {
      slots,
      written: AtomicUsize::new(0),
      next: AtomicPtr::new(ptr::null_mut()),
    })
  }

  #[inline]
  fn capacity(&self) -> usize {
    self.slots.len()
  }
}

/// Position of one side of the queue. Only that side ever touches it.
struct Cursor<T> {
  island: *mut Island<T>,
  index: usize,
}

/// An unbounded single-producer/single-consumer queue built from linked
/// islands.
///
/// # Safety Architecture
///
/// 1. **Producer**: owns `producer`. Writes a slot, then publishes it by
///    storing the island's `written` count with `Release`. When its island is
///    full it allocates the next one (double the size, up to the configured
///    maximum), writes the value into slot 0, and only then publishes the
///    `next` link. That link is the single synchronization point for island
///    hand-over.
///
/// 2. **Consumer**: owns `consumer`. Reads slots below `written` (loaded with
///    `Acquire`). After exhausting an island it follows `next` and frees the
///    island it left: the producer stopped touching it when it published the
///    link.
///
/// Exactly one thread may call [`offer`](Self::offer) and exactly one
/// (possibly different) thread may call the consumer-side methods. Callers
/// inside the crate uphold this through the observable contract or a drain
/// loop; [`spsc_linked`] hands out `!Sync` endpoints for everyone else.
pub(crate) struct SpscLinkedQueue<T> {
  config: QueueConfig,
  producer: CachePadded<UnsafeCell<Cursor<T>>>,
  consumer: CachePadded<UnsafeCell<Cursor<T>>>,
}

// Safe to share across threads because each side is only touched by its
// single owner and hand-over is published through atomics.
unsafe impl<T: Send> Send for SpscLinkedQueue<T> {}
unsafe impl<T: Send> Sync for SpscLinkedQueue<T> {}

impl<T> SpscLinkedQueue<T> {
  pub(crate) fn new(config: QueueConfig) -> Self {
    let config = config.normalized();
    let first = Box::into_raw(Island::new(config.initial_island_capacity));
    SpscLinkedQueue {
      config,
      producer: CachePadded::new(UnsafeCell::new(Cursor {
        island: first,
        index: 0,
      })),
      consumer: CachePadded::new(UnsafeCell::new(Cursor {
        island: first,
        index: 0,
      })),
    }
  }

  /// Appends `value`. Producer only.
  pub(crate) fn offer(&self, value: T) {
    unsafe {
      let cursor = &mut *self.producer.get();
      let island = &*cursor.island;

      if cursor.index < island.capacity() {
        (*island.slots[cursor.index].get()).write(value);
        cursor.index += 1;
        island.written.store(cursor.index, Ordering::Release);
        return;
      }

      // Current island is full: link a fresh one carrying this value.
      let capacity = self.config.next_capacity(island.capacity());
      let next = Island::new(capacity);
      (*next.slots[0].get()).write(value);
      next.written.store(1, Ordering::Relaxed);
      let next_ptr = Box::into_raw(next);

      // Publishes slot 0 and the island itself to the consumer.
      island.next.store(next_ptr, Ordering::Release);

      cursor.island = next_ptr;
      cursor.index = 1;

      telemetry::increment_counter("spsc_linked", "island_linked");
      tracing::trace!(target: "fibre_rx", capacity, "spsc queue linked a new island");
    }
  }

  /// Removes the oldest value. Consumer only.
  pub(crate) fn poll(&self) -> Option<T> {
    unsafe {
      let cursor = &mut *self.consumer.get();
      loop {
        let island = &*cursor.island;

        if cursor.index < island.capacity() {
          if cursor.index < island.written.load(Ordering::Acquire) {
            let value = (*island.slots[cursor.index].get()).assume_init_read();
            cursor.index += 1;
            return Some(value);
          }
          return None;
        }

        // Island exhausted. An unpublished link means nothing more was
        // offered yet.
        let next = island.next.load(Ordering::Acquire);
        if next.is_null() {
          return None;
        }
        let exhausted = cursor.island;
        cursor.island = next;
        cursor.index = 0;
        // Every slot in it has been read; MaybeUninit slots drop nothing.
        drop(Box::from_raw(exhausted));
      }
    }
  }

  /// Consumer only.
  pub(crate) fn is_empty(&self) -> bool {
    unsafe {
      let cursor = &*self.consumer.get();
      let island = &*cursor.island;
      if cursor.index < island.capacity() {
        return cursor.index >= island.written.load(Ordering::Acquire);
      }
      // A linked island always carries at least one value.
      island.next.load(Ordering::Acquire).is_null()
    }
  }

  /// Drops every queued value. Consumer only.
  pub(crate) fn clear(&self) {
    while self.poll().is_some() {}
  }
}

impl<T> Drop for SpscLinkedQueue<T> {
  fn drop(&mut self) {
    let cursor = self.consumer.get_mut();
    let mut island_ptr = cursor.island;
    let mut start = cursor.index;

    while !island_ptr.is_null() {
      // SAFETY: `&mut self` means neither side is active; every island from
      // the consumer's onwards is still owned by the queue.
      let mut island = unsafe { Box::from_raw(island_ptr) };
      let written = *island.written.get_mut();
      for i in start..written {
        unsafe { (*island.slots[i].get()).assume_init_drop() };
      }
      island_ptr = *island.next.get_mut();
      start = 0;
    }
  }
}

impl<T> fmt::Debug for SpscLinkedQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SpscLinkedQueue")
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

/// Creates an unbounded SPSC linked queue and returns its two endpoints.
///
/// Each endpoint can be moved to another thread but not shared, which
/// enforces the one-producer/one-consumer contract at compile time.
pub fn spsc_linked<T: Send>(config: QueueConfig) -> (LinkedProducer<T>, LinkedConsumer<T>) {
  let queue = Arc::new(SpscLinkedQueue::new(config));
  (
    LinkedProducer {
      queue: queue.clone(),
      _not_sync: PhantomData,
    },
    LinkedConsumer {
      queue,
      _not_sync: PhantomData,
    },
  )
}

pub struct LinkedProducer<T> {
  queue: Arc<SpscLinkedQueue<T>>,
  _not_sync: PhantomData<Cell<()>>,
}

pub struct LinkedConsumer<T> {
  queue: Arc<SpscLinkedQueue<T>>,
  _not_sync: PhantomData<Cell<()>>,
}

impl<T: Send> LinkedProducer<T> {
  pub fn offer(&self, value: T) {
    self.queue.offer(value);
  }
}

impl<T: Send> LinkedConsumer<T> {
  pub fn poll(&self) -> Option<T> {
    self.queue.poll()
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  pub fn clear(&self) {
    self.queue.clear();
  }
}

impl<T> fmt::Debug for LinkedProducer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LinkedProducer").finish_non_exhaustive()
  }
}

impl<T> fmt::Debug for LinkedConsumer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LinkedConsumer").finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::thread;

  fn small() -> QueueConfig {
    QueueConfig::new(2, 8)
  }

  #[test]
  fn simple_offer_poll() {
    let q = SpscLinkedQueue::new(QueueConfig::default());
    assert!(q.is_empty());
    q.offer(1);
    q.offer(2);
    assert!(!q.is_empty());
    assert_eq!(q.poll(), Some(1));
    assert_eq!(q.poll(), Some(2));
    assert_eq!(q.poll(), None);
    assert!(q.is_empty());
  }

  #[test]
  fn islands_grow_and_stay_fifo() {
    let q = SpscLinkedQueue::new(small());
    // 2 + 4 + 8 + 8 + ... crosses several island boundaries.
    for i in 0..40 {
      q.offer(i);
    }
    for i in 0..40 {
      assert_eq!(q.poll(), Some(i));
    }
    assert_eq!(q.poll(), None);
  }

  #[test]
  fn empty_at_island_boundary() {
    let q = SpscLinkedQueue::new(small());
    q.offer(1);
    q.offer(2);
    assert_eq!(q.poll(), Some(1));
    assert_eq!(q.poll(), Some(2));
    // Consumer sits at the end of a full island with no link yet.
    assert!(q.is_empty());
    assert_eq!(q.poll(), None);
    q.offer(3);
    assert!(!q.is_empty());
    assert_eq!(q.poll(), Some(3));
  }

  #[test]
  fn interleaved_offer_poll_across_islands() {
    let q = SpscLinkedQueue::new(small());
    let mut produced = Vec::new();
    let mut consumed = Vec::new();
    for round in 0..50 {
      for k in 0..(round % 7) {
        let v = round * 10 + k;
        q.offer(v);
        produced.push(v);
      }
      if round % 3 == 0 {
        while let Some(v) = q.poll() {
          consumed.push(v);
        }
      }
    }
    while let Some(v) = q.poll() {
      consumed.push(v);
    }
    assert_eq!(produced, consumed);
    assert!(q.is_empty());
  }

  #[test]
  fn clear_drops_everything() {
    let q = SpscLinkedQueue::new(small());
    for i in 0..20 {
      q.offer(i);
    }
    q.clear();
    assert!(q.is_empty());
    q.offer(99);
    assert_eq!(q.poll(), Some(99));
  }

  #[test]
  fn drop_cleanup_across_islands() {
    static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);
    struct Dropper;
    impl Drop for Dropper {
      fn drop(&mut self) {
        DROP_COUNT.fetch_add(1, Ordering::Relaxed);
      }
    }

    let q = SpscLinkedQueue::new(small());
    let count = 25;
    for _ in 0..count {
      q.offer(Dropper);
    }
    // Consume part of the second island.
    for _ in 0..3 {
      q.poll();
    }
    assert_eq!(DROP_COUNT.load(Ordering::Relaxed), 3);
    drop(q);
    assert_eq!(DROP_COUNT.load(Ordering::Relaxed), count);
  }

  #[test]
  fn concurrent_endpoints_preserve_order() {
    let (tx, rx) = spsc_linked(small());
    let producer = thread::spawn(move || {
      for i in 0..10_000u32 {
        tx.offer(i);
      }
    });

    let mut next = 0u32;
    while next < 10_000 {
      match rx.poll() {
        Some(v) => {
          assert_eq!(v, next);
          next += 1;
        }
        None => thread::yield_now(),
      }
    }
    producer.join().unwrap();
    assert!(rx.is_empty());
  }
}
