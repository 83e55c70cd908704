// rx/src/testing/scheduler.rs

use core::fmt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::disposable::{self, DisposeHandle};
use crate::scheduler::{Scheduler, Task};

struct State {
  now: Duration,
  next_seq: u64,
  /// Keyed by due time, then scheduling order.
  queue: BTreeMap<(Duration, u64), Task>,
}

struct Inner {
  state: Mutex<State>,
  executed: AtomicUsize,
}

/// A scheduler driven by a manual virtual clock starting at zero.
///
/// Nothing runs until the test advances time or calls
/// [`trigger_actions`](Self::trigger_actions). Tasks run on the calling
/// thread, outside of any internal lock, so they may schedule further tasks.
#[derive(Clone)]
pub struct TestScheduler {
  inner: Arc<Inner>,
}

impl Default for TestScheduler {
  fn default() -> Self {
    Self::new()
  }
}

impl TestScheduler {
  pub fn new() -> Self {
    TestScheduler {
      inner: Arc::new(Inner {
        state: Mutex::new(State {
          now: Duration::ZERO,
          next_seq: 0,
          queue: BTreeMap::new(),
        }),
        executed: AtomicUsize::new(0),
      }),
    }
  }

  /// Moves the clock forward by `delta`, running every task that falls due.
  pub fn advance_time_by(&self, delta: Duration) {
    let target = self.inner.state.lock().now + delta;
    self.advance_time_to(target);
  }

  /// Moves the clock to `target` (never backwards), running due tasks in
  /// order. Each task sees the clock at its own due time.
  pub fn advance_time_to(&self, target: Duration) {
    loop {
      let task = {
        let mut state = self.inner.state.lock();
        let next_due = state.queue.first_key_value().map(|(&(due, _), _)| due);
        match next_due {
          Some(due) if due <= target => {
            state.now = state.now.max(due);
            state.queue.pop_first().map(|(_, task)| task)
          }
          _ => {
            state.now = state.now.max(target);
            None
          }
        }
      };
      match task {
        Some(task) => {
          task();
          self.inner.executed.fetch_add(1, Ordering::Relaxed);
        }
        None => return,
      }
    }
  }

  /// Runs everything due at the current time, including tasks those tasks
  /// schedule without delay.
  pub fn trigger_actions(&self) {
    let now = self.inner.state.lock().now;
    self.advance_time_to(now);
  }

  pub fn pending_count(&self) -> usize {
    self.inner.state.lock().queue.len()
  }

  pub fn executed_count(&self) -> usize {
    self.inner.executed.load(Ordering::Relaxed)
  }
}

impl Scheduler for TestScheduler {
  fn now(&self) -> Duration {
    self.inner.state.lock().now
  }

  fn schedule_after(&self, task: Task, delay: Duration) -> DisposeHandle {
    let key = {
      let mut state = self.inner.state.lock();
      let key = (state.now + delay, state.next_seq);
      state.next_seq += 1;
      state.queue.insert(key, task);
      key
    };
    let inner = Arc::downgrade(&self.inner);
    disposable::from_fn(move || {
      if let Some(inner) = inner.upgrade() {
        // Dropped outside the lock: the task may own arbitrary state.
        let removed = inner.state.lock().queue.remove(&key);
        drop(removed);
      }
    })
  }
}

impl fmt::Debug for TestScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.lock();
    f.debug_struct("TestScheduler")
      .field("now", &state.now)
      .field("pending", &state.queue.len())
      .field("executed", &self.executed_count())
      .finish()
  }
}
