// rx/src/observe_on.rs

//! Moves delivery of a source's signals onto a [`Scheduler`].
//!
//! The stage negotiates `ANY | BOUNDARY` fusion with its upstream. Under
//! `SYNC` it pulls the upstream dry from the scheduled task; under `ASYNC` it
//! pulls from the upstream's own queue whenever it is told values are ready;
//! otherwise it buffers pushed values in an [`SpscLinkedQueue`]. Each burst of
//! work schedules at most one drain task.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::config::QueueConfig;
use crate::disposable::{Disposable, DisposeHandle};
use crate::error::{report_undeliverable, SharedError};
use crate::fusion::{FusionMode, Pull};
use crate::internal::guard::Exclusive;
use crate::internal::wip::Wip;
use crate::observer::{Observable, Observer, ObserverRef, Upstream};
use crate::queue::SpscLinkedQueue;
use crate::resource_slot::ResourceSlot;
use crate::scheduler::Scheduler;
use crate::telemetry;

const LOCATION: &str = "observe_on";

const MODE_NONE: u8 = 0;
const MODE_SYNC: u8 = 1;
const MODE_ASYNC: u8 = 2;

/// Re-delivers `source`'s signals from tasks run by `scheduler`.
pub struct ObserveOn<O> {
  source: O,
  scheduler: Arc<dyn Scheduler>,
  delay_error: bool,
  config: QueueConfig,
}

impl<O> ObserveOn<O> {
  pub fn new(source: O, scheduler: Arc<dyn Scheduler>) -> Self {
    ObserveOn {
      source,
      scheduler,
      delay_error: false,
      config: QueueConfig::default(),
    }
  }

  /// With `true`, an upstream error waits behind the values buffered before
  /// it instead of cutting ahead of them.
  pub fn delay_error(mut self, delay_error: bool) -> Self {
    self.delay_error = delay_error;
    self
  }

  /// Sizing of the buffer used when the upstream does not fuse.
  pub fn with_config(mut self, config: QueueConfig) -> Self {
    self.config = config;
    self
  }
}

impl<T, O> Observable<T> for ObserveOn<O>
where
  T: Send + 'static,
  O: Observable<T>,
{
  fn subscribe(&self, observer: ObserverRef<T>) -> DisposeHandle {
    let stage = Arc::new_cyclic(|this| Stage {
      downstream: observer,
      scheduler: self.scheduler.clone(),
      delay_error: self.delay_error,
      this: this.clone(),
      cancel: ResourceSlot::new(),
      task: ResourceSlot::new(),
      fused: OnceLock::new(),
      mode: AtomicU8::new(MODE_NONE),
      queue: SpscLinkedQueue::new(self.config),
      producer: Exclusive::new(),
      wip: Wip::new(),
      done: AtomicBool::new(false),
      error: OnceLock::new(),
      finished: AtomicBool::new(false),
    });
    self.source.subscribe(stage.clone());
    stage
  }
}

impl<O> fmt::Debug for ObserveOn<O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ObserveOn")
      .field("delay_error", &self.delay_error)
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

struct Stage<T> {
  downstream: ObserverRef<T>,
  scheduler: Arc<dyn Scheduler>,
  delay_error: bool,
  this: Weak<Stage<T>>,
  /// Cancels the upstream.
  cancel: ResourceSlot,
  /// The pending drain task.
  task: ResourceSlot,
  /// Set only when fusion was granted.
  fused: OnceLock<Upstream<T>>,
  mode: AtomicU8,
  queue: SpscLinkedQueue<T>,
  producer: Exclusive,
  wip: Wip,
  done: AtomicBool,
  error: OnceLock<SharedError>,
  /// No further signal may reach downstream.
  finished: AtomicBool,
}

impl<T: Send + 'static> Stage<T> {
  fn schedule(&self) {
    if !self.wip.enter() {
      return;
    }
    let Some(this) = self.this.upgrade() else {
      return;
    };
    let handle = self.scheduler.schedule(Box::new(move || this.run()));
    self.task.replace(handle);
  }

  fn run(&self) {
    if self.mode.load(Ordering::Acquire) == MODE_SYNC {
      self.drain_sync();
    } else {
      self.drain_queue();
    }
  }

  fn drain_sync(&self) {
    let Some(upstream) = self.fused.get() else {
      return;
    };
    let Some(queue) = upstream.fused() else {
      return;
    };
    loop {
      if self.finished.load(Ordering::Acquire) {
        return;
      }
      match queue.try_poll() {
        Pull::Value(value) => self.downstream.on_next(value),
        Pull::Empty | Pull::Done => {
          if !self.finished.swap(true, Ordering::AcqRel) {
            self.downstream.on_complete();
          }
          return;
        }
      }
    }
  }

  fn drain_queue(&self) {
    let mut missed = 1;
    loop {
      loop {
        if self.finished.load(Ordering::Acquire) {
          self.clear();
          return;
        }
        let done = self.done.load(Ordering::Acquire);
        if done && !self.delay_error {
          if let Some(error) = self.error.get() {
            self.clear();
            self.terminate(Some(error.clone()));
            return;
          }
        }
        match self.poll() {
          Some(value) => self.downstream.on_next(value),
          None => {
            if done {
              self.terminate(self.error.get().cloned());
              return;
            }
            break;
          }
        }
      }

      missed = self.wip.leave(missed);
      if missed == 0 {
        return;
      }
    }
  }

  fn poll(&self) -> Option<T> {
    if self.mode.load(Ordering::Acquire) == MODE_ASYNC {
      self
        .fused
        .get()
        .and_then(|upstream| upstream.fused())
        .and_then(|queue| queue.try_poll().into_value())
    } else {
      self.queue.poll()
    }
  }

  /// Drops buffered values. Only the drain owner may call it.
  fn clear(&self) {
    if self.mode.load(Ordering::Acquire) == MODE_NONE {
      self.queue.clear();
    }
  }

  fn terminate(&self, error: Option<SharedError>) {
    if self.finished.swap(true, Ordering::AcqRel) {
      return;
    }
    match error {
      Some(error) => self.downstream.on_error(error),
      None => self.downstream.on_complete(),
    }
  }
}

impl<T: Send + 'static> Observer<T> for Stage<T> {
  fn on_subscribe(&self, upstream: Upstream<T>) {
    if self.cancel.set_once(upstream.to_handle()) != Ok(true) {
      return;
    }
    let Some(this) = self.this.upgrade() else {
      return;
    };

    let granted = upstream.request_fusion(FusionMode::ANY | FusionMode::BOUNDARY);
    tracing::trace!(target: "fibre_rx", ?granted, "observe_on negotiated upstream fusion");
    if granted.is_fused() {
      let _ = self.fused.set(upstream);
    }

    if granted == FusionMode::SYNC {
      self.mode.store(MODE_SYNC, Ordering::Release);
      self.done.store(true, Ordering::Release);
      self.downstream.on_subscribe(Upstream::Plain(this));
      self.schedule();
      return;
    }
    if granted == FusionMode::ASYNC {
      self.mode.store(MODE_ASYNC, Ordering::Release);
    }
    self.downstream.on_subscribe(Upstream::Plain(this));
  }

  fn on_next(&self, value: T) {
    if self.done.load(Ordering::Acquire) || self.mode.load(Ordering::Acquire) != MODE_NONE {
      return;
    }
    {
      let Some(_claim) = self.producer.try_claim() else {
        tracing::warn!(target: "fibre_rx", "concurrent on_next into observe_on; value dropped");
        telemetry::increment_counter(LOCATION, "concurrent_next");
        return;
      };
      self.queue.offer(value);
    }
    self.schedule();
  }

  fn on_ready(&self) {
    self.schedule();
  }

  fn on_error(&self, error: SharedError) {
    if self.done.load(Ordering::Acquire) {
      report_undeliverable(&error, LOCATION);
      return;
    }
    if let Err(error) = self.error.set(error) {
      report_undeliverable(&error, LOCATION);
      return;
    }
    self.done.store(true, Ordering::Release);
    self.schedule();
  }

  fn on_complete(&self) {
    if self.done.swap(true, Ordering::AcqRel) {
      return;
    }
    self.schedule();
  }
}

impl<T: Send + 'static> Disposable for Stage<T> {
  fn dispose(&self) {
    if self.finished.swap(true, Ordering::AcqRel) {
      return;
    }
    self.cancel.dispose();
    self.task.dispose();
    tracing::debug!(target: "fibre_rx", "observe_on disposed");
    // Nobody is draining: clear on the drain's behalf and keep the counter
    // held so no drain starts again.
    if self.wip.enter() {
      self.clear();
    }
  }

  fn is_disposed(&self) -> bool {
    self.finished.load(Ordering::Acquire)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source;
  use crate::subject::{Subject, UnicastSubject};
  use crate::testing::{TestObserver, TestScheduler};

  #[test]
  fn values_wait_for_the_scheduler() {
    let scheduler = TestScheduler::new();
    let stage = ObserveOn::new(source::from_vec(vec![1, 2, 3]), Arc::new(scheduler.clone()));
    let to = TestObserver::new();
    stage.subscribe(to.clone());
    to.assert_values(&[]);
    assert_eq!(scheduler.pending_count(), 1);

    scheduler.trigger_actions();
    to.assert_values(&[1, 2, 3]);
    to.assert_complete();
    assert_eq!(scheduler.executed_count(), 1);
  }

  #[test]
  fn async_fused_upstream_is_polled_on_ready() {
    let scheduler = TestScheduler::new();
    let subject = Arc::new(UnicastSubject::new());
    let stage = ObserveOn::new(subject.clone(), Arc::new(scheduler.clone()));
    let to = TestObserver::new();
    stage.subscribe(to.clone());

    subject.on_next(1);
    subject.on_next(2);
    to.assert_values(&[]);
    scheduler.trigger_actions();
    to.assert_values(&[1, 2]);

    subject.on_complete();
    scheduler.trigger_actions();
    to.assert_complete();
  }

  #[test]
  fn dispose_cancels_pending_drain() {
    let scheduler = TestScheduler::new();
    let subject = Arc::new(UnicastSubject::new());
    let stage = ObserveOn::new(subject.clone(), Arc::new(scheduler.clone()));
    let to = TestObserver::new();
    let handle = stage.subscribe(to.clone());
    subject.on_next(1);
    assert_eq!(scheduler.pending_count(), 1);
    handle.dispose();
    assert_eq!(scheduler.pending_count(), 0);
    scheduler.trigger_actions();
    to.assert_values(&[]);
    assert!(!subject.has_observers());
  }
}
