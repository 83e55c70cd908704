// rx/src/half_serializer.rs

//! Lock-free arbitration of concurrent `on_next` / `on_error` / `on_complete`
//! calls aimed at a single observer.
//!
//! A caller that finds the work counter at zero becomes the drain owner and
//! invokes the observer directly. A caller that finds it busy leaves its
//! intent behind (value queued, error recorded in the [`ErrorAggregator`],
//! completion flagged) and bumps the counter; the owner notices the bump
//! before releasing ownership and delivers that work too, one callback at a
//! time.
//!
//! Terminal signals take precedence: once one has been requested, values that
//! have not been handed to the observer yet are discarded, and exactly one
//! terminal callback is ever made.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::SegQueue;

use crate::error::SharedError;
use crate::error_aggregator::ErrorAggregator;
use crate::internal::wip::Wip;
use crate::observer::Observer;
use crate::telemetry;

const LOCATION: &str = "half_serializer";

pub struct HalfSerializer<T> {
  wip: Wip,
  errors: ErrorAggregator,
  /// Set once any terminal signal has been requested.
  terminal_requested: AtomicBool,
  /// Set by the drain owner once the terminal callback has been made.
  terminal_delivered: AtomicBool,
  /// Values that arrived while another thread owned the drain.
  pending: SegQueue<T>,
}

impl<T> Default for HalfSerializer<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> HalfSerializer<T> {
  pub fn new() -> Self {
    HalfSerializer {
      wip: Wip::new(),
      errors: ErrorAggregator::new(),
      terminal_requested: AtomicBool::new(false),
      terminal_delivered: AtomicBool::new(false),
      pending: SegQueue::new(),
    }
  }

  /// Delivers `value` unless a terminal signal has already been requested.
  pub fn on_next<O>(&self, observer: &O, value: T)
  where
    O: Observer<T> + ?Sized,
  {
    if self.terminal_requested.load(Ordering::Acquire) {
      telemetry::increment_counter(LOCATION, "next_dropped");
      return;
    }
    self.deliver_or_enqueue(observer, value);
  }

  /// The part of `on_next` after the terminal check. A producer can get here
  /// having read the flag just before a racing terminal was delivered; drain
  /// ownership is never given back after the terminal callback, so such a
  /// value is parked and never reaches the observer.
  fn deliver_or_enqueue<O>(&self, observer: &O, value: T)
  where
    O: Observer<T> + ?Sized,
  {
    if self.wip.try_enter_idle() {
      observer.on_next(value);
      let missed = self.wip.leave(1);
      if missed != 0 {
        self.drain_loop(observer, missed);
      }
      return;
    }

    self.pending.push(value);
    if self.wip.enter() {
      self.drain_loop(observer, 1);
    }
  }

  /// Requests termination with `error`.
  ///
  /// Racing errors are merged into a composite. An error arriving after the
  /// terminal callback was made is logged as undeliverable.
  pub fn on_error<O>(&self, observer: &O, error: SharedError)
  where
    O: Observer<T> + ?Sized,
  {
    if self.errors.add_or_report(error) {
      self.terminal_requested.store(true, Ordering::Release);
      if self.wip.enter() {
        self.drain_loop(observer, 1);
      }
    }
  }

  /// Requests normal termination.
  pub fn on_complete<O>(&self, observer: &O)
  where
    O: Observer<T> + ?Sized,
  {
    self.terminal_requested.store(true, Ordering::Release);
    if self.wip.enter() {
      self.drain_loop(observer, 1);
    }
  }

  /// Whether a terminal signal has been requested (not necessarily delivered
  /// yet).
  pub fn is_terminated(&self) -> bool {
    self.terminal_requested.load(Ordering::Acquire)
  }

  /// Runs while holding drain ownership. Returns with ownership released,
  /// except after the terminal callback: the counter then stays non-zero for
  /// good, which shuts every later caller out of the observer.
  fn drain_loop<O>(&self, observer: &O, mut missed: usize)
  where
    O: Observer<T> + ?Sized,
  {
    loop {
      loop {
        if self.terminal_requested.load(Ordering::Acquire) {
          self.terminal_delivered.store(true, Ordering::Relaxed);
          let mut discarded = 0usize;
          while self.pending.pop().is_some() {
            discarded += 1;
          }
          if discarded > 0 {
            tracing::trace!(target: "fibre_rx", discarded, "values discarded behind terminal signal");
          }
          match self.errors.terminate() {
            Some(error) => {
              telemetry::log_event(LOCATION, "error_delivered");
              observer.on_error(error)
            }
            None => {
              telemetry::log_event(LOCATION, "complete_delivered");
              observer.on_complete()
            }
          }
          return;
        }

        match self.pending.pop() {
          Some(value) => observer.on_next(value),
          None => break,
        }
      }

      missed = self.wip.leave(missed);
      if missed == 0 {
        return;
      }
    }
  }
}

impl<T> fmt::Debug for HalfSerializer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HalfSerializer")
      .field("wip", &self.wip)
      .field("errors", &self.errors)
      .field(
        "terminal_requested",
        &self.terminal_requested.load(Ordering::Relaxed),
      )
      .field(
        "terminal_delivered",
        &self.terminal_delivered.load(Ordering::Relaxed),
      )
      .field("pending", &self.pending.len())
      .finish()
  }
}
