// rx/src/testing/observer.rs

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::SharedError;
use crate::fusion::{FusionMode, Pull};
use crate::observer::{Observer, Upstream};

/// One recorded signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<T> {
  Subscribe,
  Next(T),
  /// The error's display text.
  Error(String),
  Complete,
}

struct Recorded<T> {
  events: Vec<Event<T>>,
  errors: Vec<SharedError>,
  nexts: usize,
  terminated: bool,
  subscribed: bool,
}

/// An observer that records every signal for later assertions.
///
/// Optionally requests a fusion mode on subscribe: when `SYNC` is granted it
/// drains the source immediately, when `ASYNC` is granted it pulls on every
/// `on_ready` and before recording a terminal signal. Protocol violations
/// (signals before subscribe, after a terminal, or a second subscribe) are
/// counted rather than panicking inside the source.
pub struct TestObserver<T> {
  recorded: Mutex<Recorded<T>>,
  upstream: Mutex<Option<Upstream<T>>>,
  requested: FusionMode,
  granted: AtomicU8,
  dispose_on_subscribe: AtomicBool,
  /// Dispose after this many values; zero means never.
  dispose_after: AtomicUsize,
  violations: AtomicUsize,
}

impl<T: 'static> TestObserver<T> {
  pub fn new() -> Arc<Self> {
    Self::with_fusion(FusionMode::NONE)
  }

  /// An observer that requests `mode` from its upstream on subscribe.
  pub fn with_fusion(mode: FusionMode) -> Arc<Self> {
    Arc::new(TestObserver {
      recorded: Mutex::new(Recorded {
        events: Vec::new(),
        errors: Vec::new(),
        nexts: 0,
        terminated: false,
        subscribed: false,
      }),
      upstream: Mutex::new(None),
      requested: mode,
      granted: AtomicU8::new(FusionMode::NONE.bits()),
      dispose_on_subscribe: AtomicBool::new(false),
      dispose_after: AtomicUsize::new(0),
      violations: AtomicUsize::new(0),
    })
  }

  /// Disposes the upstream from inside `on_subscribe`.
  pub fn dispose_on_subscribe(&self) {
    self.dispose_on_subscribe.store(true, Ordering::Relaxed);
  }

  /// Disposes the upstream right after the `count`th value.
  pub fn dispose_after(&self, count: usize) {
    self.dispose_after.store(count, Ordering::Relaxed);
  }

  /// The mode granted by the upstream.
  pub fn fusion_mode(&self) -> FusionMode {
    FusionMode::from_bits_truncate(self.granted.load(Ordering::Acquire))
  }

  pub fn dispose(&self) {
    let upstream = self.upstream.lock().clone();
    if let Some(upstream) = upstream {
      upstream.dispose();
    }
  }

  pub fn is_disposed(&self) -> bool {
    self
      .upstream
      .lock()
      .as_ref()
      .is_some_and(|upstream| upstream.is_disposed())
  }

  pub fn events(&self) -> Vec<Event<T>>
  where
    T: Clone,
  {
    self.recorded.lock().events.clone()
  }

  pub fn values(&self) -> Vec<T>
  where
    T: Clone,
  {
    self
      .recorded
      .lock()
      .events
      .iter()
      .filter_map(|e| match e {
        Event::Next(v) => Some(v.clone()),
        _ => None,
      })
      .collect()
  }

  pub fn value_count(&self) -> usize {
    self.recorded.lock().nexts
  }

  pub fn errors(&self) -> Vec<SharedError> {
    self.recorded.lock().errors.clone()
  }

  pub fn completions(&self) -> usize {
    self
      .recorded
      .lock()
      .events
      .iter()
      .filter(|e| matches!(e, Event::Complete))
      .count()
  }

  pub fn is_terminated(&self) -> bool {
    self.recorded.lock().terminated
  }

  /// Number of protocol violations observed.
  pub fn violations(&self) -> usize {
    self.violations.load(Ordering::Acquire)
  }

  pub fn assert_subscribed(&self) {
    assert!(self.recorded.lock().subscribed, "on_subscribe was not called");
  }

  #[track_caller]
  pub fn assert_values(&self, expected: &[T])
  where
    T: Clone + PartialEq + fmt::Debug,
  {
    assert_eq!(self.values(), expected, "values differ");
  }

  #[track_caller]
  pub fn assert_complete(&self) {
    assert_eq!(self.completions(), 1, "expected exactly one completion");
  }

  #[track_caller]
  pub fn assert_not_complete(&self) {
    assert_eq!(self.completions(), 0, "expected no completion");
  }

  #[track_caller]
  pub fn assert_error_count(&self, count: usize) {
    assert_eq!(self.recorded.lock().errors.len(), count, "error count differs");
  }

  #[track_caller]
  pub fn assert_no_errors(&self) {
    let errors = self.errors();
    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
  }

  /// Subscribe first, at most one terminal signal, nothing after it.
  #[track_caller]
  pub fn assert_well_formed(&self) {
    assert_eq!(self.violations(), 0, "observer protocol violated");
  }

  /// Spins until at least `count` values arrived or `timeout` elapses.
  pub fn await_count(&self, count: usize, timeout: Duration) -> bool {
    self.await_condition(timeout, |r| r.nexts >= count)
  }

  /// Spins until a terminal signal arrived or `timeout` elapses.
  pub fn await_terminal(&self, timeout: Duration) -> bool {
    self.await_condition(timeout, |r| r.terminated)
  }

  fn await_condition(&self, timeout: Duration, done: impl Fn(&Recorded<T>) -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
      if done(&self.recorded.lock()) {
        return true;
      }
      if Instant::now() >= deadline {
        return false;
      }
      thread::sleep(Duration::from_millis(1));
    }
  }

  fn record(&self, event: Event<T>, error: Option<SharedError>) {
    let reached_limit = {
      let mut recorded = self.recorded.lock();
      let violation = match event {
        Event::Subscribe => recorded.subscribed,
        _ => !recorded.subscribed || recorded.terminated,
      };
      if violation {
        self.violations.fetch_add(1, Ordering::AcqRel);
      }
      match event {
        Event::Subscribe => recorded.subscribed = true,
        Event::Next(_) => recorded.nexts += 1,
        Event::Error(_) | Event::Complete => recorded.terminated = true,
      }
      if let Some(error) = error {
        recorded.errors.push(error);
      }
      let is_next = matches!(event, Event::Next(_));
      recorded.events.push(event);
      is_next && recorded.nexts == self.dispose_after.load(Ordering::Relaxed)
    };
    if reached_limit {
      self.dispose();
    }
  }

  fn is_async_fused(&self) -> bool {
    self.fusion_mode() == FusionMode::ASYNC
  }

  /// Pulls from a fused upstream until it runs dry.
  fn drain_fused(&self, sync: bool) {
    let upstream = self.upstream.lock().clone();
    let Some(upstream) = upstream else {
      return;
    };
    let Some(queue) = upstream.fused() else {
      return;
    };
    loop {
      match queue.try_poll() {
        Pull::Value(value) => self.record(Event::Next(value), None),
        Pull::Done => {
          if sync {
            self.record(Event::Complete, None);
          }
          return;
        }
        Pull::Empty => {
          if sync {
            // SYNC sources never report a gap mid-sequence.
            self.violations.fetch_add(1, Ordering::AcqRel);
          }
          return;
        }
      }
    }
  }
}

impl<T: Send + 'static> Observer<T> for TestObserver<T> {
  fn on_subscribe(&self, upstream: Upstream<T>) {
    self.record(Event::Subscribe, None);
    *self.upstream.lock() = Some(upstream.clone());

    if self.dispose_on_subscribe.load(Ordering::Relaxed) {
      upstream.dispose();
      return;
    }
    if self.requested.is_fused() {
      let granted = upstream.request_fusion(self.requested);
      self.granted.store(granted.bits(), Ordering::Release);
      if granted == FusionMode::SYNC {
        self.drain_fused(true);
      }
    }
  }

  fn on_next(&self, value: T) {
    self.record(Event::Next(value), None);
  }

  fn on_error(&self, error: SharedError) {
    if self.is_async_fused() {
      self.drain_fused(false);
    }
    self.record(Event::Error(error.to_string()), Some(error));
  }

  fn on_complete(&self) {
    if self.is_async_fused() {
      self.drain_fused(false);
    }
    self.record(Event::Complete, None);
  }

  fn on_ready(&self) {
    if self.is_async_fused() {
      self.drain_fused(false);
    }
  }
}

impl<T: 'static> fmt::Debug for TestObserver<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let recorded = self.recorded.lock();
    f.debug_struct("TestObserver")
      .field("events", &recorded.events.len())
      .field("errors", &recorded.errors.len())
      .field("terminated", &recorded.terminated)
      .field("fusion", &self.fusion_mode())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn debug_reports_recorded_signals() {
    let to = TestObserver::<i32>::new();
    to.on_next(1);
    to.on_complete();
    let rendered = format!("{:?}", to);
    assert!(rendered.starts_with("TestObserver"));
    assert!(rendered.contains("events: 2"));
    assert!(rendered.contains("terminated: true"));
  }
}
