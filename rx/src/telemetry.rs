// rx/src/telemetry.rs

//! In-process event and counter collection for diagnosing signal races.
//!
//! Every entry point compiles to nothing unless the `rx_telemetry` feature is
//! enabled. Locations and names are `&'static str` so recording never
//! allocates a key.

#[cfg(feature = "rx_telemetry")]
mod collector {
  use std::collections::BTreeMap;
  use std::fmt;
  use std::thread::{self, ThreadId};
  use std::time::{Duration, Instant};

  use parking_lot::Mutex;

  struct Mark {
    at: Duration,
    thread: ThreadId,
    location: &'static str,
    event: &'static str,
  }

  impl fmt::Debug for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(
        f,
        "+{:.6}s {:?} {}::{}",
        self.at.as_secs_f64(),
        self.thread,
        self.location,
        self.event
      )
    }
  }

  struct Collector {
    since: Instant,
    marks: Vec<Mark>,
    // Ordered so the report lists counters grouped by location.
    counters: BTreeMap<(&'static str, &'static str), usize>,
  }

  impl Collector {
    fn new() -> Self {
      Collector {
        since: Instant::now(),
        marks: Vec::new(),
        counters: BTreeMap::new(),
      }
    }
  }

  lazy_static::lazy_static! {
    static ref COLLECTOR: Mutex<Collector> = Mutex::new(Collector::new());
  }

  pub fn log_event(location: &'static str, event: &'static str) {
    let thread = thread::current().id();
    let mut c = COLLECTOR.lock();
    let at = c.since.elapsed();
    c.marks.push(Mark {
      at,
      thread,
      location,
      event,
    });
  }

  pub fn increment_counter(location: &'static str, name: &'static str) {
    *COLLECTOR.lock().counters.entry((location, name)).or_insert(0) += 1;
  }

  /// Zero if the counter was never incremented.
  pub fn counter_value(location: &'static str, name: &'static str) -> usize {
    COLLECTOR
      .lock()
      .counters
      .get(&(location, name))
      .copied()
      .unwrap_or(0)
  }

  pub fn event_count(location: &'static str, event: &'static str) -> usize {
    COLLECTOR
      .lock()
      .marks
      .iter()
      .filter(|m| m.location == location && m.event == event)
      .count()
  }

  pub fn print_telemetry_report() {
    let c = COLLECTOR.lock();
    println!("fibre_rx telemetry: {} events, {} counters", c.marks.len(), c.counters.len());
    // Marks are pushed under the lock, so insertion order is global order.
    for mark in &c.marks {
      println!("  {mark:?}");
    }
    for ((location, name), value) in &c.counters {
      println!("  {location}.{name} = {value}");
    }
  }

  pub fn clear_telemetry() {
    *COLLECTOR.lock() = Collector::new();
  }
}

#[cfg(not(feature = "rx_telemetry"))]
mod collector {
  #[inline(always)]
  pub fn log_event(_location: &'static str, _event: &'static str) {}

  #[inline(always)]
  pub fn increment_counter(_location: &'static str, _name: &'static str) {}

  #[inline(always)]
  pub fn counter_value(_location: &'static str, _name: &'static str) -> usize {
    0
  }

  #[inline(always)]
  pub fn event_count(_location: &'static str, _event: &'static str) -> usize {
    0
  }

  #[inline(always)]
  pub fn print_telemetry_report() {}

  #[inline(always)]
  pub fn clear_telemetry() {}
}

pub use collector::{
  clear_telemetry, counter_value, event_count, increment_counter, log_event,
  print_telemetry_report,
};
