// rx/src/config.rs

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default capacity of the first island of a linked queue.
pub const DEFAULT_INITIAL_ISLAND_CAPACITY: usize = 16;
/// Islands stop doubling once they reach this capacity.
pub const DEFAULT_MAX_ISLAND_CAPACITY: usize = 1024;

/// Sizing of the array segments ("islands") backing an unbounded linked queue
/// or replay log.
///
/// Each island after the first is twice the size of its predecessor until
/// `max_island_capacity` is reached; from then on every island has that size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct QueueConfig {
  pub initial_island_capacity: usize,
  pub max_island_capacity: usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    QueueConfig {
      initial_island_capacity: DEFAULT_INITIAL_ISLAND_CAPACITY,
      max_island_capacity: DEFAULT_MAX_ISLAND_CAPACITY,
    }
  }
}

impl QueueConfig {
  /// Creates a config, rounding both capacities up to powers of two.
  ///
  /// # Panics
  ///
  /// Panics if either capacity is zero.
  pub fn new(initial_island_capacity: usize, max_island_capacity: usize) -> Self {
    assert!(initial_island_capacity > 0, "island capacity must be greater than 0");
    assert!(max_island_capacity > 0, "max island capacity must be greater than 0");
    let initial = initial_island_capacity.next_power_of_two();
    let max = max_island_capacity.next_power_of_two().max(initial);
    QueueConfig {
      initial_island_capacity: initial,
      max_island_capacity: max,
    }
  }

  /// A config whose first island holds at least `hint` items.
  pub fn with_capacity_hint(hint: usize) -> Self {
    let defaults = QueueConfig::default();
    QueueConfig::new(hint.max(1), defaults.max_island_capacity)
  }

  /// Capacity of the island following one of `current` capacity.
  #[inline]
  pub(crate) fn next_capacity(&self, current: usize) -> usize {
    current.saturating_mul(2).min(self.max_island_capacity)
  }

  /// The config with its invariants restored, for values built by struct
  /// literal or deserialization.
  pub(crate) fn normalized(self) -> Self {
    QueueConfig::new(
      self.initial_island_capacity.max(1),
      self.max_island_capacity.max(1),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_rounds_to_powers_of_two() {
    let cfg = QueueConfig::new(5, 100);
    assert_eq!(cfg.initial_island_capacity, 8);
    assert_eq!(cfg.max_island_capacity, 128);
  }

  #[test]
  fn max_never_below_initial() {
    let cfg = QueueConfig::new(64, 4);
    assert_eq!(cfg.max_island_capacity, 64);
  }

  #[test]
  fn islands_double_up_to_max() {
    let cfg = QueueConfig::new(4, 16);
    assert_eq!(cfg.next_capacity(4), 8);
    assert_eq!(cfg.next_capacity(8), 16);
    assert_eq!(cfg.next_capacity(16), 16);
  }

  #[test]
  #[should_panic(expected = "island capacity must be greater than 0")]
  fn zero_capacity_panics() {
    let _ = QueueConfig::new(0, 8);
  }

  #[test]
  fn normalized_repairs_literal_values() {
    let cfg = QueueConfig {
      initial_island_capacity: 0,
      max_island_capacity: 3,
    }
    .normalized();
    assert_eq!(cfg.initial_island_capacity, 1);
    assert_eq!(cfg.max_island_capacity, 4);
  }
}
