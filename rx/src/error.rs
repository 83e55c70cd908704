// rx/src/error.rs

use core::fmt;
use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// A data error flowing through `on_error`.
///
/// Shared so that a single failure can be fanned out to many observers and
/// replayed to late subscribers without cloning the cause itself.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Usage errors: a caller broke a protocol rule.
///
/// These are distinct from data errors (upstream failures travelling through
/// `on_error`) and from benign races, which resolve silently.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RxError {
  /// `set_once` was called on a resource slot that already held a resource.
  #[error("disposable already set")]
  DisposableAlreadySet,
  /// A single-subscriber subject already has an observer attached.
  #[error("subject already has an observer")]
  AlreadyHasObserver,
  /// A terminal-only subject received a second value or terminal signal.
  #[error("subject already terminated")]
  AlreadyTerminated,
  /// A fused consumer pulled from a source that never granted fusion.
  #[error("queue fusion was not negotiated")]
  QueueFusionViolation,
}

impl RxError {
  /// Wraps the usage error so it can travel through `on_error`.
  pub fn shared(self) -> SharedError {
    Arc::new(self)
  }
}

/// Wraps an arbitrary error value as a [`SharedError`].
pub fn shared<E>(error: E) -> SharedError
where
  E: StdError + Send + Sync + 'static,
{
  Arc::new(error)
}

/// Two or more independently raised causes, kept in arrival order.
#[derive(Clone)]
pub struct CompositeError {
  causes: Vec<SharedError>,
}

impl CompositeError {
  pub(crate) fn new(causes: Vec<SharedError>) -> Self {
    debug_assert!(causes.len() > 1, "a composite needs at least two causes");
    CompositeError { causes }
  }

  /// The causes, first arrival first.
  pub fn causes(&self) -> &[SharedError] {
    &self.causes
  }

  pub fn len(&self) -> usize {
    self.causes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.causes.is_empty()
  }
}

impl fmt::Debug for CompositeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompositeError")
      .field("count", &self.causes.len())
      .field("causes", &self.causes)
      .finish()
  }
}

impl fmt::Display for CompositeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} errors occurred", self.causes.len())?;
    for (i, cause) in self.causes.iter().enumerate() {
      write!(f, "\n  [{}] {}", i, cause)?;
    }
    Ok(())
  }
}

impl StdError for CompositeError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.causes.first().map(|c| &**c as &(dyn StdError + 'static))
  }
}

/// Reports an error that has nowhere left to go.
///
/// The consumer already received its terminal signal, so the cause is logged
/// instead of being dropped on the floor.
pub(crate) fn report_undeliverable(error: &SharedError, location: &'static str) {
  tracing::warn!(target: "fibre_rx", %location, error = %error, "undeliverable error");
  crate::telemetry::increment_counter(location, "undeliverable_error");
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn composite_display_lists_causes_in_order() {
    let c = CompositeError::new(vec![
      RxError::AlreadyTerminated.shared(),
      RxError::AlreadyHasObserver.shared(),
    ]);
    let text = c.to_string();
    assert!(text.starts_with("2 errors occurred"));
    let first = text.find("subject already terminated").unwrap();
    let second = text.find("subject already has an observer").unwrap();
    assert!(first < second);
    assert_eq!(c.len(), 2);
  }

  #[test]
  fn composite_source_is_first_cause() {
    let c = CompositeError::new(vec![
      RxError::DisposableAlreadySet.shared(),
      RxError::AlreadyTerminated.shared(),
    ]);
    let src = c.source().unwrap();
    assert_eq!(src.to_string(), "disposable already set");
  }
}
