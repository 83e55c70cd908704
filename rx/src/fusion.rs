// rx/src/fusion.rs

//! Fusion: a handshake that lets a consumer pull values straight out of its
//! source's buffer instead of receiving them through `on_next`.
//!
//! The consumer asks once, from inside `on_subscribe`, via
//! [`Upstream::request_fusion`](crate::Upstream::request_fusion). The answer
//! is final for the lifetime of the subscription:
//!
//! * `SYNC`: every value is already materialized. The source stops pushing;
//!   the consumer pulls until [`Pull::Done`]. `Empty` never occurs mid-sequence.
//! * `ASYNC`: values arrive over time into the source's queue. The source calls
//!   `on_ready` whenever there may be something to pull and still pushes the
//!   terminal signal; `Empty` means "try again later".
//! * `NONE`: fusion rejected, ordinary push delivery continues.
//!
//! Adding `BOUNDARY` to a request tells the source that polling will happen on
//! a different thread than the one producing; sources whose `try_poll` runs
//! caller-supplied code refuse fusion across such a boundary.

use bitflags::bitflags;

use crate::disposable::Disposable;

bitflags! {
  /// Requested or granted fusion mode.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
  pub struct FusionMode: u8 {
    const SYNC = 0b0001;
    const ASYNC = 0b0010;
    const ANY = Self::SYNC.bits() | Self::ASYNC.bits();
    const BOUNDARY = 0b0100;
  }
}

impl FusionMode {
  /// No fusion.
  pub const NONE: FusionMode = FusionMode::empty();

  /// Whether this is a granted `SYNC` or `ASYNC` mode.
  #[inline]
  pub fn is_fused(self) -> bool {
    self.intersects(FusionMode::ANY)
  }

  /// The mode a source should grant, given what it can offer and whether its
  /// `try_poll` runs caller code (and thus must stay on the producing thread).
  pub fn negotiate(requested: FusionMode, offered: FusionMode, thread_bound: bool) -> FusionMode {
    if thread_bound && requested.contains(FusionMode::BOUNDARY) {
      return FusionMode::NONE;
    }
    if offered.contains(FusionMode::SYNC) && requested.contains(FusionMode::SYNC) {
      return FusionMode::SYNC;
    }
    if offered.contains(FusionMode::ASYNC) && requested.contains(FusionMode::ASYNC) {
      return FusionMode::ASYNC;
    }
    FusionMode::NONE
  }
}

/// Outcome of a single pull from a fused source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<T> {
  Value(T),
  /// Nothing available right now (ASYNC mode only).
  Empty,
  /// The sequence is exhausted (SYNC mode).
  Done,
}

impl<T> Pull<T> {
  pub fn into_value(self) -> Option<T> {
    match self {
      Pull::Value(v) => Some(v),
      _ => None,
    }
  }
}

/// A subscription that can also be drained by pulling.
///
/// `try_poll`, `is_empty` and `clear` may only be called by the single
/// consumer that was granted fusion.
pub trait FusedQueue<T>: Disposable {
  fn request_fusion(&self, mode: FusionMode) -> FusionMode;
  fn try_poll(&self) -> Pull<T>;
  fn is_empty(&self) -> bool;
  fn clear(&self);
}
