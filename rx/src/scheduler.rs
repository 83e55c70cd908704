// rx/src/scheduler.rs

//! The narrow scheduling contract asynchronous stages consume.

use std::time::Duration;

use crate::disposable::DisposeHandle;

/// A unit of work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks, now or later, on whatever executor it fronts.
///
/// Disposing the returned handle before the task starts prevents it from
/// running.
pub trait Scheduler: Send + Sync {
  /// The scheduler's notion of the current time.
  fn now(&self) -> Duration;

  fn schedule(&self, task: Task) -> DisposeHandle {
    self.schedule_after(task, Duration::ZERO)
  }

  fn schedule_after(&self, task: Task, delay: Duration) -> DisposeHandle;
}
