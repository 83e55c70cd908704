// rx/src/subject/unicast.rs

use core::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::config::QueueConfig;
use crate::disposable::{self, Disposable, DisposeHandle};
use crate::error::{report_undeliverable, RxError, SharedError};
use crate::fusion::{FusedQueue, FusionMode, Pull};
use crate::internal::guard::Exclusive;
use crate::internal::wip::Wip;
use crate::observer::{Observable, Observer, ObserverRef, Upstream};
use crate::queue::SpscLinkedQueue;
use crate::subject::{Subject, Terminal};
use crate::telemetry;

const LOCATION: &str = "unicast_subject";

struct Shared<T> {
  queue: SpscLinkedQueue<T>,
  /// Serializes `offer`.
  producer: Exclusive,
  /// Serializes `poll` between the drain loop and a fused consumer.
  consumer: Exclusive,
  attached: ArcSwapOption<Attachment<T>>,
  wip: Wip,
  terminal: ArcSwapOption<Terminal>,
  /// Set once the terminal signal went out. The admission is then kept for
  /// good: the queue still belongs to the observer that received it.
  finished: AtomicBool,
}

/// The current observer's admission. Doubles as its detach handle and, when
/// ASYNC fusion is granted, as the queue it pulls from.
struct Attachment<T> {
  observer: ObserverRef<T>,
  fused: AtomicBool,
  /// Set once `on_subscribe` has returned; nothing is delivered before that.
  ready: AtomicBool,
  detached: AtomicBool,
  shared: Arc<Shared<T>>,
}

impl<T> Attachment<T> {
  #[inline]
  fn is_detached(&self) -> bool {
    self.detached.load(Ordering::Acquire)
  }

  /// Gives up the admission so a new observer can attach.
  fn release(&self) {
    let current = self.shared.attached.load();
    if current
      .as_ref()
      .is_some_and(|a| ptr::eq(Arc::as_ptr(a), self))
    {
      self.shared.attached.compare_and_swap(&current, None::<Arc<Attachment<T>>>);
    }
  }
}

impl<T: Send + 'static> Disposable for Attachment<T> {
  fn dispose(&self) {
    if !self.detached.swap(true, Ordering::AcqRel) {
      self.release();
      tracing::trace!(target: "fibre_rx", "unicast observer detached");
      // A subscriber may have been waiting on the admission.
      self.shared.drain();
    }
  }

  fn is_disposed(&self) -> bool {
    self.is_detached()
  }
}

impl<T: Send + 'static> FusedQueue<T> for Attachment<T> {
  fn request_fusion(&self, mode: FusionMode) -> FusionMode {
    let granted = FusionMode::negotiate(mode, FusionMode::ASYNC, false);
    if granted == FusionMode::ASYNC {
      self.fused.store(true, Ordering::Release);
      tracing::trace!(target: "fibre_rx", "unicast subject granted ASYNC fusion");
    }
    granted
  }

  fn try_poll(&self) -> Pull<T> {
    if !self.fused.load(Ordering::Acquire) {
      tracing::warn!(target: "fibre_rx", error = %RxError::QueueFusionViolation, "poll without fusion");
      return Pull::Empty;
    }
    let Some(_claim) = self.shared.consumer.try_claim() else {
      return Pull::Empty;
    };
    match self.shared.queue.poll() {
      Some(value) => Pull::Value(value),
      None => Pull::Empty,
    }
  }

  fn is_empty(&self) -> bool {
    match self.shared.consumer.try_claim() {
      Some(_claim) => self.shared.queue.is_empty(),
      None => false,
    }
  }

  fn clear(&self) {
    if let Some(_claim) = self.shared.consumer.try_claim() {
      self.shared.queue.clear();
    }
  }
}

impl<T: Send + 'static> Shared<T> {
  fn drain(&self) {
    if !self.wip.enter() {
      return;
    }
    let mut missed = 1;
    loop {
      if let Some(attachment) = self.attached.load_full() {
        if attachment.ready.load(Ordering::Acquire) && !attachment.is_detached() {
          if attachment.fused.load(Ordering::Acquire) {
            self.drain_fused(&attachment);
          } else if !self.drain_normal(&attachment) {
            // A stale consumer holds the queue for one poll; come back
            // rather than leave the values parked until the next signal.
            std::hint::spin_loop();
            continue;
          }
        }
      }

      missed = self.wip.leave(missed);
      if missed == 0 {
        return;
      }
    }
  }

  /// `false` if the consumer side could not be claimed.
  fn drain_normal(&self, attachment: &Attachment<T>) -> bool {
    let Some(_claim) = self.consumer.try_claim() else {
      return false;
    };
    loop {
      if attachment.is_detached() {
        return true;
      }
      // Read before polling: every value offered before the terminal signal
      // is then visible to the poll.
      let terminal = self.terminal.load_full();
      match self.queue.poll() {
        Some(value) => attachment.observer.on_next(value),
        None => {
          if let Some(terminal) = terminal {
            self.finish(attachment, &terminal);
          }
          return true;
        }
      }
    }
  }

  fn drain_fused(&self, attachment: &Attachment<T>) {
    attachment.observer.on_ready();
    // The fused consumer drains its queue before acting on the terminal.
    if let Some(terminal) = self.terminal.load_full() {
      self.finish(attachment, &terminal);
    }
  }

  /// Delivers the terminal signal. The admission is not released: an ASYNC
  /// consumer may still be pulling the values queued ahead of it.
  fn finish(&self, attachment: &Attachment<T>, terminal: &Terminal) {
    if !attachment.detached.swap(true, Ordering::AcqRel) {
      self.finished.store(true, Ordering::Release);
      terminal.deliver(&*attachment.observer);
    }
  }

  /// Hands a subscriber arriving after termination the stored terminal
  /// signal, without admitting it.
  fn deliver_terminal_only(&self, observer: &ObserverRef<T>) -> bool {
    if !self.finished.load(Ordering::Acquire) {
      return false;
    }
    let Some(terminal) = self.terminal.load_full() else {
      return false;
    };
    observer.on_subscribe(Upstream::Plain(disposable::disposed()));
    terminal.deliver(&**observer);
    true
  }
}

/// A subject for exactly one observer at a time that buffers every value
/// until it can be delivered.
///
/// Values emitted before anyone subscribes are queued and flushed to the
/// first observer to attach. A second concurrent observer is rejected with
/// [`RxError::AlreadyHasObserver`]; once the current one detaches a new
/// observer is admitted and receives whatever was not delivered yet. The
/// attached observer may request ASYNC fusion and pull from the queue
/// itself. Once the terminal signal has gone out nobody else is admitted: a
/// late subscriber receives only that terminal signal.
///
/// All delivery runs in a single drain loop, so flushing a backlog and
/// delivering values that arrive during the flush never interleave out of
/// order.
pub struct UnicastSubject<T> {
  shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Default for UnicastSubject<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Send + 'static> UnicastSubject<T> {
  pub fn new() -> Self {
    Self::with_config(QueueConfig::default())
  }

  /// A subject whose first queue island holds at least `hint` values.
  pub fn with_capacity_hint(hint: usize) -> Self {
    Self::with_config(QueueConfig::with_capacity_hint(hint))
  }

  pub fn with_config(config: QueueConfig) -> Self {
    UnicastSubject {
      shared: Arc::new(Shared {
        queue: SpscLinkedQueue::new(config),
        producer: Exclusive::new(),
        consumer: Exclusive::new(),
        attached: ArcSwapOption::empty(),
        wip: Wip::new(),
        terminal: ArcSwapOption::empty(),
        finished: AtomicBool::new(false),
      }),
    }
  }

  pub fn has_complete(&self) -> bool {
    matches!(self.shared.terminal.load().as_deref(), Some(Terminal::Completed))
  }

  fn terminate(&self, terminal: Terminal) -> bool {
    let previous = self
      .shared
      .terminal
      .compare_and_swap(&None::<Arc<Terminal>>, Some(Arc::new(terminal)));
    if previous.is_some() {
      return false;
    }
    tracing::trace!(target: "fibre_rx", "unicast subject terminated");
    self.shared.drain();
    true
  }
}

impl<T: Send + 'static> Observer<T> for UnicastSubject<T> {
  fn on_subscribe(&self, upstream: Upstream<T>) {
    if self.shared.terminal.load().is_some() {
      upstream.dispose();
    }
  }

  fn on_next(&self, value: T) {
    if self.shared.terminal.load().is_some() {
      return;
    }
    {
      let Some(_claim) = self.shared.producer.try_claim() else {
        tracing::warn!(target: "fibre_rx", "concurrent on_next on a unicast subject; value dropped");
        telemetry::increment_counter(LOCATION, "concurrent_next");
        return;
      };
      self.shared.queue.offer(value);
    }
    self.shared.drain();
  }

  fn on_error(&self, error: SharedError) {
    if !self.terminate(Terminal::Errored(error.clone())) {
      report_undeliverable(&error, LOCATION);
    }
  }

  fn on_complete(&self) {
    self.terminate(Terminal::Completed);
  }
}

impl<T: Send + 'static> Observable<T> for UnicastSubject<T> {
  fn subscribe(&self, observer: ObserverRef<T>) -> DisposeHandle {
    if self.shared.deliver_terminal_only(&observer) {
      return disposable::disposed();
    }
    let attachment = Arc::new(Attachment {
      observer: observer.clone(),
      fused: AtomicBool::new(false),
      ready: AtomicBool::new(false),
      detached: AtomicBool::new(false),
      shared: self.shared.clone(),
    });

    loop {
      let previous = self
        .shared
        .attached
        .compare_and_swap(&None::<Arc<Attachment<T>>>, Some(attachment.clone()));
      let Some(current) = &*previous else {
        break;
      };
      // Lost to an observer that has since received the terminal signal.
      if self.shared.deliver_terminal_only(&observer) {
        return disposable::disposed();
      }
      // A detached holder is about to either release the admission or mark
      // the subject finished.
      if current.is_detached() {
        std::hint::spin_loop();
        continue;
      }
      tracing::warn!(target: "fibre_rx", "unicast subject rejected a second observer");
      telemetry::increment_counter(LOCATION, "observer_rejected");
      observer.on_subscribe(Upstream::Plain(disposable::disposed()));
      observer.on_error(RxError::AlreadyHasObserver.shared());
      return disposable::disposed();
    }

    observer.on_subscribe(Upstream::Fuseable(attachment.clone()));
    attachment.ready.store(true, Ordering::Release);
    self.shared.drain();
    attachment
  }
}

impl<T: Send + 'static> Subject<T> for UnicastSubject<T> {
  fn observer_count(&self) -> usize {
    let attached = self.shared.attached.load();
    usize::from(attached.as_ref().is_some_and(|a| !a.is_detached()))
  }

  fn is_terminated(&self) -> bool {
    self.shared.terminal.load().is_some()
  }

  fn error(&self) -> Option<SharedError> {
    self.shared.terminal.load().as_deref().and_then(Terminal::error)
  }
}

impl<T> Drop for UnicastSubject<T> {
  fn drop(&mut self) {
    // The attachment points back at the shared state.
    self.shared.attached.store(None);
  }
}

impl<T> fmt::Debug for UnicastSubject<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("UnicastSubject")
      .field("attached", &self.shared.attached.load().is_some())
      .field("terminated", &self.shared.terminal.load().is_some())
      .field("wip", &self.shared.wip)
      .finish_non_exhaustive()
  }
}
