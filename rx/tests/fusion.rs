mod common;
use common::*;

use fibre_rx::source;
use fibre_rx::testing::TestObserver;
use fibre_rx::{FusionMode, Observable, Observer, Pull, SharedError, UnicastSubject, Upstream};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;

#[test]
fn sync_fusion_yields_the_pushed_sequence() {
  let values: Vec<u32> = (0..ITEMS_LOW as u32).collect();
  let pushed = TestObserver::new();
  source::from_vec(values.clone()).subscribe(pushed.clone());
  let pulled = TestObserver::with_fusion(FusionMode::SYNC);
  source::from_vec(values.clone()).subscribe(pulled.clone());

  assert_eq!(pushed.fusion_mode(), FusionMode::NONE);
  assert_eq!(pulled.fusion_mode(), FusionMode::SYNC);
  assert_eq!(pushed.events(), pulled.events());
  pulled.assert_values(&values);
  pulled.assert_complete();
  pulled.assert_well_formed();
}

#[test]
fn sync_request_against_unicast_falls_back_to_push() {
  let subject = UnicastSubject::new();
  subject.on_next(1);
  let to = TestObserver::with_fusion(FusionMode::SYNC);
  subject.subscribe(to.clone());
  assert_eq!(to.fusion_mode(), FusionMode::NONE);
  subject.on_next(2);
  subject.on_complete();
  to.assert_values(&[1, 2]);
  to.assert_complete();
  to.assert_well_formed();
}

#[test]
fn async_fusion_with_unicast_across_threads() {
  init_tracing();
  for _ in 0..TRIALS_LOW {
    let subject = Arc::new(UnicastSubject::new());
    let to = TestObserver::with_fusion(FusionMode::ANY);
    subject.subscribe(to.clone());
    assert_eq!(to.fusion_mode(), FusionMode::ASYNC);

    let producer = {
      let subject = subject.clone();
      thread::spawn(move || {
        for i in 0..ITEMS_LOW {
          subject.on_next(i);
        }
        subject.on_complete();
      })
    };
    producer.join().unwrap();

    assert!(to.await_terminal(LONG_TIMEOUT));
    to.assert_values(&(0..ITEMS_LOW).collect::<Vec<_>>());
    to.assert_complete();
    to.assert_well_formed();
    assert_eq!(to.violations(), 0);
  }
}

#[test]
fn boundary_request_against_lazy_iterable_is_refused() {
  let to = TestObserver::with_fusion(FusionMode::ANY | FusionMode::BOUNDARY);
  source::from_iter(1..=3).subscribe(to.clone());
  assert_eq!(to.fusion_mode(), FusionMode::NONE);
  to.assert_values(&[1, 2, 3]);
  to.assert_complete();

  let same_thread = TestObserver::with_fusion(FusionMode::ANY);
  source::from_iter(1..=3).subscribe(same_thread.clone());
  assert_eq!(same_thread.fusion_mode(), FusionMode::SYNC);
  same_thread.assert_values(&[1, 2, 3]);
}

/// Polls its upstream without ever asking for fusion.
struct UnfusedPoller {
  pulls: Mutex<Vec<Pull<i32>>>,
}

impl Observer<i32> for UnfusedPoller {
  fn on_subscribe(&self, upstream: Upstream<i32>) {
    if let Some(queue) = upstream.fused() {
      self.pulls.lock().push(queue.try_poll());
    }
  }

  fn on_next(&self, _value: i32) {}

  fn on_error(&self, _error: SharedError) {}

  fn on_complete(&self) {}
}

#[test]
fn polling_without_fusion_yields_nothing() {
  let poller = Arc::new(UnfusedPoller {
    pulls: Mutex::new(Vec::new()),
  });
  source::from_vec(vec![1, 2]).subscribe(poller.clone());
  UnicastSubject::<i32>::new().subscribe(poller.clone());
  assert_eq!(*poller.pulls.lock(), vec![Pull::Empty, Pull::Empty]);
}
