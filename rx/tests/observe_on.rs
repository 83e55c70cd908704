mod common;
use common::*;

use fibre_rx::error::RxError;
use fibre_rx::testing::{TestObserver, TestScheduler};
use fibre_rx::{source, FusionMode, ObserveOn, Observable, Observer, PublishSubject, Subject, UnicastSubject};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn stage_over<O>(source: O, scheduler: &TestScheduler) -> ObserveOn<O> {
  ObserveOn::new(source, Arc::new(scheduler.clone()))
}

#[test]
fn lazy_iterable_is_buffered_instead_of_fused() {
  let scheduler = TestScheduler::new();
  // The iterable pushes synchronously into the stage's own queue.
  let stage = stage_over(source::from_iter(1..=5), &scheduler);
  let to = TestObserver::new();
  stage.subscribe(to.clone());
  to.assert_subscribed();
  to.assert_values(&[]);
  assert_eq!(scheduler.pending_count(), 1);

  scheduler.trigger_actions();
  to.assert_values(&[1, 2, 3, 4, 5]);
  to.assert_complete();
  to.assert_well_formed();
  assert_eq!(scheduler.executed_count(), 1);
}

#[test]
fn error_cuts_ahead_of_buffered_values() {
  let scheduler = TestScheduler::new();
  let subject = Arc::new(PublishSubject::new());
  let stage = stage_over(subject.clone(), &scheduler);
  let to = TestObserver::new();
  stage.subscribe(to.clone());

  subject.on_next(1);
  subject.on_next(2);
  subject.on_error(RxError::AlreadyTerminated.shared());
  scheduler.trigger_actions();

  to.assert_values(&[]);
  to.assert_error_count(1);
  to.assert_well_formed();
}

#[test]
fn delayed_error_waits_behind_buffered_values() {
  let scheduler = TestScheduler::new();
  let subject = Arc::new(PublishSubject::new());
  let stage = stage_over(subject.clone(), &scheduler).delay_error(true);
  let to = TestObserver::new();
  stage.subscribe(to.clone());

  subject.on_next(1);
  subject.on_next(2);
  subject.on_error(RxError::AlreadyTerminated.shared());
  scheduler.trigger_actions();

  to.assert_values(&[1, 2]);
  to.assert_error_count(1);
  to.assert_well_formed();
}

#[test]
fn one_drain_task_per_burst() {
  let scheduler = TestScheduler::new();
  let subject = Arc::new(PublishSubject::new());
  let stage = stage_over(subject.clone(), &scheduler);
  let to = TestObserver::new();
  stage.subscribe(to.clone());

  for i in 0..10 {
    subject.on_next(i);
  }
  assert_eq!(scheduler.pending_count(), 1);
  scheduler.trigger_actions();
  to.assert_values(&(0..10).collect::<Vec<_>>());

  subject.on_next(10);
  assert_eq!(scheduler.pending_count(), 1);
  subject.on_complete();
  assert_eq!(scheduler.pending_count(), 1);
  scheduler.trigger_actions();
  assert_eq!(scheduler.executed_count(), 2);
  to.assert_complete();
}

#[test]
fn dispose_stops_delivery_and_detaches_upstream() {
  let scheduler = TestScheduler::new();
  let subject = Arc::new(PublishSubject::new());
  let stage = stage_over(subject.clone(), &scheduler);
  let to = TestObserver::new();
  let handle = stage.subscribe(to.clone());
  assert!(subject.has_observers());

  subject.on_next(1);
  handle.dispose();
  assert!(handle.is_disposed());
  assert!(!subject.has_observers());
  assert_eq!(scheduler.pending_count(), 0);
  scheduler.trigger_actions();
  to.assert_values(&[]);
  to.assert_not_complete();
}

fn pump_until_terminal(scheduler: &TestScheduler, to: &TestObserver<usize>) {
  let deadline = Instant::now() + LONG_TIMEOUT;
  while !to.is_terminated() {
    assert!(Instant::now() < deadline, "stage never terminated");
    scheduler.trigger_actions();
    thread::yield_now();
  }
}

#[test]
fn producer_thread_and_scheduler_thread_preserve_order() {
  init_tracing();
  for _ in 0..TRIALS_LOW {
    let scheduler = TestScheduler::new();
    let subject = Arc::new(PublishSubject::new());
    let stage = stage_over(subject.clone(), &scheduler);
    let to = TestObserver::new();
    stage.subscribe(to.clone());

    let producer = {
      let subject = subject.clone();
      thread::spawn(move || {
        for i in 0..ITEMS_HIGH {
          subject.on_next(i);
        }
        subject.on_complete();
      })
    };
    pump_until_terminal(&scheduler, &to);
    producer.join().unwrap();

    to.assert_values(&(0..ITEMS_HIGH).collect::<Vec<_>>());
    to.assert_complete();
    to.assert_well_formed();
  }
}

#[test]
fn async_fused_upstream_across_threads() {
  for _ in 0..TRIALS_LOW {
    let scheduler = TestScheduler::new();
    let subject = Arc::new(UnicastSubject::with_capacity_hint(4));
    let stage = stage_over(subject.clone(), &scheduler);
    let to = TestObserver::new();
    stage.subscribe(to.clone());

    let producer = {
      let subject = subject.clone();
      thread::spawn(move || {
        for i in 0..ITEMS_LOW {
          subject.on_next(i);
        }
        subject.on_complete();
      })
    };
    pump_until_terminal(&scheduler, &to);
    producer.join().unwrap();

    to.assert_values(&(0..ITEMS_LOW).collect::<Vec<_>>());
    to.assert_complete();
    to.assert_well_formed();
  }
}

#[test]
fn stage_never_fuses_with_its_own_downstream() {
  let scheduler = TestScheduler::new();
  let stage = stage_over(source::from_vec(vec![1, 2]), &scheduler);
  let to = TestObserver::with_fusion(FusionMode::ANY);
  stage.subscribe(to.clone());
  assert_eq!(to.fusion_mode(), FusionMode::NONE);
  scheduler.trigger_actions();
  to.assert_values(&[1, 2]);
  to.assert_complete();
}
