mod common;
use common::*;

use fibre_rx::error::{self, CompositeError};
use fibre_rx::ErrorAggregator;
use std::fmt;
use std::sync::{Arc, Barrier};
use std::thread;

#[derive(Debug)]
struct Named(&'static str);

impl fmt::Display for Named {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.0)
  }
}

impl std::error::Error for Named {}

#[test]
fn two_racing_adds_are_both_kept() {
  for _ in 0..TRIALS_HIGH {
    let agg = Arc::new(ErrorAggregator::new());
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["first", "second"]
      .into_iter()
      .map(|name| {
        let agg = agg.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
          barrier.wait();
          assert!(agg.add(error::shared(Named(name))));
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }

    let merged = agg.terminate().unwrap();
    let composite = merged.downcast_ref::<CompositeError>().unwrap();
    let mut names: Vec<String> = composite.causes().iter().map(|c| c.to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["first", "second"]);
  }
}

#[test]
fn adds_racing_terminate_are_kept_or_refused_never_lost() {
  for _ in 0..TRIALS_LOW {
    let agg = Arc::new(ErrorAggregator::new());
    let barrier = Arc::new(Barrier::new(THREADS + 1));
    let handles: Vec<_> = (0..THREADS)
      .map(|_| {
        let agg = agg.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
          barrier.wait();
          (0..ITEMS_LOW)
            .filter(|_| agg.add(error::shared(Named("x"))))
            .count()
        })
      })
      .collect();
    barrier.wait();
    let taken = agg.terminate();
    let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let collected = match taken {
      None => 0,
      Some(e) => e.downcast_ref::<CompositeError>().map_or(1, |c| c.len()),
    };
    assert_eq!(collected, accepted);
    assert!(agg.is_terminated());
  }
}
