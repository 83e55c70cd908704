use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fibre_rx::{HalfSerializer, Observer, SharedError, Upstream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

const ITEMS_PER_PRODUCER: usize = 20_000;

/// Sums what it receives; the cheapest observer that still touches each value.
#[derive(Default)]
struct Summing {
  sum: AtomicU64,
}

impl Observer<u64> for Summing {
  fn on_subscribe(&self, _upstream: Upstream<u64>) {}

  fn on_next(&self, value: u64) {
    self.sum.fetch_add(value, Ordering::Relaxed);
  }

  fn on_error(&self, _error: SharedError) {}

  fn on_complete(&self) {}
}

fn uncontended(c: &mut Criterion) {
  let mut group = c.benchmark_group("HalfSerializer/Uncontended");
  group.throughput(Throughput::Elements(ITEMS_PER_PRODUCER as u64));
  group.bench_function("on_next", |b| {
    b.iter(|| {
      let hs = HalfSerializer::new();
      let observer = Summing::default();
      for i in 0..ITEMS_PER_PRODUCER as u64 {
        hs.on_next(&observer, i);
      }
      hs.on_complete(&observer);
      black_box(observer.sum.load(Ordering::Relaxed))
    })
  });
  group.finish();
}

fn contended(c: &mut Criterion) {
  let mut group = c.benchmark_group("HalfSerializer/Contended");

  for producers in [2usize, 4, 8] {
    group.throughput(Throughput::Elements((producers * ITEMS_PER_PRODUCER) as u64));
    group.bench_with_input(BenchmarkId::from_parameter(producers), &producers, |b, &producers| {
      b.iter_custom(|iters| {
        let mut total = Duration::ZERO;
        for _ in 0..iters {
          let hs = Arc::new(HalfSerializer::new());
          let observer = Arc::new(Summing::default());
          let barrier = Arc::new(Barrier::new(producers + 1));
          let handles: Vec<_> = (0..producers)
            .map(|_| {
              let hs = hs.clone();
              let observer = observer.clone();
              let barrier = barrier.clone();
              thread::spawn(move || {
                barrier.wait();
                for i in 0..ITEMS_PER_PRODUCER as u64 {
                  hs.on_next(&*observer, i);
                }
              })
            })
            .collect();

          let start = Instant::now();
          barrier.wait();
          for h in handles {
            h.join().expect("producer panicked");
          }
          hs.on_complete(&*observer);
          total += start.elapsed();
          black_box(observer.sum.load(Ordering::Relaxed));
        }
        total
      })
    });
  }
  group.finish();
}

criterion_group!(benches, uncontended, contended);
criterion_main!(benches);
