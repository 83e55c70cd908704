#![allow(dead_code)]

use std::time::Duration;

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(500);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);
pub const TRIALS_LOW: usize = 50;
pub const TRIALS_HIGH: usize = 500;
pub const ITEMS_LOW: usize = 100;
pub const ITEMS_HIGH: usize = 1000;
pub const THREADS: usize = 4;

/// Installs a test-writer tracing subscriber once per test binary, so
/// `RUST_LOG=fibre_rx=trace cargo test` shows the library's logs.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}
