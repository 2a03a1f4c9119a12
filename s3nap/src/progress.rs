//! Throughput bookkeeping for the transfer pipelines.

use std::time::{Duration, Instant};

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy)]
pub struct Throughput {
    started: Instant,
}

impl Throughput {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `(megabytes, megabytes per second)` for `bytes` moved since start.
    pub fn measure(&self, bytes: u64) -> (f64, f64) {
        rate(bytes, self.elapsed())
    }
}

pub fn rate(bytes: u64, elapsed: Duration) -> (f64, f64) {
    let mb = bytes as f64 / MIB;
    let secs = elapsed.as_secs_f64();
    let per_sec = if secs > 0.0 { mb / secs } else { 0.0 };
    (mb, per_sec)
}
