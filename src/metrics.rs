//! Engine-agnostic metrics collection for pool timings.
//!
//! Feature-gated and runtime-toggled to ensure zero overhead when disabled.
//!
//! # Usage
//!
//! ```ignore
//! use bvh_pool::metrics::COLLECT_METRICS;
//!
//! // Compile with --features metrics
//! // Runtime toggle:
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! // Snapshot from a running pool:
//! let metrics = pool.metrics();
//! println!("avg build: {:.0}us", metrics.avg_build_us());
//! ```

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;

/// Runtime toggle for metrics collection.
/// Set to false to disable metrics gathering at runtime.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// Check if metrics collection is enabled (both compile-time and runtime).
#[inline]
pub fn is_enabled() -> bool {
  #[cfg(feature = "metrics")]
  {
    COLLECT_METRICS.load(Ordering::Relaxed)
  }
  #[cfg(not(feature = "metrics"))]
  {
    false
  }
}

/// Rolling window for storing recent values (e.g., timing history).
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
  buffer: VecDeque<T>,
  capacity: usize,
}

impl<T> RollingWindow<T> {
  /// Create a new rolling window with the given capacity.
  pub fn new(capacity: usize) -> Self {
    Self {
      buffer: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  /// Push a new value, evicting the oldest if at capacity.
  pub fn push(&mut self, value: T) {
    if self.buffer.len() >= self.capacity {
      self.buffer.pop_front();
    }
    self.buffer.push_back(value);
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  pub fn clear(&mut self) {
    self.buffer.clear();
  }

  /// Iterate over values (oldest to newest).
  pub fn iter(&self) -> impl Iterator<Item = &T> {
    self.buffer.iter()
  }

  /// Get the most recent value.
  pub fn last(&self) -> Option<&T> {
    self.buffer.back()
  }
}

impl<T: Copy + Default + std::ops::Add<Output = T>> RollingWindow<T> {
  /// Compute the sum of all values.
  pub fn sum(&self) -> T {
    self
      .buffer
      .iter()
      .copied()
      .fold(T::default(), |acc, x| acc + x)
  }
}

impl RollingWindow<u64> {
  /// Compute the average of all values.
  pub fn average(&self) -> f64 {
    if self.buffer.is_empty() {
      0.0
    } else {
      self.sum() as f64 / self.buffer.len() as f64
    }
  }

  /// Get min and max values.
  pub fn min_max(&self) -> Option<(u64, u64)> {
    let min = self.buffer.iter().min()?;
    let max = self.buffer.iter().max()?;
    Some((*min, *max))
  }
}

impl Default for RollingWindow<u64> {
  fn default() -> Self {
    Self::new(128)
  }
}

/// Pool-level timing statistics, recorded at settlement by the dispatch
/// thread and snapshotted through
/// [`BvhPool::metrics`](crate::pool::BvhPool::metrics).
#[derive(Debug, Clone)]
pub struct PoolMetrics {
  /// Rolling window of time spent queued, in microseconds.
  pub queue_timings: RollingWindow<u64>,
  /// Rolling window of time spent inside the builder, in microseconds.
  pub build_timings: RollingWindow<u64>,
  /// Last recorded queue time in microseconds.
  pub last_queue_us: u64,
  /// Last recorded build time in microseconds.
  pub last_build_us: u64,
  /// Successful builds this session.
  pub total_builds: u64,
  /// Failed builds this session.
  pub total_failures: u64,
}

impl Default for PoolMetrics {
  fn default() -> Self {
    Self {
      queue_timings: RollingWindow::new(128),
      build_timings: RollingWindow::new(128),
      last_queue_us: 0,
      last_build_us: 0,
      total_builds: 0,
      total_failures: 0,
    }
  }
}

impl PoolMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reset the windows; cumulative totals are preserved.
  pub fn reset(&mut self) {
    self.queue_timings.clear();
    self.build_timings.clear();
    self.last_queue_us = 0;
    self.last_build_us = 0;
  }

  /// Record a successful build's timings.
  pub fn record_build(&mut self, queue_us: u64, build_us: u64) {
    if is_enabled() {
      self.queue_timings.push(queue_us);
      self.build_timings.push(build_us);
      self.last_queue_us = queue_us;
      self.last_build_us = build_us;
      self.total_builds += 1;
    }
  }

  /// Record a failed build.
  pub fn record_failure(&mut self) {
    if is_enabled() {
      self.total_failures += 1;
    }
  }

  /// Get average build timing in microseconds.
  pub fn avg_build_us(&self) -> f64 {
    self.build_timings.average()
  }

  /// Get average queue timing in microseconds.
  pub fn avg_queue_us(&self) -> f64 {
    self.queue_timings.average()
  }
}
