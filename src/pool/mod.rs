//! Worker pool for background hierarchy construction.
//!
//! ```text
//!   caller                 dispatch thread                workers
//!
//!   queue(geometry) ────▶  pending FIFO ──▶ DispatchRequest ──▶ build
//!                                                               serialize
//!   Task::wait()   ◀────  settle + rebind ◀─ DispatchResponse ◀─┘
//!
//!   settled() / completed() / terminate(force)  ──▶  Signal
//! ```
//!
//! Geometry buffers are owned by exactly one side at any instant: `queue`
//! moves them in, settlement moves them back out. Nothing in between copies
//! or locks them.
//!
//! Scheduling is strict FIFO onto a fixed set of workers; completion order
//! tracks build duration, not submission order, so callers observe
//! completion through each [`Task`] handle.

mod dispatch;
mod task;
mod worker;

pub use task::{BuiltBvh, Signal, Task, TaskFailure, TaskResult, TaskStatus};

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, SendError, Sender};

use crate::builder::{BvhBuilder, MedianSplitBuilder};
use crate::error::{PoolError, QueueError};
#[cfg(feature = "metrics")]
use crate::metrics::PoolMetrics;
use crate::types::{BuildOptions, GeometryBuffers, TaskId};

use dispatch::{Command, Dispatcher, QueuedTask};
use task::STATUS_QUEUED;

/// Pool construction parameters.
#[derive(Clone)]
pub struct PoolConfig {
  /// Number of worker threads. Clamped to at least 1.
  pub workers: usize,

  /// Thread name prefix; workers are named `{prefix}-{slot}` and the
  /// dispatch thread `{prefix}-dispatch`.
  pub thread_name_prefix: String,

  /// The construction algorithm every worker runs.
  pub builder: Arc<dyn BvhBuilder>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      workers: thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1),
      thread_name_prefix: "bvh-worker".to_string(),
      builder: Arc::new(MedianSplitBuilder),
    }
  }
}

impl PoolConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }

  pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.thread_name_prefix = prefix.into();
    self
  }

  pub fn with_builder<B: BvhBuilder + 'static>(mut self, builder: B) -> Self {
    self.builder = Arc::new(builder);
    self
  }
}

impl std::fmt::Debug for PoolConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PoolConfig")
      .field("workers", &self.workers)
      .field("thread_name_prefix", &self.thread_name_prefix)
      .finish()
  }
}

/// Aggregate pool counters, snapshotted by [`BvhPool::stats`].
#[derive(Clone, Debug, Default)]
pub struct PoolStats {
  /// Tasks that received a handle, including ones later rejected for
  /// racing a terminate.
  pub submitted: u64,
  pub completed: u64,
  pub failed: u64,
  pub cancelled: u64,
  /// Tasks waiting in the FIFO at snapshot time.
  pub pending: usize,
  /// Tasks on a worker at snapshot time.
  pub running: usize,
  pub workers: Vec<WorkerStats>,
}

impl PoolStats {
  /// Tasks that reached a terminal state.
  pub fn settled(&self) -> u64 {
    self.completed + self.failed + self.cancelled
  }
}

/// Per-worker counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkerStats {
  pub slot: usize,
  pub busy: bool,
  pub jobs_completed: u64,
  /// Times this slot's thread was replaced after a crash.
  pub restarts: u32,
}

/// Pool of background workers building hierarchies over submitted geometry.
///
/// All methods take `&self`; share the pool across threads behind an `Arc`
/// if needed. Dropping the pool triggers a graceful termination without
/// waiting for it: outstanding tasks still settle and their [`Task`]
/// handles outlive the pool. Call `terminate(false).wait()` for a
/// synchronous shutdown.
pub struct BvhPool {
  commands: Sender<Command>,
  closed: Arc<AtomicBool>,
  workers: usize,
}

impl BvhPool {
  /// Pool with default configuration: one worker per available core and
  /// the bundled [`MedianSplitBuilder`].
  ///
  /// Panics if worker threads cannot be spawned.
  pub fn new() -> Self {
    Self::with_config(PoolConfig::default())
  }

  /// Panics if worker threads cannot be spawned.
  pub fn with_config(config: PoolConfig) -> Self {
    let workers = config.workers.max(1);
    let (commands_tx, commands_rx) = unbounded();
    let dispatcher = Dispatcher::new(
      workers,
      config.thread_name_prefix.clone(),
      config.builder,
      commands_rx,
    );
    thread::Builder::new()
      .name(format!("{}-dispatch", config.thread_name_prefix))
      .spawn(move || dispatcher.run())
      .expect("failed to spawn dispatch thread");

    tracing::info!(workers, "pool started");
    Self {
      commands: commands_tx,
      closed: Arc::new(AtomicBool::new(false)),
      workers,
    }
  }

  /// Submit geometry for background construction.
  ///
  /// Validates buffer shape, then moves the buffers into the pool and
  /// enqueues at the FIFO tail; returns immediately with the task handle.
  /// On rejection the buffers come back inside the error, so a failed call
  /// never strands them.
  pub fn queue(
    &self,
    geometry: GeometryBuffers,
    options: BuildOptions,
  ) -> Result<Task, QueueError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(QueueError {
        error: PoolError::PoolClosed,
        geometry,
      });
    }

    let (positions, indices) = match geometry.into_transfer_parts() {
      Ok(parts) => parts,
      Err((error, geometry)) => {
        return Err(QueueError {
          error: error.into(),
          geometry,
        })
      }
    };

    let id = TaskId::next();
    let status = Arc::new(AtomicU8::new(STATUS_QUEUED));
    let (settle_tx, settle_rx) = bounded(1);
    let queued = QueuedTask {
      id,
      positions,
      indices,
      options,
      status: Arc::clone(&status),
      settle: settle_tx,
      enqueued_at: Instant::now(),
    };

    if let Err(SendError(Command::Queue(rejected))) = self.commands.send(Command::Queue(queued)) {
      // The dispatcher already exited; the buffers return to the caller.
      return Err(QueueError {
        error: PoolError::PoolClosed,
        geometry: GeometryBuffers::from_parts(rejected.positions, rejected.indices),
      });
    }
    Ok(Task::new(id, status, settle_rx))
  }

  /// Signal that fires once every task queued before this call has
  /// settled. Tasks submitted afterwards do not hold it open.
  pub fn settled(&self) -> Signal {
    let (reply, fired) = bounded(1);
    let _ = self.commands.send(Command::Settled { reply });
    Signal::new(fired)
  }

  /// Signal that fires when the pool is fully idle: nothing queued,
  /// nothing running, tasks submitted after this call included. Fires
  /// immediately on an idle pool.
  pub fn completed(&self) -> Signal {
    let (reply, fired) = bounded(1);
    let _ = self.commands.send(Command::Completed { reply });
    Signal::new(fired)
  }

  /// Stop accepting submissions and shut down.
  ///
  /// With `force`, every queued and in-flight task settles as cancelled at
  /// once and worker threads are left to exit on their own; without it the
  /// pool drains outstanding tasks first and joins its workers. The signal
  /// fires when shutdown is complete. Idempotent: repeated calls attach to
  /// the same shutdown, and a forced call upgrades a graceful one already
  /// in progress.
  pub fn terminate(&self, force: bool) -> Signal {
    self.closed.store(true, Ordering::Release);
    let (reply, fired) = bounded(1);
    let _ = self.commands.send(Command::Terminate { force, reply });
    Signal::new(fired)
  }

  /// Counter snapshot. Returns a default snapshot after shutdown.
  pub fn stats(&self) -> PoolStats {
    let (reply, response) = bounded(1);
    if self.commands.send(Command::Stats { reply }).is_ok() {
      if let Ok(stats) = response.recv() {
        return stats;
      }
    }
    PoolStats::default()
  }

  /// Rolling timing windows. Returns an empty snapshot after shutdown.
  #[cfg(feature = "metrics")]
  pub fn metrics(&self) -> PoolMetrics {
    let (reply, response) = bounded(1);
    if self.commands.send(Command::Metrics { reply }).is_ok() {
      if let Ok(metrics) = response.recv() {
        return metrics;
      }
    }
    PoolMetrics::new()
  }

  /// Number of worker threads.
  pub fn worker_count(&self) -> usize {
    self.workers
  }

  /// Tasks waiting in the FIFO right now.
  pub fn pending_count(&self) -> usize {
    self.stats().pending
  }

  /// True once `terminate` has been called.
  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }
}

impl Default for BvhPool {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for BvhPool {
  fn drop(&mut self) {
    self.closed.store(true, Ordering::Release);
    let (reply, _fired) = bounded(1);
    let _ = self.commands.send(Command::Terminate {
      force: false,
      reply,
    });
  }
}
