//! The dispatch loop: one dedicated thread multiplexing submissions and
//! worker responses.
//!
//! All task bookkeeping lives here, single-threaded, so no lock guards any
//! of it. The loop reacts to two channels: commands from the pool facade
//! (queue, lifecycle waits, termination) and events from the workers
//! (responses, crashes). Geometry buffers only ever move through those
//! channels; the dispatcher holds a queued task's buffers until a worker
//! frees up and a settled task's buffers only long enough to hand them
//! back.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{select, Receiver, SendError, Sender};

use crate::builder::BvhBuilder;
use crate::codec;
use crate::error::{BuildError, PoolError};
#[cfg(feature = "metrics")]
use crate::metrics::PoolMetrics;
use crate::pool::task::{
  BuiltBvh, TaskFailure, TaskResult, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_FAILED,
  STATUS_RUNNING,
};
use crate::pool::worker::{self, DispatchRequest, DispatchResponse, WorkerEvent, WorkerHandle};
use crate::pool::{PoolStats, WorkerStats};
use crate::types::{BuildOptions, GeometryBuffers, TaskId};

/// Control messages from the pool facade.
pub(crate) enum Command {
  Queue(QueuedTask),
  /// Fire the reply once every task registered so far has settled.
  Settled { reply: Sender<()> },
  /// Fire the reply once the pool is fully idle.
  Completed { reply: Sender<()> },
  Terminate { force: bool, reply: Sender<()> },
  Stats { reply: Sender<PoolStats> },
  #[cfg(feature = "metrics")]
  Metrics { reply: Sender<PoolMetrics> },
}

/// A validated submission, buffers included.
pub(crate) struct QueuedTask {
  pub id: TaskId,
  pub positions: Vec<f32>,
  pub indices: Option<Vec<u32>>,
  pub options: BuildOptions,
  pub status: Arc<AtomicU8>,
  pub settle: Sender<TaskResult>,
  pub enqueued_at: Instant,
}

/// Settlement plumbing for a task whose buffers are on a worker.
struct TrackedTask {
  status: Arc<AtomicU8>,
  settle: Sender<TaskResult>,
}

struct Shutdown {
  force: bool,
  replies: Vec<Sender<()>>,
}

pub(crate) struct Dispatcher {
  commands: Receiver<Command>,
  events: Receiver<WorkerEvent>,
  /// Kept for respawning replacement workers.
  events_tx: Sender<WorkerEvent>,
  workers: Vec<WorkerHandle>,
  builder: Arc<dyn BvhBuilder>,
  thread_name_prefix: String,

  /// Strict FIFO of tasks waiting for a worker.
  pending: VecDeque<QueuedTask>,
  /// Tasks whose buffers are currently on a worker.
  running: HashMap<TaskId, TrackedTask>,
  /// Every registered, unsettled task id. Ids are monotonic, so the set
  /// doubles as the watermark structure for `settled` waiters.
  outstanding: BTreeSet<TaskId>,

  /// Waiters that fire once all ids at or below their watermark settle.
  settled_waiters: Vec<(TaskId, Sender<()>)>,
  /// Waiters that fire when the pool goes fully idle.
  completed_waiters: Vec<Sender<()>>,
  shutdown: Option<Shutdown>,
  finished: bool,

  submitted: u64,
  completed: u64,
  failed: u64,
  cancelled: u64,
  #[cfg(feature = "metrics")]
  metrics: PoolMetrics,
}

impl Dispatcher {
  pub(crate) fn new(
    worker_count: usize,
    thread_name_prefix: String,
    builder: Arc<dyn BvhBuilder>,
    commands: Receiver<Command>,
  ) -> Self {
    let (events_tx, events) = crossbeam_channel::unbounded();
    let workers = (0..worker_count)
      .map(|slot| {
        worker::spawn(
          slot,
          &thread_name_prefix,
          Arc::clone(&builder),
          events_tx.clone(),
        )
      })
      .collect();

    Self {
      commands,
      events,
      events_tx,
      workers,
      builder,
      thread_name_prefix,
      pending: VecDeque::new(),
      running: HashMap::new(),
      outstanding: BTreeSet::new(),
      settled_waiters: Vec::new(),
      completed_waiters: Vec::new(),
      shutdown: None,
      finished: false,
      submitted: 0,
      completed: 0,
      failed: 0,
      cancelled: 0,
      #[cfg(feature = "metrics")]
      metrics: PoolMetrics::new(),
    }
  }

  pub(crate) fn run(mut self) {
    while !self.finished {
      select! {
        recv(self.commands) -> command => match command {
          Ok(command) => self.handle_command(command),
          Err(_) => {
            // Every pool handle is gone; drain what is left and stop.
            self.commands = crossbeam_channel::never();
            self.begin_terminate(false, None);
          }
        },
        recv(self.events) -> event => {
          if let Ok(event) = event {
            self.handle_event(event);
          }
        },
      }
    }
  }

  fn handle_command(&mut self, command: Command) {
    match command {
      Command::Queue(task) => self.handle_queue(task),
      Command::Settled { reply } => self.handle_settled_waiter(reply),
      Command::Completed { reply } => self.handle_completed_waiter(reply),
      Command::Terminate { force, reply } => self.begin_terminate(force, Some(reply)),
      Command::Stats { reply } => {
        let _ = reply.send(self.snapshot_stats());
      }
      #[cfg(feature = "metrics")]
      Command::Metrics { reply } => {
        let _ = reply.send(self.metrics.clone());
      }
    }
  }

  fn handle_event(&mut self, event: WorkerEvent) {
    match event {
      WorkerEvent::Response(response) => self.handle_response(response),
      WorkerEvent::Crashed { worker } => self.handle_crash(worker),
    }
  }

  fn handle_queue(&mut self, task: QueuedTask) {
    self.submitted += 1;
    if self.shutdown.is_some() {
      // The submission raced a terminate; reject it with its buffers.
      let geometry = GeometryBuffers::from_parts(task.positions, task.indices);
      self.settle_now(
        task.id,
        task.status,
        task.settle,
        Err(TaskFailure {
          error: PoolError::PoolClosed,
          geometry: Some(geometry),
        }),
      );
      return;
    }

    tracing::debug!(task = task.id.value(), "task queued");
    self.outstanding.insert(task.id);
    self.pending.push_back(task);
    self.dispatch_pending();
  }

  fn handle_settled_waiter(&mut self, reply: Sender<()>) {
    match self.outstanding.iter().next_back() {
      None => {
        let _ = reply.send(());
      }
      Some(&watermark) => self.settled_waiters.push((watermark, reply)),
    }
  }

  fn handle_completed_waiter(&mut self, reply: Sender<()>) {
    if self.outstanding.is_empty() {
      let _ = reply.send(());
    } else {
      self.completed_waiters.push(reply);
    }
  }

  /// Hand queued tasks to free workers, one pass over the slots.
  fn dispatch_pending(&mut self) {
    for slot in 0..self.workers.len() {
      if self.pending.is_empty() {
        return;
      }
      if self.workers[slot].busy.is_some() {
        continue;
      }
      let Some(task) = self.pending.pop_front() else {
        return;
      };
      self.dispatch_to(slot, task);
    }
  }

  fn dispatch_to(&mut self, slot: usize, task: QueuedTask) {
    let QueuedTask {
      id,
      positions,
      indices,
      options,
      status,
      settle,
      enqueued_at,
    } = task;
    let request = DispatchRequest {
      task_id: id,
      positions,
      indices,
      options,
      enqueued_at,
    };
    match self.workers[slot].requests.send(request) {
      Ok(()) => {
        status.store(STATUS_RUNNING, Ordering::Release);
        self.running.insert(id, TrackedTask { status, settle });
        self.workers[slot].busy = Some(id);
        tracing::debug!(task = id.value(), worker = slot, "task dispatched");
      }
      Err(SendError(request)) => {
        // The worker died and its crash event is still in flight; hold the
        // task at the queue head until the respawn.
        let DispatchRequest {
          positions, indices, ..
        } = request;
        self.pending.push_front(QueuedTask {
          id,
          positions,
          indices,
          options,
          status,
          settle,
          enqueued_at,
        });
      }
    }
  }

  fn handle_response(&mut self, response: DispatchResponse) {
    let slot = response.worker;
    if let Some(worker) = self.workers.get_mut(slot) {
      worker.busy = None;
      worker.jobs_completed += 1;
    }

    let Some(tracked) = self.running.remove(&response.task_id) else {
      // Settled while the build was in flight (forced termination); the
      // cancellation already warned that these buffers would not come home.
      return;
    };

    let task = response.task_id;
    let queue_us = response.queue_us;
    let build_us = response.build_us;
    let result = self.response_result(response);

    match &result {
      Ok(_) => {
        tracing::debug!(
          task = task.value(),
          worker = slot,
          queue_us,
          build_us,
          "task completed"
        );
        #[cfg(feature = "metrics")]
        self.metrics.record_build(queue_us, build_us);
      }
      Err(failure) => {
        tracing::warn!(
          task = task.value(),
          worker = slot,
          error = %failure.error,
          "task failed"
        );
        #[cfg(feature = "metrics")]
        self.metrics.record_failure();
      }
    }

    self.settle_now(task, tracked.status, tracked.settle, result);
    self.dispatch_pending();
    self.try_finish_shutdown();
  }

  /// Turn a worker response into a settlement payload. Buffers ride along
  /// on every branch.
  fn response_result(&self, response: DispatchResponse) -> TaskResult {
    if let Some(error) = response.error {
      let geometry = GeometryBuffers::from_parts(response.positions, response.indices);
      return Err(TaskFailure {
        error: PoolError::Build(error),
        geometry: Some(geometry),
      });
    }

    match response.serialized {
      Some(serialized) => match codec::reconstruct(&serialized, true) {
        Ok(bvh) => {
          let geometry =
            GeometryBuffers::from_parts(response.positions, Some(serialized.index));
          Ok(BuiltBvh { bvh, geometry })
        }
        Err(error) => {
          // The reordered index still goes home, corrupt tree or not.
          let geometry =
            GeometryBuffers::from_parts(response.positions, Some(serialized.index));
          Err(TaskFailure {
            error: PoolError::Transfer(error),
            geometry: Some(geometry),
          })
        }
      },
      None => {
        let geometry = GeometryBuffers::from_parts(response.positions, response.indices);
        Err(TaskFailure {
          error: PoolError::Build(BuildError::Failed {
            message: "worker returned neither a tree nor an error".to_string(),
          }),
          geometry: Some(geometry),
        })
      }
    }
  }

  fn handle_crash(&mut self, slot: usize) {
    let Some(worker) = self.workers.get_mut(slot) else {
      return;
    };
    let failed = worker.busy.take();
    let jobs_completed = worker.jobs_completed;
    let restarts = worker.restarts + 1;
    tracing::error!(worker = slot, restarts, "worker thread crashed; respawning");

    let mut replacement = worker::spawn(
      slot,
      &self.thread_name_prefix,
      Arc::clone(&self.builder),
      self.events_tx.clone(),
    );
    replacement.jobs_completed = jobs_completed;
    replacement.restarts = restarts;
    // Swap first so the dead handle's request sender drops before the join;
    // a thread stuck short of its panic still sees the disconnect and exits.
    let old = std::mem::replace(&mut self.workers[slot], replacement);
    drop(old.requests);
    if let Some(join) = old.join {
      let _ = join.join();
    }

    if let Some(id) = failed {
      if let Some(tracked) = self.running.remove(&id) {
        tracing::warn!(
          task = id.value(),
          worker = slot,
          "geometry buffers were lost in a worker crash"
        );
        self.settle_now(
          id,
          tracked.status,
          tracked.settle,
          Err(TaskFailure {
            error: PoolError::Build(BuildError::WorkerCrashed),
            geometry: None,
          }),
        );
      }
    }

    self.dispatch_pending();
    self.try_finish_shutdown();
  }

  fn begin_terminate(&mut self, force: bool, reply: Option<Sender<()>>) {
    match &mut self.shutdown {
      Some(shutdown) => {
        shutdown.force |= force;
        if let Some(reply) = reply {
          shutdown.replies.push(reply);
        }
      }
      None => {
        tracing::info!(force, "pool terminating");
        self.shutdown = Some(Shutdown {
          force,
          replies: reply.into_iter().collect(),
        });
      }
    }

    if self.shutdown.as_ref().is_some_and(|shutdown| shutdown.force) {
      self.cancel_outstanding();
    }
    self.try_finish_shutdown();
  }

  /// Forced termination: settle everything at once.
  fn cancel_outstanding(&mut self) {
    // Queued tasks still hold their buffers, so those travel home.
    while let Some(task) = self.pending.pop_front() {
      let geometry = GeometryBuffers::from_parts(task.positions, task.indices);
      self.settle_now(
        task.id,
        task.status,
        task.settle,
        Err(TaskFailure {
          error: PoolError::Cancelled,
          geometry: Some(geometry),
        }),
      );
    }

    // In-flight builds are abandoned; their buffers cannot come home.
    let running: Vec<(TaskId, TrackedTask)> = self.running.drain().collect();
    for (id, tracked) in running {
      tracing::warn!(
        task = id.value(),
        "forced termination abandoned an in-flight build; geometry buffers were not returned"
      );
      self.settle_now(
        id,
        tracked.status,
        tracked.settle,
        Err(TaskFailure {
          error: PoolError::Cancelled,
          geometry: None,
        }),
      );
    }

    for worker in &mut self.workers {
      worker.busy = None;
    }
  }

  fn try_finish_shutdown(&mut self) {
    let force = match &self.shutdown {
      Some(shutdown) if self.outstanding.is_empty() => shutdown.force,
      _ => return,
    };

    // Dropping a request sender ends that worker's loop. Graceful shutdown
    // joins the threads; forced shutdown leaves them to exit on their own
    // once their current build finishes.
    for worker in self.workers.drain(..) {
      drop(worker.requests);
      if !force {
        if let Some(join) = worker.join {
          let _ = join.join();
        }
      }
    }

    if let Some(shutdown) = self.shutdown.take() {
      for reply in shutdown.replies {
        let _ = reply.send(());
      }
    }
    tracing::info!("pool terminated");
    self.finished = true;
  }

  /// Mark one task settled: status first, then the one-shot send, then the
  /// aggregate waiters.
  fn settle_now(
    &mut self,
    id: TaskId,
    status: Arc<AtomicU8>,
    settle: Sender<TaskResult>,
    result: TaskResult,
  ) {
    let code = match &result {
      Ok(_) => STATUS_COMPLETED,
      Err(failure) if failure.error == PoolError::Cancelled => STATUS_CANCELLED,
      Err(_) => STATUS_FAILED,
    };
    match code {
      STATUS_COMPLETED => self.completed += 1,
      STATUS_CANCELLED => self.cancelled += 1,
      _ => self.failed += 1,
    }

    status.store(code, Ordering::Release);
    let _ = settle.send(result);
    self.outstanding.remove(&id);
    self.flush_waiters();
  }

  fn flush_waiters(&mut self) {
    let min_outstanding = self.outstanding.iter().next().copied();
    self.settled_waiters.retain(|(watermark, reply)| {
      let fired = match min_outstanding {
        None => true,
        Some(min) => *watermark < min,
      };
      if fired {
        let _ = reply.send(());
      }
      !fired
    });

    if self.outstanding.is_empty() {
      for reply in self.completed_waiters.drain(..) {
        let _ = reply.send(());
      }
    }
  }

  fn snapshot_stats(&self) -> PoolStats {
    PoolStats {
      submitted: self.submitted,
      completed: self.completed,
      failed: self.failed,
      cancelled: self.cancelled,
      pending: self.pending.len(),
      running: self.running.len(),
      workers: self
        .workers
        .iter()
        .map(|worker| WorkerStats {
          slot: worker.slot,
          busy: worker.busy.is_some(),
          jobs_completed: worker.jobs_completed,
          restarts: worker.restarts,
        })
        .collect(),
    }
  }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod dispatch_test;
