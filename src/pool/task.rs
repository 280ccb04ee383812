//! Task handles and one-shot signals.
//!
//! A [`Task`] is the caller's side of one submitted build; the pool's
//! dispatch thread is the only writer. Settlement travels over a one-shot
//! channel, so waiting suspends the caller instead of spinning.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::bvh::Bvh;
use crate::error::PoolError;
use crate::types::{GeometryBuffers, TaskId};

pub(crate) const STATUS_QUEUED: u8 = 0;
pub(crate) const STATUS_RUNNING: u8 = 1;
pub(crate) const STATUS_COMPLETED: u8 = 2;
pub(crate) const STATUS_FAILED: u8 = 3;
pub(crate) const STATUS_CANCELLED: u8 = 4;

/// Lifecycle of a queued task. Each state is entered at most once, and the
/// three terminal states release the task's resources exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
  /// Waiting in the pool's FIFO queue.
  Queued,
  /// Moved onto a worker; the worker owns the buffers.
  Running,
  /// Settled with a reconstructed tree.
  Completed,
  /// Settled with an error.
  Failed,
  /// Settled by forced pool termination.
  Cancelled,
}

impl TaskStatus {
  pub(crate) fn from_code(code: u8) -> Self {
    match code {
      STATUS_RUNNING => TaskStatus::Running,
      STATUS_COMPLETED => TaskStatus::Completed,
      STATUS_FAILED => TaskStatus::Failed,
      STATUS_CANCELLED => TaskStatus::Cancelled,
      _ => TaskStatus::Queued,
    }
  }

  /// True for the three settled states.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
    )
  }
}

/// Successful settlement payload: the reconstructed tree plus the caller's
/// buffers, with the index attribute already replaced by the reordered one.
#[derive(Debug)]
pub struct BuiltBvh {
  pub bvh: Bvh,
  pub geometry: GeometryBuffers,
}

/// Failed settlement payload.
///
/// `geometry` is `Some` whenever the failure path still held the buffers:
/// validation at dispatch, a contained build failure, or cancellation while
/// queued. It is `None` only when a crash or a forced cancellation mid-build
/// made returning them impossible.
#[derive(Debug)]
pub struct TaskFailure {
  pub error: PoolError,
  pub geometry: Option<GeometryBuffers>,
}

/// What a task settles with.
pub type TaskResult = Result<BuiltBvh, TaskFailure>;

/// Handle to one submitted build.
#[derive(Debug)]
pub struct Task {
  id: TaskId,
  status: Arc<AtomicU8>,
  settled: Receiver<TaskResult>,
}

impl Task {
  pub(crate) fn new(id: TaskId, status: Arc<AtomicU8>, settled: Receiver<TaskResult>) -> Self {
    Self {
      id,
      status,
      settled,
    }
  }

  pub fn id(&self) -> TaskId {
    self.id
  }

  /// Current lifecycle state.
  pub fn status(&self) -> TaskStatus {
    TaskStatus::from_code(self.status.load(Ordering::Acquire))
  }

  /// Block until the task settles and take the result.
  ///
  /// If the pool shut down without settling the task (it never does through
  /// the contractual paths), this reports cancellation with no buffers.
  pub fn wait(self) -> TaskResult {
    self.settled.recv().unwrap_or_else(|_| {
      Err(TaskFailure {
        error: PoolError::Cancelled,
        geometry: None,
      })
    })
  }

  /// Take the result if the task already settled. Non-blocking; returns the
  /// result at most once.
  pub fn poll(&mut self) -> Option<TaskResult> {
    match self.settled.try_recv() {
      Ok(result) => Some(result),
      Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
    }
  }

  /// Wait up to `timeout` for settlement.
  pub fn wait_timeout(&mut self, timeout: Duration) -> Option<TaskResult> {
    match self.settled.recv_timeout(timeout) {
      Ok(result) => Some(result),
      Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
    }
  }
}

/// One-shot wait handle for aggregate pool events (`settled`, `completed`,
/// `terminate`).
///
/// The pool fires a signal by sending a marker and dropping its end, so a
/// signal whose pool has gone away reads as fired rather than hanging its
/// waiters.
#[derive(Debug)]
pub struct Signal {
  fired: Receiver<()>,
}

impl Signal {
  pub(crate) fn new(fired: Receiver<()>) -> Self {
    Self { fired }
  }

  /// Block until the event fires.
  pub fn wait(&self) {
    let _ = self.fired.recv();
  }

  /// Block up to `timeout`; true when the event fired.
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    !matches!(self.fired.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
  }

  /// Non-blocking check.
  pub fn is_ready(&self) -> bool {
    !matches!(self.fired.try_recv(), Err(TryRecvError::Empty))
  }
}
