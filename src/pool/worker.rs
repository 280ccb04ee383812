//! Worker threads: run the builder on transferred buffers.
//!
//! Each worker is strictly single-threaded and serves one request at a
//! time. Buffer ownership moves in with the request and moves back with the
//! response on every contractual path; the builder call is guarded so even
//! a panicking builder returns the buffers it was working on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use crate::builder::BvhBuilder;
use crate::codec::{self, SerializedBvh};
use crate::error::BuildError;
use crate::types::{BuildOptions, TaskId};

/// One build moved onto a worker. Buffer ownership travels with it.
pub(crate) struct DispatchRequest {
  pub task_id: TaskId,
  pub positions: Vec<f32>,
  pub indices: Option<Vec<u32>>,
  pub options: BuildOptions,
  pub enqueued_at: Instant,
}

/// Build outcome moved back to the dispatcher.
///
/// Buffers always come home: on success the reordered index rides inside
/// `serialized`, on failure the index (possibly partially reordered, same
/// triangles) returns alongside the error.
pub(crate) struct DispatchResponse {
  pub task_id: TaskId,
  pub worker: usize,
  pub error: Option<BuildError>,
  pub serialized: Option<SerializedBvh>,
  pub positions: Vec<f32>,
  pub indices: Option<Vec<u32>>,
  /// Time spent waiting in the queue, microseconds.
  pub queue_us: u64,
  /// Time spent inside the builder, microseconds.
  pub build_us: u64,
}

/// Events the dispatcher multiplexes from its workers.
pub(crate) enum WorkerEvent {
  Response(DispatchResponse),
  /// The worker's request loop itself panicked; its thread is ending and
  /// whatever buffers it held are gone.
  Crashed { worker: usize },
}

/// Dispatcher-side handle to one worker thread.
pub(crate) struct WorkerHandle {
  pub slot: usize,
  pub requests: Sender<DispatchRequest>,
  /// Task currently occupying the worker, if any.
  pub busy: Option<TaskId>,
  pub jobs_completed: u64,
  pub restarts: u32,
  pub join: Option<JoinHandle<()>>,
}

/// Spawn a worker thread and return its handle.
///
/// Panics if the OS refuses to spawn a thread, which leaves no pool to
/// speak of anyway.
pub(crate) fn spawn(
  slot: usize,
  name_prefix: &str,
  builder: Arc<dyn BvhBuilder>,
  events: Sender<WorkerEvent>,
) -> WorkerHandle {
  let (requests_tx, requests_rx) = crossbeam_channel::unbounded::<DispatchRequest>();
  let join = thread::Builder::new()
    .name(format!("{name_prefix}-{slot}"))
    .spawn(move || worker_loop(slot, builder, requests_rx, events))
    .expect("failed to spawn worker thread");

  WorkerHandle {
    slot,
    requests: requests_tx,
    busy: None,
    jobs_completed: 0,
    restarts: 0,
    join: Some(join),
  }
}

fn worker_loop(
  slot: usize,
  builder: Arc<dyn BvhBuilder>,
  requests: Receiver<DispatchRequest>,
  events: Sender<WorkerEvent>,
) {
  let serve = panic::catch_unwind(AssertUnwindSafe(|| {
    while let Ok(request) = requests.recv() {
      let response = execute(slot, builder.as_ref(), request);
      if events.send(WorkerEvent::Response(response)).is_err() {
        // Dispatcher is gone; nothing left to serve.
        break;
      }
    }
  }));

  if serve.is_err() {
    let _ = events.send(WorkerEvent::Crashed { worker: slot });
  }
}

/// Run one request to a response. Never panics outward: the builder call is
/// guarded, and the buffers stay on this frame so the guard cannot strand
/// them.
fn execute(slot: usize, builder: &dyn BvhBuilder, request: DispatchRequest) -> DispatchResponse {
  let queue_us = request.enqueued_at.elapsed().as_micros() as u64;
  let DispatchRequest {
    task_id,
    positions,
    indices,
    options,
    ..
  } = request;

  // Leaf runs address triangles through an index buffer, so non-indexed
  // geometry gets the sequential one.
  let had_index = indices.is_some();
  let mut index: Vec<u32> = match indices {
    Some(index) => index,
    None => (0..(positions.len() / 3) as u32).collect(),
  };

  let started = Instant::now();
  let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
    builder.build(&positions, &mut index, &options)
  }));
  let build_us = started.elapsed().as_micros() as u64;

  match outcome {
    Ok(Ok(bvh)) => {
      let serialized = codec::flatten(&bvh, index);
      DispatchResponse {
        task_id,
        worker: slot,
        error: None,
        serialized: Some(serialized),
        positions,
        indices: None,
        queue_us,
        build_us,
      }
    }
    Ok(Err(error)) => DispatchResponse {
      task_id,
      worker: slot,
      error: Some(error),
      serialized: None,
      positions,
      indices: had_index.then_some(index),
      queue_us,
      build_us,
    },
    Err(panic) => DispatchResponse {
      task_id,
      worker: slot,
      error: Some(BuildError::Panicked {
        message: panic_message(panic),
      }),
      serialized: None,
      positions,
      indices: had_index.then_some(index),
      queue_us,
      build_us,
    },
  }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
