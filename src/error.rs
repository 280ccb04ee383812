//! Error taxonomy for submission, building, transfer, and pool lifecycle.
//!
//! Per-task failures never abort other tasks or the pool itself. Every
//! rejection path that still holds the caller's buffers hands them back;
//! the one place that cannot (a crashed worker) logs a warning instead.

use thiserror::Error;

use crate::types::GeometryBuffers;

/// Input rejected before dispatch. No worker is consumed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  /// The attribute shares a backing store with others; transfer needs
  /// exclusive ownership of one contiguous allocation per attribute.
  #[error("{attribute} attribute is an interleaved view and cannot be transferred")]
  InterleavedAttribute { attribute: &'static str },

  #[error("geometry contains no triangles")]
  EmptyGeometry,

  #[error("position buffer length {len} is not a multiple of 3")]
  MalformedPositions { len: usize },

  #[error("index buffer length {len} is not a multiple of 3")]
  MalformedIndices { len: usize },

  #[error("non-indexed vertex count {count} is not a multiple of 3")]
  MalformedVertexCount { count: usize },

  /// The tree's leaf ranges address triangles through an index buffer the
  /// geometry does not carry.
  #[error("geometry has no index buffer to serialize against")]
  MissingIndex,

  #[error("tree covers {tree_tris} triangles but the index buffer holds {index_tris}")]
  TreeGeometryMismatch { tree_tris: u32, index_tris: u32 },
}

/// Builder failure inside a worker. Scoped to the one task that carried the
/// offending geometry; the worker survives and keeps serving.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  #[error("index {index} references a vertex beyond vertex count {vertex_count}")]
  IndexOutOfRange { index: u32, vertex_count: u32 },

  #[error("geometry contains no triangles")]
  EmptyGeometry,

  /// The builder panicked. The panic was contained and the buffers
  /// recovered; the message is the panic payload when it was a string.
  #[error("builder panicked: {message}")]
  Panicked { message: String },

  /// The worker thread itself died. Unlike a contained builder panic, the
  /// buffers it held could not be recovered.
  #[error("worker thread crashed while building")]
  WorkerCrashed,

  /// Failure reported by a custom [`BvhBuilder`](crate::builder::BvhBuilder)
  /// implementation.
  #[error("builder failed: {message}")]
  Failed { message: String },
}

/// Structural mismatch detected while decoding a flat tree.
///
/// Decoding fails closed: any violation yields an error, never a
/// usable-but-corrupt tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
  #[error("node arrays disagree: {bounds_len} bounds floats for {meta_len} meta words")]
  LengthMismatch { bounds_len: usize, meta_len: usize },

  #[error("serialized tree has no nodes")]
  Empty,

  #[error("serialized index length {len} is not a multiple of 3")]
  MalformedIndex { len: usize },

  #[error("node {node} references child {child} beyond node count {total}")]
  ChildOutOfRange { node: u32, child: u32, total: u32 },

  /// Children must sit strictly after their parent; anything else could
  /// cycle.
  #[error("node {node} references child {child} that does not sit after it")]
  ChildNotForward { node: u32, child: u32 },

  #[error("node {node} is claimed by more than one parent")]
  SharedNode { node: u32 },

  #[error("{count} serialized nodes are unreachable from the root")]
  UnreachableNodes { count: usize },

  #[error("node {node} is a leaf with zero triangles")]
  EmptyLeaf { node: u32 },

  #[error("node {node} has split axis {axis}, expected 0 through 2")]
  InvalidAxis { node: u32, axis: u32 },

  #[error("node {node} leaf range ends at triangle {end} but the index buffer holds {total}")]
  LeafRangeOutOfBounds { node: u32, end: u32, total: u32 },

  #[error("leaf ranges cover {covered} triangles but the index buffer holds {expected}")]
  CoverageMismatch { covered: u32, expected: u32 },
}

/// Any failure a task can settle with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Transfer(#[from] TransferError),

  /// The pool was terminated with `force` while this task was outstanding.
  #[error("task was cancelled by pool termination")]
  Cancelled,

  /// Submission arrived after `terminate`.
  #[error("pool is closed and no longer accepts tasks")]
  PoolClosed,
}

/// Rejected submission. Carries the geometry back out so a failed `queue`
/// call never strands the caller's buffers.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct QueueError {
  #[source]
  pub error: PoolError,
  pub geometry: GeometryBuffers,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_messages() {
    let err = ValidationError::InterleavedAttribute {
      attribute: "position",
    };
    assert_eq!(
      err.to_string(),
      "position attribute is an interleaved view and cannot be transferred"
    );

    let err = TransferError::ChildNotForward { node: 4, child: 2 };
    assert_eq!(
      err.to_string(),
      "node 4 references child 2 that does not sit after it"
    );
  }

  #[test]
  fn test_pool_error_is_transparent() {
    let inner = BuildError::IndexOutOfRange {
      index: 9,
      vertex_count: 6,
    };
    let outer = PoolError::from(inner.clone());
    assert_eq!(outer.to_string(), inner.to_string());
    assert_eq!(outer, PoolError::Build(inner));
  }
}
