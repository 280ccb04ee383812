//! Core data types for geometry transfer and build configuration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::ValidationError;

/// Unique identifier for a queued build task.
///
/// Ids are assigned from a monotonic counter at submission, so within one
/// pool a later submission always carries a larger id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
  pub(crate) fn next() -> Self {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    Self(COUNTER.fetch_add(1, Ordering::Relaxed))
  }

  /// Raw counter value.
  pub fn value(&self) -> u64 {
    self.0
  }
}

/// A single vertex attribute buffer.
///
/// Moving a buffer to a worker requires exclusive ownership of one
/// contiguous allocation, so only the `Owned` form is transferable. An
/// `InterleavedView` shares its backing store with other attributes and is
/// rejected at submission; call [`Attribute::gather`] to copy it out first.
#[derive(Clone, Debug)]
pub enum Attribute<T> {
  /// Contiguous, independently owned buffer.
  Owned(Vec<T>),

  /// Strided view into a shared interleaved allocation.
  InterleavedView {
    /// Shared backing store holding several attributes.
    backing: Arc<[T]>,
    /// Element offset of the first component inside `backing`.
    offset: usize,
    /// Elements between consecutive vertices.
    stride: usize,
    /// Components per vertex (3 for positions, 1 for indices).
    components: usize,
    /// Number of vertices covered by the view.
    count: usize,
  },
}

impl<T> Attribute<T> {
  /// True when the buffer is independently owned and can move across a
  /// thread boundary.
  pub fn is_owned(&self) -> bool {
    matches!(self, Attribute::Owned(_))
  }

  /// Number of scalar elements in the attribute.
  pub fn len(&self) -> usize {
    match self {
      Attribute::Owned(data) => data.len(),
      Attribute::InterleavedView {
        components, count, ..
      } => components * count,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T: Clone> Attribute<T> {
  /// Copy the attribute into an owned, contiguous buffer.
  ///
  /// For an `Owned` attribute this clones the data unchanged. For an
  /// `InterleavedView` it de-interleaves: the escape hatch for callers who
  /// hold interleaved geometry and want to submit it anyway.
  pub fn gather(&self) -> Vec<T> {
    match self {
      Attribute::Owned(data) => data.clone(),
      Attribute::InterleavedView {
        backing,
        offset,
        stride,
        components,
        count,
      } => {
        let mut out = Vec::with_capacity(components * count);
        for vertex in 0..*count {
          let base = offset + vertex * stride;
          out.extend_from_slice(&backing[base..base + components]);
        }
        out
      }
    }
  }
}

/// Triangle mesh buffers as submitted to the pool.
///
/// Positions are xyz triples; the index buffer, when present, references
/// vertices in groups of three per triangle. Exactly one of the caller, the
/// pool, or a worker owns an instance at any moment; submission moves it in
/// and settlement moves it back.
#[derive(Clone, Debug)]
pub struct GeometryBuffers {
  /// Vertex positions, three floats per vertex.
  pub positions: Attribute<f32>,

  /// Triangle indices, three per triangle. `None` means the positions
  /// themselves form consecutive triangles.
  pub indices: Option<Attribute<u32>>,
}

impl GeometryBuffers {
  /// Indexed geometry from owned buffers.
  pub fn indexed(positions: Vec<f32>, indices: Vec<u32>) -> Self {
    Self {
      positions: Attribute::Owned(positions),
      indices: Some(Attribute::Owned(indices)),
    }
  }

  /// Non-indexed geometry: every three consecutive vertices form a triangle.
  pub fn non_indexed(positions: Vec<f32>) -> Self {
    Self {
      positions: Attribute::Owned(positions),
      indices: None,
    }
  }

  pub(crate) fn from_parts(positions: Vec<f32>, indices: Option<Vec<u32>>) -> Self {
    Self {
      positions: Attribute::Owned(positions),
      indices: indices.map(Attribute::Owned),
    }
  }

  /// Number of vertices in the position attribute.
  pub fn vertex_count(&self) -> usize {
    self.positions.len() / 3
  }

  /// Number of triangles the geometry describes.
  pub fn triangle_count(&self) -> usize {
    match &self.indices {
      Some(indices) => indices.len() / 3,
      None => self.vertex_count() / 3,
    }
  }

  /// Copy any interleaved views into owned buffers so the geometry becomes
  /// transferable.
  pub fn to_owned_buffers(&self) -> Self {
    Self {
      positions: Attribute::Owned(self.positions.gather()),
      indices: self
        .indices
        .as_ref()
        .map(|indices| Attribute::Owned(indices.gather())),
    }
  }

  /// Shape checks applied before dispatch.
  ///
  /// Cheap by design: ownership and length arithmetic only. Semantic checks
  /// that touch every element (index range) run inside the worker.
  pub fn validate(&self) -> Result<(), ValidationError> {
    if !self.positions.is_owned() {
      return Err(ValidationError::InterleavedAttribute {
        attribute: "position",
      });
    }
    if let Some(indices) = &self.indices {
      if !indices.is_owned() {
        return Err(ValidationError::InterleavedAttribute { attribute: "index" });
      }
    }

    let position_len = self.positions.len();
    if position_len % 3 != 0 {
      return Err(ValidationError::MalformedPositions { len: position_len });
    }

    match &self.indices {
      Some(indices) => {
        let index_len = indices.len();
        if index_len % 3 != 0 {
          return Err(ValidationError::MalformedIndices { len: index_len });
        }
      }
      None => {
        let count = position_len / 3;
        if count % 3 != 0 {
          return Err(ValidationError::MalformedVertexCount { count });
        }
      }
    }

    if self.triangle_count() == 0 {
      return Err(ValidationError::EmptyGeometry);
    }
    Ok(())
  }

  /// Validate and split into the owned buffers that travel to a worker.
  ///
  /// On rejection the geometry comes back untouched alongside the error, so
  /// a failed submission never strands the caller's buffers.
  pub(crate) fn into_transfer_parts(
    self,
  ) -> Result<(Vec<f32>, Option<Vec<u32>>), (ValidationError, GeometryBuffers)> {
    if let Err(err) = self.validate() {
      return Err((err, self));
    }
    let GeometryBuffers { positions, indices } = self;
    match (positions, indices) {
      (Attribute::Owned(positions), Some(Attribute::Owned(indices))) => {
        Ok((positions, Some(indices)))
      }
      (Attribute::Owned(positions), None) => Ok((positions, None)),
      // validate() already rejected every non-owned combination
      (positions, indices) => {
        let geometry = GeometryBuffers { positions, indices };
        Err((
          ValidationError::InterleavedAttribute {
            attribute: "position",
          },
          geometry,
        ))
      }
    }
  }

  /// Install a sequential index when the geometry arrived non-indexed.
  pub(crate) fn ensure_index(&mut self) {
    if self.indices.is_none() {
      let count = self.positions.len() / 3;
      self.indices = Some(Attribute::Owned((0..count as u32).collect()));
    }
  }
}

/// Partitioning heuristic used by the default builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitStrategy {
  /// Split at the center of the node's centroid bounds. Fast, the default.
  Center,

  /// Split at the arithmetic mean of the triangle centroids. Slightly
  /// better trees on lopsided input, one extra pass per node.
  Average,
}

impl Default for SplitStrategy {
  fn default() -> Self {
    SplitStrategy::Center
  }
}

/// Build configuration, resolved once at submission and fixed for the
/// lifetime of the task.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BuildOptions {
  /// Partitioning heuristic.
  pub strategy: SplitStrategy,

  /// Maximum tree depth before a node is forced into a leaf.
  pub max_depth: u32,

  /// Maximum triangles per leaf.
  pub max_leaf_tris: u32,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      strategy: SplitStrategy::default(),
      max_depth: 40,
      max_leaf_tris: 10,
    }
  }
}

impl BuildOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_strategy(mut self, strategy: SplitStrategy) -> Self {
    self.strategy = strategy;
    self
  }

  pub fn with_max_depth(mut self, depth: u32) -> Self {
    self.max_depth = depth;
    self
  }

  pub fn with_max_leaf_tris(mut self, tris: u32) -> Self {
    self.max_leaf_tris = tris.max(1);
    self
  }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
