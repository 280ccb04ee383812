//! Test utilities shared across builder, codec, and pool tests.
//!
//! Provides mock builders and geometry fixture generators for testing each
//! stage in isolation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::builder::{BvhBuilder, MedianSplitBuilder};
use crate::bvh::Bvh;
use crate::error::BuildError;
use crate::types::{Attribute, BuildOptions, GeometryBuffers};

// =============================================================================
// Geometry fixtures
// =============================================================================

/// One triangle in the xy plane.
pub fn single_triangle() -> GeometryBuffers {
  GeometryBuffers::indexed(
    vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
    vec![0, 1, 2],
  )
}

/// Indexed grid of `nx * ny` quads (two triangles each) in the xy plane,
/// `2 * nx * ny` triangles total. Deterministic.
pub fn quad_grid(nx: u32, ny: u32) -> GeometryBuffers {
  let mut positions = Vec::with_capacity(((nx + 1) * (ny + 1) * 3) as usize);
  for y in 0..=ny {
    for x in 0..=nx {
      positions.extend_from_slice(&[x as f32, y as f32, ((x + y) % 2) as f32 * 0.25]);
    }
  }

  let row = nx + 1;
  let mut indices = Vec::with_capacity((nx * ny * 6) as usize);
  for y in 0..ny {
    for x in 0..nx {
      let a = y * row + x;
      let b = a + 1;
      let c = a + row;
      let d = c + 1;
      indices.extend_from_slice(&[a, b, c, b, d, c]);
    }
  }
  GeometryBuffers::indexed(positions, indices)
}

/// Non-indexed strip of `count` triangles along the x axis.
pub fn tri_soup(count: u32) -> GeometryBuffers {
  let mut positions = Vec::with_capacity(count as usize * 9);
  for tri in 0..count {
    let x = tri as f32;
    positions.extend_from_slice(&[x, 0.0, 0.0, x + 1.0, 0.0, 0.0, x + 0.5, 1.0, 0.0]);
  }
  GeometryBuffers::non_indexed(positions)
}

/// Geometry whose position attribute is a strided view into a shared
/// position+normal allocation. Not transferable by construction.
pub fn interleaved_geometry() -> GeometryBuffers {
  // vertex layout: px py pz nx ny nz
  let mut backing = Vec::new();
  for vertex in 0..6u32 {
    backing.extend_from_slice(&[vertex as f32, 0.0, 0.0, 0.0, 1.0, 0.0]);
  }
  GeometryBuffers {
    positions: Attribute::InterleavedView {
      backing: Arc::from(backing.as_slice()),
      offset: 0,
      stride: 6,
      components: 3,
      count: 6,
    },
    indices: Some(Attribute::Owned(vec![0, 1, 2, 3, 4, 5])),
  }
}

/// Sorted multiset check: same index contents regardless of order.
pub fn same_triangles(a: &[u32], b: &[u32]) -> bool {
  let mut a: Vec<[u32; 3]> = a.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect();
  let mut b: Vec<[u32; 3]> = b.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect();
  a.sort_unstable();
  b.sort_unstable();
  a == b
}

/// Owned index contents of a geometry, panicking on views.
pub fn owned_index(geometry: &GeometryBuffers) -> Vec<u32> {
  match &geometry.indices {
    Some(Attribute::Owned(data)) => data.clone(),
    other => panic!("expected owned index attribute, got {other:?}"),
  }
}

// =============================================================================
// Mock builders
// =============================================================================

/// Fails every build with a fixed message.
pub struct FailingBuilder;

impl BvhBuilder for FailingBuilder {
  fn build(
    &self,
    _positions: &[f32],
    _indices: &mut [u32],
    _options: &BuildOptions,
  ) -> Result<Bvh, BuildError> {
    Err(BuildError::Failed {
      message: "mock failure".to_string(),
    })
  }
}

/// Panics on every build.
pub struct PanickingBuilder;

impl BvhBuilder for PanickingBuilder {
  fn build(
    &self,
    _positions: &[f32],
    _indices: &mut [u32],
    _options: &BuildOptions,
  ) -> Result<Bvh, BuildError> {
    panic!("mock builder panic");
  }
}

/// Delegates to the default builder after sleeping `per_tri` per triangle,
/// making build duration proportional to input size.
pub struct SlowBuilder {
  pub per_tri: Duration,
}

impl BvhBuilder for SlowBuilder {
  fn build(
    &self,
    positions: &[f32],
    indices: &mut [u32],
    options: &BuildOptions,
  ) -> Result<Bvh, BuildError> {
    std::thread::sleep(self.per_tri * (indices.len() as u32 / 3));
    MedianSplitBuilder.build(positions, indices, options)
  }
}

/// Records the triangle count of every build it starts, in start order.
pub struct RecordingBuilder {
  pub started: Arc<Mutex<Vec<usize>>>,
  pub delay: Duration,
}

impl RecordingBuilder {
  pub fn new(delay: Duration) -> (Self, Arc<Mutex<Vec<usize>>>) {
    let started = Arc::new(Mutex::new(Vec::new()));
    (
      Self {
        started: Arc::clone(&started),
        delay,
      },
      started,
    )
  }
}

impl BvhBuilder for RecordingBuilder {
  fn build(
    &self,
    positions: &[f32],
    indices: &mut [u32],
    options: &BuildOptions,
  ) -> Result<Bvh, BuildError> {
    self.started.lock().unwrap().push(indices.len() / 3);
    std::thread::sleep(self.delay);
    MedianSplitBuilder.build(positions, indices, options)
  }
}
