//! Hierarchy construction.
//!
//! The pool is written against the [`BvhBuilder`] trait; the partitioning
//! heuristic is a seam, not a fixed algorithm. [`MedianSplitBuilder`] is the
//! bundled default: top-down, longest-axis center or average split, with the
//! triangle index buffer partitioned in place so every leaf ends up holding
//! a contiguous run of it.

use glam::Vec3A;

use crate::bvh::{Aabb, Bvh, BvhNode};
use crate::error::{BuildError, PoolError};
use crate::types::{Attribute, BuildOptions, GeometryBuffers, SplitStrategy};

/// Constructs a hierarchy over triangle geometry.
///
/// `indices` is reordered in place. On success every leaf of the returned
/// tree references a contiguous run of the reordered buffer, and the runs
/// tile `0..indices.len() / 3` exactly. Implementations must check index
/// range before touching bounds math and must only permute `indices`,
/// never rewrite its contents.
pub trait BvhBuilder: Send + Sync {
  fn build(
    &self,
    positions: &[f32],
    indices: &mut [u32],
    options: &BuildOptions,
  ) -> Result<Bvh, BuildError>;
}

/// Blanket impl for boxed trait objects.
impl BvhBuilder for Box<dyn BvhBuilder> {
  fn build(
    &self,
    positions: &[f32],
    indices: &mut [u32],
    options: &BuildOptions,
  ) -> Result<Bvh, BuildError> {
    (**self).build(positions, indices, options)
  }
}

/// Default top-down builder.
///
/// Splits on the longest axis of a node's centroid bounds, at the bounds
/// center or the centroid mean depending on
/// [`SplitStrategy`](crate::types::SplitStrategy). A node becomes a leaf
/// when its run shrinks to `max_leaf_tris`, when `max_depth` is reached, or
/// when a split fails to separate anything (all centroids equal), in which
/// case the run is cut in half so depth stays bounded.
#[derive(Clone, Copy, Debug, Default)]
pub struct MedianSplitBuilder;

impl BvhBuilder for MedianSplitBuilder {
  fn build(
    &self,
    positions: &[f32],
    indices: &mut [u32],
    options: &BuildOptions,
  ) -> Result<Bvh, BuildError> {
    let vertex_count = (positions.len() / 3) as u32;
    for &index in indices.iter() {
      if index >= vertex_count {
        return Err(BuildError::IndexOutOfRange {
          index,
          vertex_count,
        });
      }
    }

    let tri_count = indices.len() / 3;
    if tri_count == 0 {
      return Err(BuildError::EmptyGeometry);
    }

    let mut centroids: Vec<Vec3A> = (0..tri_count)
      .map(|tri| {
        let a = vertex(positions, indices[tri * 3]);
        let b = vertex(positions, indices[tri * 3 + 1]);
        let c = vertex(positions, indices[tri * 3 + 2]);
        (a + b + c) / 3.0
      })
      .collect();

    let root = build_node(positions, indices, &mut centroids, 0, tri_count, 1, options);
    Ok(Bvh::new(root, tri_count as u32))
  }
}

#[inline]
fn vertex(positions: &[f32], index: u32) -> Vec3A {
  let base = index as usize * 3;
  Vec3A::new(positions[base], positions[base + 1], positions[base + 2])
}

/// Vertex bounds of the triangle run `[start, end)`.
fn run_bounds(positions: &[f32], indices: &[u32], start: usize, end: usize) -> Aabb {
  let mut bounds = Aabb::empty();
  for tri in start..end {
    bounds.encapsulate(vertex(positions, indices[tri * 3]));
    bounds.encapsulate(vertex(positions, indices[tri * 3 + 1]));
    bounds.encapsulate(vertex(positions, indices[tri * 3 + 2]));
  }
  bounds
}

/// Swap triangles `a` and `b`, keeping indices and centroids in lockstep.
#[inline]
fn swap_tris(indices: &mut [u32], centroids: &mut [Vec3A], a: usize, b: usize) {
  centroids.swap(a, b);
  indices.swap(a * 3, b * 3);
  indices.swap(a * 3 + 1, b * 3 + 1);
  indices.swap(a * 3 + 2, b * 3 + 2);
}

/// Two-pointer partition of the run `[start, end)` around `split` on `axis`.
/// Returns the first triangle of the right half.
fn partition(
  indices: &mut [u32],
  centroids: &mut [Vec3A],
  start: usize,
  end: usize,
  axis: usize,
  split: f32,
) -> usize {
  let mut left = start;
  let mut right = end;
  while left < right {
    if centroids[left][axis] < split {
      left += 1;
    } else {
      right -= 1;
      swap_tris(indices, centroids, left, right);
    }
  }
  left
}

fn build_node(
  positions: &[f32],
  indices: &mut [u32],
  centroids: &mut [Vec3A],
  start: usize,
  end: usize,
  depth: u32,
  options: &BuildOptions,
) -> BvhNode {
  let bounds = run_bounds(positions, indices, start, end);
  let count = end - start;

  if count <= options.max_leaf_tris as usize || depth >= options.max_depth {
    return BvhNode::Leaf {
      bounds,
      tri_offset: start as u32,
      tri_count: count as u32,
    };
  }

  let mut centroid_bounds = Aabb::empty();
  for centroid in &centroids[start..end] {
    centroid_bounds.encapsulate(*centroid);
  }
  let axis = centroid_bounds.longest_axis();

  let split = match options.strategy {
    SplitStrategy::Center => centroid_bounds.center()[axis],
    SplitStrategy::Average => {
      let sum: f32 = centroids[start..end].iter().map(|c| c[axis]).sum();
      sum / count as f32
    }
  };

  let mut mid = partition(indices, centroids, start, end, axis, split);
  if mid == start || mid == end {
    // Degenerate split (coincident centroids): halve the run instead.
    mid = start + count / 2;
  }

  let left = build_node(positions, indices, centroids, start, mid, depth + 1, options);
  let right = build_node(positions, indices, centroids, mid, end, depth + 1, options);
  BvhNode::Internal {
    bounds,
    axis: axis as u8,
    left: Box::new(left),
    right: Box::new(right),
  }
}

/// Build synchronously on the calling thread with the default builder.
///
/// The path for callers who do not need a pool: validates the geometry the
/// same way [`queue`](crate::pool::BvhPool::queue) does, installs a
/// sequential index when the geometry arrived non-indexed, and reorders the
/// index in place.
pub fn build_bvh(
  geometry: &mut GeometryBuffers,
  options: &BuildOptions,
) -> Result<Bvh, PoolError> {
  geometry.validate()?;
  geometry.ensure_index();

  let GeometryBuffers { positions, indices } = geometry;
  let (Attribute::Owned(positions), Some(Attribute::Owned(indices))) = (positions, indices)
  else {
    // validate() plus ensure_index() leave only owned buffers behind
    return Err(PoolError::Validation(
      crate::error::ValidationError::InterleavedAttribute {
        attribute: "position",
      },
    ));
  };

  let bvh = MedianSplitBuilder.build(positions, indices.as_mut_slice(), options)?;
  Ok(bvh)
}

#[cfg(test)]
#[path = "builder_test.rs"]
mod builder_test;
