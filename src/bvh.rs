//! In-memory bounding volume hierarchy.
//!
//! A [`Bvh`] is what a builder produces and what the transfer codec
//! reconstructs on the receiving side. Internal nodes own their children;
//! leaves reference a contiguous run of the reordered triangle index buffer.

use glam::Vec3A;
use smallvec::SmallVec;

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
  pub min: Vec3A,
  pub max: Vec3A,
}

impl Aabb {
  /// Box with inverted extents, ready for encapsulation.
  pub fn empty() -> Self {
    Self {
      min: Vec3A::splat(f32::INFINITY),
      max: Vec3A::splat(f32::NEG_INFINITY),
    }
  }

  pub fn new(min: Vec3A, max: Vec3A) -> Self {
    Self { min, max }
  }

  /// Expand to include a point.
  #[inline]
  pub fn encapsulate(&mut self, point: Vec3A) {
    self.min = self.min.min(point);
    self.max = self.max.max(point);
  }

  /// Expand to include another box.
  #[inline]
  pub fn union(&mut self, other: &Aabb) {
    self.min = self.min.min(other.min);
    self.max = self.max.max(other.max);
  }

  pub fn center(&self) -> Vec3A {
    (self.min + self.max) * 0.5
  }

  pub fn size(&self) -> Vec3A {
    self.max - self.min
  }

  /// Index of the longest axis (0 = x, 1 = y, 2 = z).
  pub fn longest_axis(&self) -> usize {
    let size = self.size();
    if size.x >= size.y && size.x >= size.z {
      0
    } else if size.y >= size.z {
      1
    } else {
      2
    }
  }

  /// True when min <= max on all axes.
  pub fn is_valid(&self) -> bool {
    self.min.cmple(self.max).all()
  }

  /// True when `other` lies entirely inside this box.
  pub fn contains(&self, other: &Aabb) -> bool {
    self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
  }
}

impl Default for Aabb {
  fn default() -> Self {
    Self::empty()
  }
}

/// A single hierarchy node.
#[derive(Clone, Debug, PartialEq)]
pub enum BvhNode {
  Internal {
    bounds: Aabb,
    /// Axis the children were partitioned along (0 = x, 1 = y, 2 = z).
    axis: u8,
    left: Box<BvhNode>,
    right: Box<BvhNode>,
  },
  Leaf {
    bounds: Aabb,
    /// First triangle of the leaf's run in the reordered index buffer.
    tri_offset: u32,
    /// Triangles in the run.
    tri_count: u32,
  },
}

impl BvhNode {
  pub fn bounds(&self) -> &Aabb {
    match self {
      BvhNode::Internal { bounds, .. } => bounds,
      BvhNode::Leaf { bounds, .. } => bounds,
    }
  }

  pub fn is_leaf(&self) -> bool {
    matches!(self, BvhNode::Leaf { .. })
  }
}

/// A built hierarchy over one geometry's triangles.
#[derive(Clone, Debug, PartialEq)]
pub struct Bvh {
  root: BvhNode,
  triangle_count: u32,
}

impl Bvh {
  pub(crate) fn new(root: BvhNode, triangle_count: u32) -> Self {
    Self {
      root,
      triangle_count,
    }
  }

  pub fn root(&self) -> &BvhNode {
    &self.root
  }

  /// Bounds of the whole tree.
  pub fn bounds(&self) -> &Aabb {
    self.root.bounds()
  }

  /// Total triangles covered by leaf runs.
  pub fn triangle_count(&self) -> u32 {
    self.triangle_count
  }

  /// Total nodes, internal and leaf.
  pub fn node_count(&self) -> usize {
    let mut count = 0;
    self.for_each_node(|_| count += 1);
    count
  }

  /// Longest root-to-leaf path, in nodes.
  pub fn depth(&self) -> usize {
    let mut max_depth = 0;
    let mut stack: SmallVec<[(&BvhNode, usize); 32]> = SmallVec::new();
    stack.push((&self.root, 1));
    while let Some((node, depth)) = stack.pop() {
      max_depth = max_depth.max(depth);
      if let BvhNode::Internal { left, right, .. } = node {
        stack.push((left, depth + 1));
        stack.push((right, depth + 1));
      }
    }
    max_depth
  }

  /// Visit every node in depth-first order, left before right.
  pub fn for_each_node(&self, mut visit: impl FnMut(&BvhNode)) {
    let mut stack: SmallVec<[&BvhNode; 32]> = SmallVec::new();
    stack.push(&self.root);
    while let Some(node) = stack.pop() {
      visit(node);
      if let BvhNode::Internal { left, right, .. } = node {
        stack.push(right);
        stack.push(left);
      }
    }
  }

  /// Visit every leaf's triangle run as `(tri_offset, tri_count)`.
  pub fn for_each_leaf(&self, mut visit: impl FnMut(u32, u32, &Aabb)) {
    self.for_each_node(|node| {
      if let BvhNode::Leaf {
        bounds,
        tri_offset,
        tri_count,
      } = node
      {
        visit(*tri_offset, *tri_count, bounds);
      }
    });
  }
}
