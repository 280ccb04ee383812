//! Flat transfer encoding for built hierarchies.
//!
//! ```text
//!   Bvh (pointer tree)          SerializedBvh (flat, transferable)
//!
//!        I                      node_bounds  f32, 6 per node
//!       / \        serialize     [min.xyz max.xyz | ...]
//!      I   L      ──────────▶
//!     / \          deserialize  node_meta    u32, 3 per node
//!    L   L        ◀──────────    [leaf? | axis or tri count | left child
//!                                 or tri offset | ...]
//!
//!                               index        u32, reordered triangles
//! ```
//!
//! An internal node's children occupy an adjacent slot pair: the left child
//! sits at the stored offset, the right child immediately after it. Slots
//! are handed out parent-first, so a child offset is always strictly larger
//! than its parent's slot; decoding exploits that to rebuild bottom-up
//! without recursion.

use smallvec::SmallVec;

use crate::bvh::{Aabb, Bvh, BvhNode};
use crate::error::{TransferError, ValidationError};
use crate::types::{Attribute, GeometryBuffers};

/// Meta word 0 of a leaf slot.
const META_LEAF: u32 = 1;
/// Meta word 0 of an internal slot.
const META_INTERNAL: u32 = 0;

/// Flat, transferable form of a built hierarchy.
///
/// Immutable once produced. The index buffer is the input buffer after the
/// builder's in-place reordering, so deserializing with `rebind` restores a
/// geometry whose leaf runs line up.
#[derive(Clone, PartialEq)]
pub struct SerializedBvh {
  /// Six floats per node: min xyz, max xyz.
  pub node_bounds: Vec<f32>,
  /// Three words per node: leaf flag, split axis (internal) or triangle
  /// count (leaf), left child slot (internal) or first triangle (leaf).
  pub node_meta: Vec<u32>,
  /// Reordered triangle index buffer, three entries per triangle.
  pub index: Vec<u32>,
}

impl SerializedBvh {
  pub fn node_count(&self) -> usize {
    self.node_meta.len() / 3
  }

  pub fn triangle_count(&self) -> usize {
    self.index.len() / 3
  }
}

impl std::fmt::Debug for SerializedBvh {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SerializedBvh")
      .field("nodes", &self.node_count())
      .field("triangles", &self.triangle_count())
      .finish()
  }
}

/// Controls for [`deserialize`].
#[derive(Clone, Copy, Debug)]
pub struct DeserializeOptions {
  /// Run the structural checks (leaf ranges, reachability, coverage) and
  /// fail closed on any violation. Layout that cannot be materialized at
  /// all errors regardless of this flag.
  pub validate: bool,

  /// Install the reordered index buffer into the target geometry. Geometry
  /// that arrived non-indexed gains an index; without it the tree's leaf
  /// runs point at nothing.
  pub rebind: bool,
}

impl Default for DeserializeOptions {
  fn default() -> Self {
    Self {
      validate: true,
      rebind: true,
    }
  }
}

impl DeserializeOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_validate(mut self, validate: bool) -> Self {
    self.validate = validate;
    self
  }

  pub fn with_rebind(mut self, rebind: bool) -> Self {
    self.rebind = rebind;
    self
  }
}

/// Flatten a built tree together with the geometry's index buffer.
///
/// Rejects geometry whose attributes cannot travel (interleaved views, a
/// missing index) and tree/index pairs that disagree on triangle count. The
/// returned layout is canonical: decoding and re-encoding any valid
/// serialized tree reproduces it byte for byte.
pub fn serialize(bvh: &Bvh, geometry: &GeometryBuffers) -> Result<SerializedBvh, ValidationError> {
  if !geometry.positions.is_owned() {
    return Err(ValidationError::InterleavedAttribute {
      attribute: "position",
    });
  }
  let index = match &geometry.indices {
    Some(Attribute::Owned(data)) => data.clone(),
    Some(Attribute::InterleavedView { .. }) => {
      return Err(ValidationError::InterleavedAttribute { attribute: "index" })
    }
    None => return Err(ValidationError::MissingIndex),
  };

  let index_tris = (index.len() / 3) as u32;
  if bvh.triangle_count() != index_tris {
    return Err(ValidationError::TreeGeometryMismatch {
      tree_tris: bvh.triangle_count(),
      index_tris,
    });
  }

  Ok(flatten(bvh, index))
}

/// Flatten without cloning: the worker-side path, where the index buffer is
/// already owned and moves straight into the payload.
pub(crate) fn flatten(bvh: &Bvh, index: Vec<u32>) -> SerializedBvh {
  let node_count = bvh.node_count();
  let mut node_bounds = vec![0.0f32; node_count * 6];
  let mut node_meta = vec![0u32; node_count * 3];

  // Parent-first slot assignment; children always claim a fresh adjacent
  // pair, so child slots are strictly greater than the parent's.
  let mut allocated = 1;
  let mut stack: SmallVec<[(&BvhNode, usize); 32]> = SmallVec::new();
  stack.push((bvh.root(), 0));

  while let Some((node, slot)) = stack.pop() {
    let bounds = node.bounds();
    let at = slot * 6;
    node_bounds[at..at + 3].copy_from_slice(&bounds.min.to_array());
    node_bounds[at + 3..at + 6].copy_from_slice(&bounds.max.to_array());

    let at = slot * 3;
    match node {
      BvhNode::Leaf {
        tri_offset,
        tri_count,
        ..
      } => {
        node_meta[at] = META_LEAF;
        node_meta[at + 1] = *tri_count;
        node_meta[at + 2] = *tri_offset;
      }
      BvhNode::Internal {
        axis, left, right, ..
      } => {
        let child = allocated;
        allocated += 2;
        node_meta[at] = META_INTERNAL;
        node_meta[at + 1] = *axis as u32;
        node_meta[at + 2] = child as u32;
        stack.push((right, child + 1));
        stack.push((left, child));
      }
    }
  }

  SerializedBvh {
    node_bounds,
    node_meta,
    index,
  }
}

/// Reconstruct a tree from its flat form, bound to the caller's geometry.
///
/// Consumes the serialized payload; with `rebind` the index buffer moves
/// into `geometry` without a copy. Fails closed per
/// [`DeserializeOptions::validate`], and a failure leaves `geometry`
/// untouched.
pub fn deserialize(
  serialized: SerializedBvh,
  geometry: &mut GeometryBuffers,
  options: &DeserializeOptions,
) -> Result<Bvh, TransferError> {
  let bvh = reconstruct(&serialized, options.validate)?;
  if options.rebind {
    geometry.indices = Some(Attribute::Owned(serialized.index));
  }
  Ok(bvh)
}

/// Borrowing reconstruction: everything [`deserialize`] does except moving
/// the index buffer, so a caller that owns the payload keeps it on failure.
pub(crate) fn reconstruct(
  serialized: &SerializedBvh,
  validate: bool,
) -> Result<Bvh, TransferError> {
  let node_count = check_layout(serialized)?;
  if validate {
    validate_structure(serialized, node_count)?;
  }

  let mut built: Vec<Option<BvhNode>> = (0..node_count).map(|_| None).collect();
  let mut covered = 0u32;

  // Child slots sit strictly after their parent, so a reverse scan builds
  // every subtree before the node that owns it.
  for slot in (0..node_count).rev() {
    let bounds = slot_bounds(&serialized.node_bounds, slot);
    let meta = &serialized.node_meta[slot * 3..slot * 3 + 3];

    let node = if meta[0] == META_LEAF {
      covered = covered.saturating_add(meta[1]);
      BvhNode::Leaf {
        bounds,
        tri_count: meta[1],
        tri_offset: meta[2],
      }
    } else {
      let child = meta[2] as usize;
      if child + 1 >= node_count {
        return Err(TransferError::ChildOutOfRange {
          node: slot as u32,
          child: meta[2],
          total: node_count as u32,
        });
      }
      if child <= slot {
        return Err(TransferError::ChildNotForward {
          node: slot as u32,
          child: meta[2],
        });
      }
      let left = built[child].take().ok_or(TransferError::SharedNode {
        node: meta[2],
      })?;
      let right = built[child + 1].take().ok_or(TransferError::SharedNode {
        node: meta[2] + 1,
      })?;
      BvhNode::Internal {
        bounds,
        axis: meta[1] as u8,
        left: Box::new(left),
        right: Box::new(right),
      }
    };
    built[slot] = Some(node);
  }

  let root = built[0].take().ok_or(TransferError::SharedNode { node: 0 })?;
  if validate {
    let leftover = built.iter().filter(|slot| slot.is_some()).count();
    if leftover > 0 {
      return Err(TransferError::UnreachableNodes { count: leftover });
    }
  }

  Ok(Bvh::new(root, covered))
}

/// Array-length consistency; required before any slot can be read.
fn check_layout(serialized: &SerializedBvh) -> Result<usize, TransferError> {
  let meta_len = serialized.node_meta.len();
  let bounds_len = serialized.node_bounds.len();
  if meta_len % 3 != 0 || bounds_len != (meta_len / 3) * 6 {
    return Err(TransferError::LengthMismatch {
      bounds_len,
      meta_len,
    });
  }
  let node_count = meta_len / 3;
  if node_count == 0 {
    return Err(TransferError::Empty);
  }
  if serialized.index.len() % 3 != 0 {
    return Err(TransferError::MalformedIndex {
      len: serialized.index.len(),
    });
  }
  Ok(node_count)
}

/// Leaf-range and coverage checks. Reachability is enforced separately by
/// the reverse-scan reconstruction itself.
fn validate_structure(
  serialized: &SerializedBvh,
  node_count: usize,
) -> Result<(), TransferError> {
  let total_tris = (serialized.index.len() / 3) as u32;
  let mut covered = 0u64;

  for slot in 0..node_count {
    let meta = &serialized.node_meta[slot * 3..slot * 3 + 3];
    if meta[0] != META_LEAF {
      if meta[1] > 2 {
        return Err(TransferError::InvalidAxis {
          node: slot as u32,
          axis: meta[1],
        });
      }
      continue;
    }
    let count = meta[1];
    let offset = meta[2];
    if count == 0 {
      return Err(TransferError::EmptyLeaf { node: slot as u32 });
    }
    let end = offset as u64 + count as u64;
    if end > total_tris as u64 {
      return Err(TransferError::LeafRangeOutOfBounds {
        node: slot as u32,
        end: end.min(u32::MAX as u64) as u32,
        total: total_tris,
      });
    }
    covered += count as u64;
  }

  if covered != total_tris as u64 {
    return Err(TransferError::CoverageMismatch {
      covered: covered.min(u32::MAX as u64) as u32,
      expected: total_tris,
    });
  }
  Ok(())
}

#[inline]
fn slot_bounds(node_bounds: &[f32], slot: usize) -> Aabb {
  let at = slot * 6;
  Aabb::new(
    glam::Vec3A::new(node_bounds[at], node_bounds[at + 1], node_bounds[at + 2]),
    glam::Vec3A::new(
      node_bounds[at + 3],
      node_bounds[at + 4],
      node_bounds[at + 5],
    ),
  )
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;
