use super::*;
use crate::test_utils::{interleaved_geometry, quad_grid, tri_soup};

#[test]
fn test_build_options_defaults() {
  let options = BuildOptions::default();
  assert_eq!(options.strategy, SplitStrategy::Center);
  assert_eq!(options.max_depth, 40);
  assert_eq!(options.max_leaf_tris, 10);

  let options = BuildOptions::new()
    .with_strategy(SplitStrategy::Average)
    .with_max_depth(8)
    .with_max_leaf_tris(4);
  assert_eq!(options.strategy, SplitStrategy::Average);
  assert_eq!(options.max_depth, 8);
  assert_eq!(options.max_leaf_tris, 4);

  // A zero leaf size can never terminate; it clamps to 1.
  let options = BuildOptions::new().with_max_leaf_tris(0);
  assert_eq!(options.max_leaf_tris, 1);
}

#[test]
fn test_task_ids_are_monotonic() {
  let a = TaskId::next();
  let b = TaskId::next();
  assert!(b > a);
  assert!(b.value() > a.value());
}

#[test]
fn test_counts() {
  let geometry = quad_grid(3, 2);
  assert_eq!(geometry.vertex_count(), 12);
  assert_eq!(geometry.triangle_count(), 12);

  let geometry = tri_soup(5);
  assert_eq!(geometry.vertex_count(), 15);
  assert_eq!(geometry.triangle_count(), 5);
}

#[test]
fn test_validate_accepts_owned_geometry() {
  assert_eq!(quad_grid(2, 2).validate(), Ok(()));
  assert_eq!(tri_soup(3).validate(), Ok(()));
}

#[test]
fn test_validate_rejects_interleaved_views() {
  let geometry = interleaved_geometry();
  assert_eq!(
    geometry.validate(),
    Err(ValidationError::InterleavedAttribute {
      attribute: "position"
    })
  );

  // Owned positions with an interleaved index view.
  let mut geometry = tri_soup(2);
  geometry.indices = Some(Attribute::InterleavedView {
    backing: Arc::from(vec![0u32; 12].as_slice()),
    offset: 0,
    stride: 2,
    components: 1,
    count: 6,
  });
  assert_eq!(
    geometry.validate(),
    Err(ValidationError::InterleavedAttribute { attribute: "index" })
  );
}

#[test]
fn test_validate_rejects_malformed_shapes() {
  let geometry = GeometryBuffers::indexed(vec![0.0; 8], vec![0, 1, 2]);
  assert_eq!(
    geometry.validate(),
    Err(ValidationError::MalformedPositions { len: 8 })
  );

  let geometry = GeometryBuffers::indexed(vec![0.0; 9], vec![0, 1, 2, 0]);
  assert_eq!(
    geometry.validate(),
    Err(ValidationError::MalformedIndices { len: 4 })
  );

  // Non-indexed, 4 vertices: not a whole number of triangles.
  let geometry = GeometryBuffers::non_indexed(vec![0.0; 12]);
  assert_eq!(
    geometry.validate(),
    Err(ValidationError::MalformedVertexCount { count: 4 })
  );

  let geometry = GeometryBuffers::indexed(vec![0.0; 9], Vec::new());
  assert_eq!(geometry.validate(), Err(ValidationError::EmptyGeometry));
}

#[test]
fn test_into_transfer_parts_moves_owned_buffers() {
  let positions = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
  let indices = vec![0, 1, 2];
  let geometry = GeometryBuffers::indexed(positions.clone(), indices.clone());

  let (out_positions, out_indices) = geometry.into_transfer_parts().unwrap();
  assert_eq!(out_positions, positions);
  assert_eq!(out_indices, Some(indices));
}

#[test]
fn test_into_transfer_parts_returns_geometry_on_rejection() {
  let geometry = interleaved_geometry();
  let expected_len = geometry.positions.len();

  let (error, returned) = geometry.into_transfer_parts().unwrap_err();
  assert_eq!(
    error,
    ValidationError::InterleavedAttribute {
      attribute: "position"
    }
  );
  // The rejected geometry comes back with its view intact.
  assert!(!returned.positions.is_owned());
  assert_eq!(returned.positions.len(), expected_len);
}

#[test]
fn test_gather_deinterleaves() {
  let geometry = interleaved_geometry();
  let gathered = geometry.positions.gather();
  assert_eq!(gathered.len(), 18);
  for vertex in 0..6 {
    assert_eq!(
      &gathered[vertex * 3..vertex * 3 + 3],
      &[vertex as f32, 0.0, 0.0]
    );
  }
}

#[test]
fn test_to_owned_buffers_makes_geometry_transferable() {
  let geometry = interleaved_geometry();
  assert!(geometry.validate().is_err());

  let owned = geometry.to_owned_buffers();
  assert!(owned.positions.is_owned());
  assert_eq!(owned.validate(), Ok(()));
  assert_eq!(owned.positions.len(), geometry.positions.len());
}

#[test]
fn test_ensure_index_installs_sequential_index() {
  let mut geometry = tri_soup(2);
  assert!(geometry.indices.is_none());

  geometry.ensure_index();
  match &geometry.indices {
    Some(Attribute::Owned(indices)) => assert_eq!(indices, &[0, 1, 2, 3, 4, 5]),
    other => panic!("expected owned sequential index, got {other:?}"),
  }

  // Already indexed geometry is left alone.
  let mut geometry = GeometryBuffers::indexed(vec![0.0; 9], vec![2, 1, 0]);
  geometry.ensure_index();
  match &geometry.indices {
    Some(Attribute::Owned(indices)) => assert_eq!(indices, &[2, 1, 0]),
    other => panic!("expected original index, got {other:?}"),
  }
}
