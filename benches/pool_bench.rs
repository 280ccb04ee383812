//! Benchmarks for the build pipeline: the split builder in isolation, the
//! transfer codec, and pooled batch throughput against a single-threaded
//! baseline.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bvh_pool::{
  build_bvh, deserialize, serialize, Attribute, BuildOptions, BvhBuilder, BvhPool,
  DeserializeOptions, GeometryBuffers, MedianSplitBuilder, PoolConfig, SplitStrategy,
};

// =============================================================================
// Fixtures
// =============================================================================

/// Indexed grid of `nx * ny` quads (two triangles each) in the xy plane.
fn quad_grid(nx: u32, ny: u32) -> GeometryBuffers {
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

/// Non-indexed soup of `count` triangles scattered in a cloud.
///
/// Randomized centroids keep the splits from landing on the perfectly
/// regular planes a grid produces.
fn jittered_soup(count: u32, rng: &mut StdRng) -> GeometryBuffers {
  let mut positions = Vec::with_capacity(count as usize * 9);
  for _ in 0..count {
    let cx: f32 = rng.random_range(-10.0..10.0);
    let cy: f32 = rng.random_range(-10.0..10.0);
    let cz: f32 = rng.random_range(-10.0..10.0);
    for _ in 0..3 {
      positions.push(cx + rng.random_range(-0.5..0.5));
      positions.push(cy + rng.random_range(-0.5..0.5));
      positions.push(cz + rng.random_range(-0.5..0.5));
    }
  }
  GeometryBuffers::non_indexed(positions)
}

/// Grid dimensions for the size sweep: `grid(n)` has `2 * n * n` triangles.
const GRID_SIZES: [u32; 3] = [8, 32, 128];

// =============================================================================
// Isolated stages
// =============================================================================

/// Benchmark the median split builder on its own, both strategies.
fn bench_builder_isolated(c: &mut Criterion) {
  let mut group = c.benchmark_group("builder/split");

  for &n in &GRID_SIZES {
    let triangles = 2 * n * n;
    let GeometryBuffers { positions, indices } = quad_grid(n, n);
    let (Attribute::Owned(positions), Some(Attribute::Owned(indices))) = (positions, indices)
    else {
      unreachable!()
    };

    for (name, strategy) in [
      ("center", SplitStrategy::Center),
      ("average", SplitStrategy::Average),
    ] {
      let options = BuildOptions::new().with_strategy(strategy);
      group.bench_with_input(BenchmarkId::new(name, triangles), &triangles, |b, _| {
        b.iter(|| {
          // build reorders the index in place, so each pass gets a fresh copy
          let mut indices = indices.clone();
          let bvh = MedianSplitBuilder
            .build(&positions, &mut indices, &options)
            .unwrap();
          black_box(bvh)
        })
      });
    }
  }

  group.finish();
}

/// Benchmark flattening a finished tree and materializing it back.
fn bench_codec_isolated(c: &mut Criterion) {
  let mut group = c.benchmark_group("codec/transfer");

  for &n in &GRID_SIZES {
    let triangles = 2 * n * n;
    let mut geometry = quad_grid(n, n);
    let bvh = build_bvh(&mut geometry, &BuildOptions::new()).unwrap();
    let payload = serialize(&bvh, &geometry).unwrap();

    group.bench_with_input(
      BenchmarkId::new("serialize", triangles),
      &triangles,
      |b, _| {
        b.iter(|| {
          let serialized = serialize(&bvh, &geometry).unwrap();
          black_box(serialized)
        })
      },
    );

    for (name, options) in [
      ("deserialize_validated", DeserializeOptions::new()),
      (
        "deserialize_trusted",
        DeserializeOptions::new().with_validate(false),
      ),
    ] {
      let mut target = geometry.clone();
      group.bench_with_input(BenchmarkId::new(name, triangles), &triangles, |b, _| {
        b.iter(|| {
          let bvh = deserialize(payload.clone(), &mut target, &options).unwrap();
          black_box(bvh)
        })
      });
    }
  }

  group.finish();
}

// =============================================================================
// End-to-end throughput
// =============================================================================

/// Benchmark pooled batch builds against building the same batch inline.
///
/// Each batch is a set of 2048-triangle soups. The pooled arm queues the
/// whole batch and waits for every task; the direct arm runs the same
/// builds sequentially on the calling thread.
fn bench_pool_batch(c: &mut Criterion) {
  let mut group = c.benchmark_group("pool/batch");
  group.sample_size(20);

  let mut rng = StdRng::seed_from_u64(0x5EED);
  let meshes: Vec<GeometryBuffers> = (0..64).map(|_| jittered_soup(2048, &mut rng)).collect();
  let options = BuildOptions::new();

  let pool = BvhPool::with_config(
    PoolConfig::new()
      .with_workers(4)
      .with_thread_name_prefix("bench-worker"),
  );

  for &batch_size in &[4usize, 16, 64] {
    group.bench_with_input(
      BenchmarkId::new("pooled", batch_size),
      &batch_size,
      |b, _| {
        b.iter(|| {
          let tasks: Vec<_> = meshes[..batch_size]
            .iter()
            .map(|mesh| pool.queue(mesh.clone(), options).unwrap())
            .collect();
          let built: Vec<_> = tasks.into_iter().map(|task| task.wait().unwrap()).collect();
          black_box(built)
        })
      },
    );

    group.bench_with_input(
      BenchmarkId::new("direct", batch_size),
      &batch_size,
      |b, _| {
        b.iter(|| {
          let built: Vec<_> = meshes[..batch_size]
            .iter()
            .map(|mesh| {
              let mut mesh = mesh.clone();
              let bvh = build_bvh(&mut mesh, &options).unwrap();
              (bvh, mesh)
            })
            .collect();
          black_box(built)
        })
      },
    );
  }

  pool.terminate(false).wait();
  group.finish();
}

criterion_group!(isolated, bench_builder_isolated, bench_codec_isolated);
criterion_group!(throughput, bench_pool_batch);

criterion_main!(isolated, throughput);
