//! bvh_pool - Background construction of bounding volume hierarchies
//!
//! This crate moves the expensive part of spatial-index construction off
//! the caller's thread: triangle geometry is handed to a bounded pool of
//! workers, built into a BVH there, flattened into a transferable form, and
//! handed back reconstructed. Buffer ownership moves with the task in both
//! directions, so no copy and no lock ever touches the geometry.
//!
//! # Features
//!
//! - **Move-based transfer**: submission consumes the buffers; settlement
//!   returns them with the index reordered to match the tree's leaf runs
//! - **Strict FIFO dispatch** onto dedicated single-threaded workers, with
//!   unordered completion surfaced through per-task handles
//! - **Pluggable construction**: the pool runs any [`BvhBuilder`];
//!   [`MedianSplitBuilder`] (center/average split) is bundled
//! - **Crash containment**: a panicking builder fails one task and returns
//!   its buffers; a crashed worker thread is respawned in place
//!
//! # Example
//!
//! ```ignore
//! use bvh_pool::{BvhPool, BuildOptions, GeometryBuffers};
//!
//! let pool = BvhPool::new();
//!
//! let geometry = GeometryBuffers::indexed(positions, indices);
//! let task = pool.queue(geometry, BuildOptions::default())?;
//!
//! // ...do other work, then take the result.
//! let built = task.wait().expect("build failed");
//! println!("{} nodes over {} triangles",
//!     built.bvh.node_count(), built.bvh.triangle_count());
//!
//! // built.geometry is the submitted geometry, index reordered in place.
//! pool.terminate(false).wait();
//! ```

pub mod types;
pub use types::{Attribute, BuildOptions, GeometryBuffers, SplitStrategy, TaskId};

// Error taxonomy shared by every stage
pub mod error;
pub use error::{BuildError, PoolError, QueueError, TransferError, ValidationError};

// The in-memory tree and its construction seam
pub mod builder;
pub mod bvh;
pub use builder::{build_bvh, BvhBuilder, MedianSplitBuilder};
pub use bvh::{Aabb, Bvh, BvhNode};

// Flat transfer encoding
pub mod codec;
pub use codec::{deserialize, serialize, DeserializeOptions, SerializedBvh};

// The worker pool itself
pub mod pool;
pub use pool::{
  BuiltBvh, BvhPool, PoolConfig, PoolStats, Signal, Task, TaskFailure, TaskResult, TaskStatus,
  WorkerStats,
};

// Engine-agnostic metrics collection
pub mod metrics;

#[cfg(test)]
mod test_utils;
