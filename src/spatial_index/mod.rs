//! Spatial index over loaded chunk coordinates
//!
//! An arena octree guarded by a `parking_lot::RwLock`: queries share the
//! read lock, membership changes take the write lock. Only `insert` and
//! `remove` change membership.

mod octree;

pub use octree::Octree;

use parking_lot::RwLock;

use crate::config::{SpatialConfig, WorldConfig};
use crate::world::{BoundingBox, ChunkPos, CHUNK_WIDTH};

/// Structural errors from the index. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpatialIndexError {
    #[error("octree depth limit {depth} reached with no room in the leaf")]
    DepthExceeded { depth: u32 },

    #[error("chunk {pos} lies outside the indexed world bounds")]
    OutOfBounds { pos: ChunkPos },
}

/// Thread-safe octree of loaded chunk coordinates
pub struct SpatialIndex {
    tree: RwLock<Octree>,
}

impl SpatialIndex {
    /// Index covering every chunk within `world.max_chunk_coord` of the origin
    pub fn new(config: &SpatialConfig, world: &WorldConfig) -> Self {
        let extent = (world.max_chunk_coord as f64 + 1.0) * CHUNK_WIDTH as f64;
        let bounds = BoundingBox::new([-extent; 3], [extent; 3]);
        Self {
            tree: RwLock::new(Octree::new(bounds, config.max_depth, config.node_capacity)),
        }
    }

    pub fn insert(&self, pos: ChunkPos) -> Result<bool, SpatialIndexError> {
        self.tree.write().insert(pos)
    }

    pub fn remove(&self, pos: ChunkPos) -> bool {
        self.tree.write().remove(pos)
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.tree.read().contains(pos)
    }

    pub fn query_range(&self, bbox: &BoundingBox) -> Vec<ChunkPos> {
        self.tree.read().query_range(bbox)
    }

    /// Chebyshev radius query, in chunks
    pub fn query_radius(&self, center: ChunkPos, radius: u32) -> Vec<ChunkPos> {
        self.tree.read().query_radius(center, radius)
    }

    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }
}
