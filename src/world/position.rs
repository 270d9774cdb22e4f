use serde::{Serialize, Deserialize};
use std::fmt;

/// Width of a chunk along x and z, in blocks
pub const CHUNK_WIDTH: i32 = 16;

/// Height of one vertical section, in blocks
pub const SECTION_HEIGHT: i32 = 16;

/// Number of blocks in one vertical section
pub const SECTION_VOLUME: usize = (CHUNK_WIDTH * CHUNK_WIDTH * SECTION_HEIGHT) as usize;

/// Number of block columns in a chunk
pub const COLUMN_COUNT: usize = (CHUNK_WIDTH * CHUNK_WIDTH) as usize;

/// Position of a chunk in the world (chunk coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Create a new chunk position offset by the given amounts
    pub fn offset(&self, dx: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.z + dz)
    }

    /// Chebyshev (square ring) distance in chunks
    pub fn chebyshev_distance(&self, other: ChunkPos) -> u32 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dz = (self.z as i64 - other.z as i64).unsigned_abs();
        dx.max(dz).min(u32::MAX as u64) as u32
    }

    /// Squared euclidean distance in chunks
    pub fn distance_squared_to(&self, other: ChunkPos) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dz = self.z as i64 - other.z as i64;
        dx.saturating_mul(dx).saturating_add(dz.saturating_mul(dz))
    }

    /// World-space origin of the chunk (its minimum x/z corner at y = 0)
    pub fn world_origin(&self) -> [f64; 3] {
        [
            self.x as f64 * CHUNK_WIDTH as f64,
            0.0,
            self.z as f64 * CHUNK_WIDTH as f64,
        ]
    }

    /// Map key form, `"{x}_{z}"`
    pub fn id(&self) -> ChunkId {
        ChunkId::from(*self)
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Opaque string key derived from a [`ChunkPos`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the coordinate from a `"{x}_{z}"` key
    pub fn parse(key: &str) -> Option<ChunkPos> {
        let (x, z) = key.split_once('_')?;
        Some(ChunkPos::new(x.parse().ok()?, z.parse().ok()?))
    }
}

impl From<ChunkPos> for ChunkId {
    fn from(pos: ChunkPos) -> Self {
        ChunkId(format!("{}_{}", pos.x, pos.z))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Viewer position in world units (blocks)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewerPos {
    pub x: f64,
    pub z: f64,
}

impl ViewerPos {
    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    /// Get the chunk this position falls in
    pub fn to_chunk_pos(&self) -> ChunkPos {
        ChunkPos::new(
            (self.x / CHUNK_WIDTH as f64).floor() as i32,
            (self.z / CHUNK_WIDTH as f64).floor() as i32,
        )
    }

    /// Position at the center of a chunk
    pub fn center_of(pos: ChunkPos) -> Self {
        let half = CHUNK_WIDTH as f64 / 2.0;
        let origin = pos.world_origin();
        Self::new(origin[0] + half, origin[2] + half)
    }
}

/// Axis-aligned box in world units, closed on both ends
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// Box covering the origins of every chunk within `radius` (Chebyshev) of `center`
    pub fn around_chunk(center: ChunkPos, radius: u32) -> Self {
        let r = radius as f64 * CHUNK_WIDTH as f64;
        let origin = center.world_origin();
        Self {
            min: [origin[0] - r, f64::MIN, origin[2] - r],
            max: [origin[0] + r, f64::MAX, origin[2] + r],
        }
    }

    pub fn contains(&self, point: [f64; 3]) -> bool {
        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.max[axis] && self.max[axis] >= other.min[axis])
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }
}
