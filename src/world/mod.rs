//! World data model: coordinates, blocks, chunks and the public facade

mod block;
mod chunk;
mod chunk_world;
mod position;

pub use block::{BiomeId, BlockId};
pub use chunk::{ChunkData, ChunkSection, EntityRef, GenerationStage, LodLevel};
pub use chunk_world::ChunkWorld;
pub use position::{
    BoundingBox, ChunkId, ChunkPos, ViewerPos, CHUNK_WIDTH, COLUMN_COUNT, SECTION_HEIGHT, SECTION_VOLUME,
};

pub(crate) use chunk::now_millis;
