//! Chunk generation: the generator collaborator interface and the
//! coordinator that drives chunks through the stage pipeline.

mod cancel;
mod coordinator;
mod flat;

pub use cancel::CancelToken;
pub use coordinator::{GenerationCoordinator, GenerationHandle, GenerationStats};
pub use flat::FlatGenerator;

use futures::future::BoxFuture;

use crate::world::{BiomeId, BlockId, ChunkPos, EntityRef, GenerationStage};

/// Procedural content source, invoked once per stage per chunk
pub trait WorldGenerator: Send + Sync {
    fn generate_stage(
        &self,
        pos: ChunkPos,
        stage: GenerationStage,
        seed: u64,
    ) -> BoxFuture<'_, Result<RawStageData, GeneratorError>>;
}

/// Errors reported by a [`WorldGenerator`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeneratorError {
    #[error("stage {stage} failed for chunk {pos}: {message}")]
    StageFailed {
        pos: ChunkPos,
        stage: GenerationStage,
        message: String,
    },

    #[error("generator unavailable: {0}")]
    Unavailable(String),
}

/// Replace a whole section's block array
#[derive(Debug, Clone, PartialEq)]
pub struct SectionFill {
    pub section: usize,
    pub blocks: Vec<BlockId>,
}

/// Set a single block, chunk-local coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockEdit {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub block: BlockId,
}

/// Output of one generator stage, applied in field order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStageData {
    pub section_fills: Vec<SectionFill>,
    pub edits: Vec<BlockEdit>,
    /// `(section index, one biome per column)`
    pub biomes: Vec<(usize, Vec<BiomeId>)>,
    pub entities: Vec<EntityRef>,
    pub block_entities: Vec<EntityRef>,
}
