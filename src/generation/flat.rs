use futures::future::BoxFuture;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hash::{Hash, Hasher};
use std::time::Duration;

use super::{BlockEdit, GeneratorError, RawStageData, SectionFill, WorldGenerator};
use crate::world::{
    BiomeId, BlockId, ChunkPos, ChunkSection, GenerationStage, CHUNK_WIDTH, COLUMN_COUNT, SECTION_HEIGHT,
    SECTION_VOLUME,
};

/// Deterministic layered terrain: bedrock, stone, dirt and a grass top,
/// with seeded plant scatter on the surface.
#[derive(Debug, Clone)]
pub struct FlatGenerator {
    surface_height: u32,
    decorations_per_chunk: u32,
    stage_delay: Option<Duration>,
}

impl FlatGenerator {
    pub fn new(surface_height: u32) -> Self {
        Self {
            surface_height: surface_height.max(4),
            decorations_per_chunk: 12,
            stage_delay: None,
        }
    }

    /// Sleep this long in every stage, to simulate an I/O-bound generator
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = Some(delay);
        self
    }

    pub fn with_decorations(mut self, per_chunk: u32) -> Self {
        self.decorations_per_chunk = per_chunk;
        self
    }

    pub fn surface_height(&self) -> u32 {
        self.surface_height
    }

    fn structure(&self) -> RawStageData {
        let stone_top = self.surface_height - 3;
        let section_count = stone_top.div_ceil(SECTION_HEIGHT as u32) as usize;
        let section_fills = (0..section_count)
            .map(|section| {
                let mut blocks = vec![BlockId::AIR; SECTION_VOLUME];
                let base_y = section as u32 * SECTION_HEIGHT as u32;
                for y in 0..SECTION_HEIGHT as u32 {
                    let block = match base_y + y {
                        0 => BlockId::BEDROCK,
                        world_y if world_y < stone_top => BlockId::STONE,
                        _ => continue,
                    };
                    let layer = ChunkSection::index(0, y, 0);
                    blocks[layer..layer + COLUMN_COUNT].fill(block);
                }
                SectionFill { section, blocks }
            })
            .collect();
        RawStageData { section_fills, ..Default::default() }
    }

    fn surface(&self, pos: ChunkPos) -> RawStageData {
        let top = self.surface_height - 1;
        let mut edits = Vec::with_capacity(COLUMN_COUNT * 3);
        for z in 0..CHUNK_WIDTH as u32 {
            for x in 0..CHUNK_WIDTH as u32 {
                edits.push(BlockEdit { x, y: top - 2, z, block: BlockId::DIRT });
                edits.push(BlockEdit { x, y: top - 1, z, block: BlockId::DIRT });
                edits.push(BlockEdit { x, y: top, z, block: BlockId::GRASS });
            }
        }

        let biome = match (pos.x.rem_euclid(3), pos.z.rem_euclid(2)) {
            (0, _) => BiomeId::PLAINS,
            (1, 0) => BiomeId::FOREST,
            _ => BiomeId::DESERT,
        };
        let surface_section = (top / SECTION_HEIGHT as u32) as usize;
        RawStageData {
            edits,
            biomes: vec![(surface_section, vec![biome; COLUMN_COUNT])],
            ..Default::default()
        }
    }

    fn decoration(&self, pos: ChunkPos, seed: u64) -> RawStageData {
        let mut rng = StdRng::seed_from_u64(chunk_seed(pos, seed));
        let edits = (0..self.decorations_per_chunk)
            .map(|_| {
                let block = match rng.gen_range(0..3) {
                    0 => BlockId::TALL_GRASS,
                    1 => BlockId::FLOWER_RED,
                    _ => BlockId::FLOWER_YELLOW,
                };
                BlockEdit {
                    x: rng.gen_range(0..CHUNK_WIDTH as u32),
                    y: self.surface_height,
                    z: rng.gen_range(0..CHUNK_WIDTH as u32),
                    block,
                }
            })
            .collect();
        RawStageData { edits, ..Default::default() }
    }
}

impl Default for FlatGenerator {
    fn default() -> Self {
        Self::new(64)
    }
}

impl WorldGenerator for FlatGenerator {
    fn generate_stage(
        &self,
        pos: ChunkPos,
        stage: GenerationStage,
        seed: u64,
    ) -> BoxFuture<'_, Result<RawStageData, GeneratorError>> {
        async move {
            if let Some(delay) = self.stage_delay {
                tokio::time::sleep(delay).await;
            }
            match stage {
                GenerationStage::Structure => Ok(self.structure()),
                GenerationStage::Surface => Ok(self.surface(pos)),
                GenerationStage::Decoration => Ok(self.decoration(pos, seed)),
                GenerationStage::Complete => Ok(RawStageData::default()),
                GenerationStage::Empty | GenerationStage::Unloaded => Err(GeneratorError::StageFailed {
                    pos,
                    stage,
                    message: "not a generation stage".to_string(),
                }),
            }
        }
        .boxed()
    }
}

fn chunk_seed(pos: ChunkPos, seed: u64) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    (pos.x, pos.z, seed).hash(&mut hasher);
    hasher.finish()
}
