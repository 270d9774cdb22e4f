use serde::{Serialize, Deserialize};
use std::fmt;

use crate::error::{ChunkError, ChunkResult};
use crate::generation::RawStageData;
use super::{BiomeId, BlockId, ChunkPos, CHUNK_WIDTH, COLUMN_COUNT, SECTION_HEIGHT, SECTION_VOLUME};

/// Ordered generation phases of a chunk.
///
/// `Unloaded` is terminal and may be entered from any stage; every other
/// transition goes through [`GenerationStage::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GenerationStage {
    Empty,
    Structure,
    Surface,
    Decoration,
    Complete,
    Unloaded,
}

impl GenerationStage {
    /// Stages the generator is invoked for, in order
    pub const PIPELINE: [GenerationStage; 4] = [
        GenerationStage::Structure,
        GenerationStage::Surface,
        GenerationStage::Decoration,
        GenerationStage::Complete,
    ];

    pub fn next(self) -> Option<GenerationStage> {
        match self {
            GenerationStage::Empty => Some(GenerationStage::Structure),
            GenerationStage::Structure => Some(GenerationStage::Surface),
            GenerationStage::Surface => Some(GenerationStage::Decoration),
            GenerationStage::Decoration => Some(GenerationStage::Complete),
            GenerationStage::Complete | GenerationStage::Unloaded => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<GenerationStage> {
        match value {
            0 => Some(GenerationStage::Empty),
            1 => Some(GenerationStage::Structure),
            2 => Some(GenerationStage::Surface),
            3 => Some(GenerationStage::Decoration),
            4 => Some(GenerationStage::Complete),
            5 => Some(GenerationStage::Unloaded),
            _ => None,
        }
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Level of detail, 0 (full detail) through 4 (coarsest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct LodLevel(u8);

impl LodLevel {
    pub const HIGHEST: LodLevel = LodLevel(0);
    pub const LOWEST: LodLevel = LodLevel(4);

    pub fn new(level: u8) -> Option<LodLevel> {
        (level <= Self::LOWEST.0).then_some(LodLevel(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for LodLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        LodLevel::new(value).ok_or_else(|| format!("LOD level {} is out of range 0..=4", value))
    }
}

impl From<LodLevel> for u8 {
    fn from(level: LodLevel) -> u8 {
        level.0
    }
}

/// Reference to an entity or block entity owned elsewhere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef(pub u64);

/// One 16x16x16 vertical slice of a chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSection {
    pub blocks: Vec<BlockId>,
    pub block_light: Vec<u8>,
    pub sky_light: Vec<u8>,
    /// One biome per block column
    pub biomes: Vec<BiomeId>,
}

impl ChunkSection {
    pub fn new() -> Self {
        Self {
            blocks: vec![BlockId::AIR; SECTION_VOLUME],
            block_light: vec![0; SECTION_VOLUME],
            sky_light: vec![0; SECTION_VOLUME],
            biomes: vec![BiomeId::PLAINS; COLUMN_COUNT],
        }
    }

    /// Layer-major index so horizontal runs stay contiguous
    pub fn index(x: u32, y: u32, z: u32) -> usize {
        debug_assert!(x < CHUNK_WIDTH as u32 && y < SECTION_HEIGHT as u32 && z < CHUNK_WIDTH as u32);
        (x + z * CHUNK_WIDTH as u32 + y * (CHUNK_WIDTH * CHUNK_WIDTH) as u32) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| *b == BlockId::AIR)
    }
}

impl Default for ChunkSection {
    fn default() -> Self {
        Self::new()
    }
}

/// A chunk: vertical sections plus bookkeeping for the streaming subsystem
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    position: ChunkPos,
    sections: Vec<ChunkSection>,
    height_map: Vec<u16>,
    entities: Vec<EntityRef>,
    block_entities: Vec<EntityRef>,
    /// Unix milliseconds of the last mutation
    last_modified: i64,
    dirty: bool,
    stage: GenerationStage,
    lod: LodLevel,
}

impl ChunkData {
    pub fn new(position: ChunkPos, section_count: usize) -> Self {
        Self {
            position,
            sections: (0..section_count).map(|_| ChunkSection::new()).collect(),
            height_map: vec![0; COLUMN_COUNT],
            entities: Vec::new(),
            block_entities: Vec::new(),
            last_modified: now_millis(),
            dirty: false,
            stage: GenerationStage::Empty,
            lod: LodLevel::HIGHEST,
        }
    }

    /// Rebuild a chunk from its serialized parts
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        position: ChunkPos,
        stage: GenerationStage,
        last_modified: i64,
        sections: Vec<ChunkSection>,
        height_map: Vec<u16>,
        entities: Vec<EntityRef>,
        block_entities: Vec<EntityRef>,
    ) -> Self {
        Self {
            position,
            sections,
            height_map,
            entities,
            block_entities,
            last_modified,
            dirty: false,
            stage,
            lod: LodLevel::HIGHEST,
        }
    }

    pub fn position(&self) -> ChunkPos {
        self.position
    }

    pub fn stage(&self) -> GenerationStage {
        self.stage
    }

    pub fn lod(&self) -> LodLevel {
        self.lod
    }

    /// LOD is a view property; it does not dirty the chunk
    pub fn set_lod(&mut self, lod: LodLevel) {
        self.lod = lod;
    }

    pub fn sections(&self) -> &[ChunkSection] {
        &self.sections
    }

    pub fn height_map(&self) -> &[u16] {
        &self.height_map
    }

    pub fn entities(&self) -> &[EntityRef] {
        &self.entities
    }

    pub fn block_entities(&self) -> &[EntityRef] {
        &self.block_entities
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.last_modified = now_millis();
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Total height in blocks
    pub fn height(&self) -> u32 {
        (self.sections.len() as i32 * SECTION_HEIGHT) as u32
    }

    /// Get block at chunk-local position; out of range reads as air
    pub fn get_block(&self, x: u32, y: u32, z: u32) -> BlockId {
        if x >= CHUNK_WIDTH as u32 || z >= CHUNK_WIDTH as u32 || y >= self.height() {
            return BlockId::AIR;
        }
        let section = (y / SECTION_HEIGHT as u32) as usize;
        let local_y = y % SECTION_HEIGHT as u32;
        self.sections
            .get(section)
            .and_then(|s| s.blocks.get(ChunkSection::index(x, local_y, z)).copied())
            .unwrap_or(BlockId::AIR)
    }

    /// External edit: set block and mark dirty. Returns false when out of range.
    pub fn set_block(&mut self, x: u32, y: u32, z: u32, block: BlockId) -> bool {
        if !self.write_block(x, y, z, block) {
            return false;
        }
        self.update_column_height(x, z);
        self.mark_dirty();
        true
    }

    fn write_block(&mut self, x: u32, y: u32, z: u32, block: BlockId) -> bool {
        if x >= CHUNK_WIDTH as u32 || z >= CHUNK_WIDTH as u32 || y >= self.height() {
            return false;
        }
        let section = (y / SECTION_HEIGHT as u32) as usize;
        let local_y = y % SECTION_HEIGHT as u32;
        match self.sections.get_mut(section) {
            Some(s) => {
                s.blocks[ChunkSection::index(x, local_y, z)] = block;
                true
            }
            None => false,
        }
    }

    /// Height of the highest opaque block in a column plus one (0 for an empty column)
    pub fn height_at(&self, x: u32, z: u32) -> u16 {
        if x >= CHUNK_WIDTH as u32 || z >= CHUNK_WIDTH as u32 {
            return 0;
        }
        self.height_map[(x + z * CHUNK_WIDTH as u32) as usize]
    }

    /// Apply one generator stage and advance to it.
    ///
    /// `stage` must be the direct successor of the current stage.
    pub fn apply_stage(&mut self, stage: GenerationStage, raw: RawStageData) -> ChunkResult<()> {
        if self.stage.next() != Some(stage) {
            return Err(ChunkError::InvalidStageTransition {
                pos: self.position,
                from: self.stage,
                to: stage,
            });
        }

        for fill in raw.section_fills {
            if let Some(section) = self.sections.get_mut(fill.section) {
                if fill.blocks.len() == SECTION_VOLUME {
                    section.blocks = fill.blocks;
                } else {
                    log::warn!(
                        "[ChunkData] Ignoring section fill of {} blocks for {} section {}",
                        fill.blocks.len(), self.position, fill.section
                    );
                }
            }
        }
        for edit in raw.edits {
            self.write_block(edit.x, edit.y, edit.z, edit.block);
        }
        for (section_index, biomes) in raw.biomes {
            if let Some(section) = self.sections.get_mut(section_index) {
                if biomes.len() == COLUMN_COUNT {
                    section.biomes = biomes;
                }
            }
        }
        self.entities.extend(raw.entities);
        self.block_entities.extend(raw.block_entities);

        if stage == GenerationStage::Complete {
            self.recompute_height_map();
            self.recompute_sky_light();
        }
        self.stage = stage;
        self.last_modified = now_millis();
        Ok(())
    }

    /// Terminal transition, reachable from any stage
    pub fn mark_unloaded(&mut self) {
        self.stage = GenerationStage::Unloaded;
    }

    pub fn recompute_height_map(&mut self) {
        for z in 0..CHUNK_WIDTH as u32 {
            for x in 0..CHUNK_WIDTH as u32 {
                self.update_column_height(x, z);
            }
        }
    }

    fn update_column_height(&mut self, x: u32, z: u32) {
        let height = (0..self.height())
            .rev()
            .find(|&y| !self.get_block(x, y, z).is_transparent())
            .map(|y| y + 1)
            .unwrap_or(0);
        self.height_map[(x + z * CHUNK_WIDTH as u32) as usize] = height as u16;
    }

    /// Full sky light above the height map, dark below it
    pub fn recompute_sky_light(&mut self) {
        for (section_index, section) in self.sections.iter_mut().enumerate() {
            let base_y = section_index as u32 * SECTION_HEIGHT as u32;
            for y in 0..SECTION_HEIGHT as u32 {
                for z in 0..CHUNK_WIDTH as u32 {
                    for x in 0..CHUNK_WIDTH as u32 {
                        let column_height = self.height_map[(x + z * CHUNK_WIDTH as u32) as usize] as u32;
                        let light = if base_y + y >= column_height { 15 } else { 0 };
                        section.sky_light[ChunkSection::index(x, y, z)] = light;
                    }
                }
            }
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
