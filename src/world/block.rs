use serde::{Serialize, Deserialize};
use std::fmt;

/// Unique identifier for a block type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockId(pub u16);

impl Default for BlockId {
    fn default() -> Self {
        BlockId::AIR
    }
}

impl BlockId {
    pub const AIR: BlockId = BlockId(0);
    pub const GRASS: BlockId = BlockId(1);
    pub const DIRT: BlockId = BlockId(2);
    pub const STONE: BlockId = BlockId(3);
    pub const SAND: BlockId = BlockId(5);
    pub const WATER: BlockId = BlockId(6);
    pub const BEDROCK: BlockId = BlockId(13);
    pub const TALL_GRASS: BlockId = BlockId(26);
    pub const FLOWER_RED: BlockId = BlockId(27);
    pub const FLOWER_YELLOW: BlockId = BlockId(28);

    /// Whether light and height-map scans pass through this block
    pub fn is_transparent(self) -> bool {
        matches!(
            self,
            BlockId::AIR | BlockId::WATER | BlockId::TALL_GRASS | BlockId::FLOWER_RED | BlockId::FLOWER_YELLOW
        )
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Biome identifier stored per block column of a section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BiomeId(pub u8);

impl BiomeId {
    pub const PLAINS: BiomeId = BiomeId(0);
    pub const DESERT: BiomeId = BiomeId(1);
    pub const FOREST: BiomeId = BiomeId(2);
}
