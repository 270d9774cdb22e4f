pub mod codec;
pub mod config;
pub mod error;
pub mod generation;
pub mod lod;
pub mod persistence;
pub mod spatial_index;
pub mod storage;
pub mod streaming;
pub mod world;

pub use codec::{BlockCodec, CodecError, CodecKind, PaletteCodec, RleCodec};
pub use config::{CancelPolicy, ConfigError, StreamingConfig, ViewShape};
pub use error::{ChunkError, ChunkResult};
pub use generation::{CancelToken, FlatGenerator, GenerationCoordinator, GeneratorError, RawStageData, WorldGenerator};
pub use lod::{level_for, LodManager};
pub use persistence::{ChunkSerializer, FileBackend, MemoryBackend, PersistenceBackend, PersistenceError};
pub use spatial_index::{SpatialIndex, SpatialIndexError};
pub use storage::{ChunkHandle, ChunkStore};
pub use streaming::{StreamingOrchestrator, StreamingReport};
pub use world::{
    BiomeId, BlockId, BoundingBox, ChunkData, ChunkPos, ChunkWorld, GenerationStage, LodLevel, ViewerPos,
};
