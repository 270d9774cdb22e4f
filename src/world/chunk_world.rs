use std::sync::Arc;

use crate::config::{ConfigError, StreamingConfig};
use crate::error::{ChunkError, ChunkResult};
use crate::generation::{GenerationCoordinator, WorldGenerator};
use crate::lod::LodManager;
use crate::persistence::{ChunkSerializer, PersistenceBackend};
use crate::spatial_index::SpatialIndex;
use crate::storage::{ChunkHandle, ChunkStore};
use crate::streaming::StreamingOrchestrator;
use super::{BlockId, BoundingBox, ChunkPos, LodLevel};

/// Public entry point of the streaming subsystem.
///
/// Wires codec, coordinator, spatial index, store and LOD manager together
/// from one [`StreamingConfig`].
pub struct ChunkWorld {
    config: StreamingConfig,
    store: Arc<ChunkStore>,
    lod: Arc<LodManager>,
}

impl ChunkWorld {
    pub fn new(
        config: StreamingConfig,
        generator: Arc<dyn WorldGenerator>,
        backend: Option<Arc<dyn PersistenceBackend>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let serializer = Arc::new(ChunkSerializer::with_kind(config.world.codec));
        let mut coordinator = GenerationCoordinator::new(generator, config.generation.clone(), &config.world);
        if let Some(backend) = &backend {
            coordinator = coordinator.with_persistence(Arc::clone(backend), Arc::clone(&serializer));
        }
        let index = Arc::new(SpatialIndex::new(&config.spatial, &config.world));
        let store = Arc::new(ChunkStore::new(
            config.store.clone(),
            &config.world,
            index,
            Arc::new(coordinator),
            backend,
            serializer,
        ));
        let lod = Arc::new(LodManager::new(&config.lod));

        log::info!(
            "[ChunkWorld] Ready: extent ±{}, {} sections per chunk, {:?} codec",
            config.world.max_chunk_coord, config.world.section_count, config.world.codec
        );
        Ok(Self { config, store, lod })
    }

    pub async fn load_partition(&self, pos: ChunkPos) -> ChunkResult<ChunkHandle> {
        self.store.get(pos).await
    }

    /// Returns whether the partition was loaded
    pub async fn unload_partition(&self, pos: ChunkPos) -> ChunkResult<bool> {
        self.store.invalidate(pos).await
    }

    pub fn query_region(&self, bbox: &BoundingBox) -> Vec<ChunkPos> {
        self.store.spatial_index().query_range(bbox)
    }

    /// Loaded partitions within Chebyshev distance `radius` of `center`
    pub fn query_radius(&self, center: ChunkPos, radius: u32) -> Vec<ChunkPos> {
        self.store.spatial_index().query_radius(center, radius)
    }

    pub fn set_lod(&self, pos: ChunkPos, level: LodLevel) -> ChunkResult<()> {
        self.store.set_lod(pos, level)
    }

    pub fn get_loaded_partitions(&self) -> Vec<ChunkPos> {
        self.store.snapshot()
    }

    /// External edit of a loaded partition, chunk-local coordinates.
    /// Returns false when the coordinates fall outside the chunk.
    pub fn edit_block(&self, pos: ChunkPos, x: u32, y: u32, z: u32, block: BlockId) -> ChunkResult<bool> {
        let handle = self.store.get_loaded(pos).ok_or(ChunkError::NotLoaded { pos })?;
        let changed = handle.write().set_block(x, y, z, block);
        Ok(changed)
    }

    /// A fresh orchestrator over this world's store
    pub fn orchestrator(&self) -> Arc<StreamingOrchestrator> {
        Arc::new(StreamingOrchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.lod),
            self.config.streaming.clone(),
            self.config.world.max_chunk_coord,
        ))
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn lod(&self) -> &Arc<LodManager> {
        &self.lod
    }

    pub fn coordinator(&self) -> &Arc<GenerationCoordinator> {
        self.store.coordinator()
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }
}
