//! Shared fixtures for the integration tests

#![allow(dead_code)]

use earth_stream::generation::{FlatGenerator, GeneratorError, RawStageData, WorldGenerator};
use earth_stream::persistence::PersistenceBackend;
use earth_stream::{ChunkPos, ChunkWorld, GenerationStage, StreamingConfig};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Surface height used by every fixture world; fits in two sections
pub const SURFACE: u32 = 20;

/// Flat terrain generator that records calls and can be told to fail
pub struct TestGenerator {
    inner: FlatGenerator,
    delay: Duration,
    calls: Mutex<HashMap<(ChunkPos, GenerationStage), u32>>,
    /// Remaining Structure-stage failures per coordinate
    failures: Mutex<HashMap<ChunkPos, u32>>,
}

impl TestGenerator {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: FlatGenerator::new(SURFACE),
            delay,
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        })
    }

    pub fn fail(&self, pos: ChunkPos, times: u32) {
        self.failures.lock().insert(pos, times);
    }

    pub fn calls_for(&self, pos: ChunkPos) -> u32 {
        self.calls
            .lock()
            .iter()
            .filter(|((p, _), _)| *p == pos)
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn stage_calls(&self, pos: ChunkPos, stage: GenerationStage) -> u32 {
        self.calls.lock().get(&(pos, stage)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().values().sum()
    }
}

impl WorldGenerator for TestGenerator {
    fn generate_stage(
        &self,
        pos: ChunkPos,
        stage: GenerationStage,
        seed: u64,
    ) -> BoxFuture<'_, Result<RawStageData, GeneratorError>> {
        async move {
            *self.calls.lock().entry((pos, stage)).or_insert(0) += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if stage == GenerationStage::Structure {
                let mut failures = self.failures.lock();
                if let Some(remaining) = failures.get_mut(&pos).filter(|n| **n > 0) {
                    *remaining -= 1;
                    return Err(GeneratorError::StageFailed {
                        pos,
                        stage,
                        message: "injected failure".to_string(),
                    });
                }
            }
            self.inner.generate_stage(pos, stage, seed).await
        }
        .boxed()
    }
}

/// Small, fast configuration for tests
pub fn test_config() -> StreamingConfig {
    let mut config = StreamingConfig::default();
    config.world.max_chunk_coord = 1000;
    config.world.section_count = 2;
    config.store.load_timeout_ms = 2_000;
    config.store.load_backoff_ms = 5;
    config.generation.max_workers = 4;
    config.generation.stage_backoff_ms = 1;
    config.generation.persist_generated = false;
    config.streaming.debounce_ms = 20;
    config
}

pub fn world_with(
    config: StreamingConfig,
    generator: Arc<TestGenerator>,
    backend: Option<Arc<dyn PersistenceBackend>>,
) -> Arc<ChunkWorld> {
    Arc::new(ChunkWorld::new(config, generator, backend).unwrap())
}
