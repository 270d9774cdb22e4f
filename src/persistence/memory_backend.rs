use dashmap::DashMap;

use super::{PersistenceBackend, PersistenceResult};
use crate::world::ChunkPos;

/// In-memory backend, mainly for tests and tools
#[derive(Debug, Default)]
pub struct MemoryBackend {
    chunks: DashMap<ChunkPos, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.chunks.contains_key(&pos)
    }
}

impl PersistenceBackend for MemoryBackend {
    fn save(&self, pos: ChunkPos, data: &[u8]) -> PersistenceResult<()> {
        self.chunks.insert(pos, data.to_vec());
        Ok(())
    }

    fn load(&self, pos: ChunkPos) -> PersistenceResult<Option<Vec<u8>>> {
        Ok(self.chunks.get(&pos).map(|entry| entry.value().clone()))
    }

    fn remove(&self, pos: ChunkPos) -> PersistenceResult<()> {
        self.chunks.remove(&pos);
        Ok(())
    }
}
