use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{CancelPolicy, StoreConfig, WorldConfig};
use crate::error::{ChunkError, ChunkResult};
use crate::generation::{GenerationCoordinator, GenerationHandle};
use crate::persistence::{ChunkSerializer, PersistenceBackend};
use crate::spatial_index::SpatialIndex;
use crate::world::{ChunkData, ChunkPos, GenerationStage, LodLevel};

/// Shared, lockable reference to a loaded chunk
pub type ChunkHandle = Arc<RwLock<ChunkData>>;

/// Store counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub persisted_loads: u64,
    pub persisted_saves: u64,
}

#[derive(Default)]
struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
    persisted_loads: AtomicU64,
    persisted_saves: AtomicU64,
}

/// Result of one background sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub trimmed: usize,
}

/// LRU map of loaded chunks.
///
/// Lock order is cache, then spatial index, then an individual chunk. The
/// cache lock is never held across an await.
pub struct ChunkStore {
    config: StoreConfig,
    max_chunk_coord: i32,
    cache: Mutex<LruCache<ChunkPos, ChunkHandle>>,
    index: Arc<SpatialIndex>,
    coordinator: Arc<GenerationCoordinator>,
    backend: Option<Arc<dyn PersistenceBackend>>,
    serializer: Arc<ChunkSerializer>,
    stats: StoreCounters,
}

impl ChunkStore {
    pub fn new(
        config: StoreConfig,
        world: &WorldConfig,
        index: Arc<SpatialIndex>,
        coordinator: Arc<GenerationCoordinator>,
        backend: Option<Arc<dyn PersistenceBackend>>,
        serializer: Arc<ChunkSerializer>,
    ) -> Self {
        log::info!(
            "[ChunkStore] Created with capacity {}, ttl {:?}, {:?} cancellation, persistence {}",
            config.capacity,
            config.ttl(),
            config.cancel_policy,
            if backend.is_some() { "enabled" } else { "disabled" }
        );
        Self {
            // Capacity is enforced by hand so evictions can be retired
            cache: Mutex::new(LruCache::unbounded()),
            config,
            max_chunk_coord: world.max_chunk_coord,
            index,
            coordinator,
            backend,
            serializer,
            stats: StoreCounters::default(),
        }
    }

    /// Get a chunk, loading it from persistence or generating it on a miss
    pub async fn get(&self, pos: ChunkPos) -> ChunkResult<ChunkHandle> {
        self.check_bounds(pos)?;

        let cached = self.cache.lock().get(&pos).cloned();
        if let Some(handle) = cached {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(handle);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        if let Some(chunk) = self.load_persisted(pos).await? {
            return self.commit(pos, chunk, None).await;
        }

        let generation = self.coordinator.join(pos);
        let chunk = self.wait_with_backoff(&generation).await?;
        self.commit(pos, chunk, Some(&generation)).await
    }

    /// Drop `pos` from the store and index, and stop or discard its generation
    pub async fn invalidate(&self, pos: ChunkPos) -> ChunkResult<bool> {
        self.check_bounds(pos)?;

        let removed = {
            let mut cache = self.cache.lock();
            // Flag the generation while holding the cache lock so a racing
            // commit either sees the flag or is removed below
            match self.config.cancel_policy {
                CancelPolicy::Eager => self.coordinator.cancel(pos),
                CancelPolicy::Lazy => self.coordinator.discard_on_completion(pos),
            };
            if cache.contains(&pos) {
                self.index.remove(pos);
                cache.pop(&pos)
            } else {
                None
            }
        };

        match removed {
            Some(handle) => {
                log::debug!("[ChunkStore] Invalidated {}", pos);
                self.retire(pos, handle).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Coordinates loaded right now
    pub fn snapshot(&self) -> Vec<ChunkPos> {
        self.cache.lock().iter().map(|(pos, _)| *pos).collect()
    }

    /// Update the LOD of a loaded chunk without touching its recency
    pub fn set_lod(&self, pos: ChunkPos, level: LodLevel) -> ChunkResult<()> {
        let handle = self.get_loaded(pos).ok_or(ChunkError::NotLoaded { pos })?;
        handle.write().set_lod(level);
        Ok(())
    }

    /// Loaded chunk, if any. Does not refresh recency or trigger a load.
    pub fn get_loaded(&self, pos: ChunkPos) -> Option<ChunkHandle> {
        self.cache.lock().peek(&pos).cloned()
    }

    pub fn contains(&self, pos: ChunkPos) -> bool {
        self.cache.lock().contains(&pos)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn spatial_index(&self) -> &Arc<SpatialIndex> {
        &self.index
    }

    pub fn coordinator(&self) -> &Arc<GenerationCoordinator> {
        &self.coordinator
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            persisted_loads: self.stats.persisted_loads.load(Ordering::Relaxed),
            persisted_saves: self.stats.persisted_saves.load(Ordering::Relaxed),
        }
    }

    /// Expire chunks past their TTL, then trim back to capacity
    pub async fn sweep(&self) -> SweepReport {
        let cutoff = self
            .config
            .ttl()
            .map(|ttl| crate::world::now_millis() - ttl.as_millis() as i64);

        let (expired, trimmed) = {
            let mut cache = self.cache.lock();
            let stale: Vec<ChunkPos> = match cutoff {
                Some(cutoff) => cache
                    .iter()
                    .filter(|(_, handle)| handle.read().last_modified() < cutoff)
                    .map(|(pos, _)| *pos)
                    .collect(),
                None => Vec::new(),
            };
            let mut expired = Vec::with_capacity(stale.len());
            for pos in stale {
                self.index.remove(pos);
                if let Some(handle) = cache.pop(&pos) {
                    expired.push((pos, handle));
                }
            }
            let trimmed = self.evict_lru(&mut cache, self.config.capacity);
            (expired, trimmed)
        };

        let released = self.coordinator.release_settled();
        if released > 0 {
            log::debug!("[ChunkStore] Released {} unclaimed generations", released);
        }

        let report = SweepReport { expired: expired.len(), trimmed: trimmed.len() };
        self.stats.expired.fetch_add(report.expired as u64, Ordering::Relaxed);
        for (pos, handle) in expired.into_iter().chain(trimmed) {
            self.retire(pos, handle).await;
        }
        if report.expired > 0 || report.trimmed > 0 {
            log::debug!("[ChunkStore] Sweep expired {} and trimmed {} chunks", report.expired, report.trimmed);
        }
        report
    }

    fn check_bounds(&self, pos: ChunkPos) -> ChunkResult<()> {
        let extent = self.max_chunk_coord;
        if pos.x.abs() > extent || pos.z.abs() > extent {
            return Err(ChunkError::OutOfBounds { pos, extent });
        }
        Ok(())
    }

    /// Join the generation for `pos`, retrying the wait with exponential backoff
    async fn wait_with_backoff(&self, generation: &GenerationHandle) -> ChunkResult<ChunkData> {
        let pos = generation.pos();
        let attempts = self.config.load_retry_limit + 1;
        let mut backoff = self.config.load_backoff();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.load_timeout(), generation.wait()).await {
                Ok(result) => {
                    let chunk = result?;
                    return Ok(Arc::try_unwrap(chunk).unwrap_or_else(|shared| (*shared).clone()));
                }
                Err(_) if attempt < attempts => {
                    log::warn!(
                        "[ChunkStore] Load of {} timed out (attempt {}/{}), waiting {:?}",
                        pos, attempt, attempts, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(_) => break,
            }
        }

        log::warn!("[ChunkStore] Giving up on {} after {} attempts", pos, attempts);
        Err(ChunkError::LoadTimeout { pos, attempts })
    }

    /// Read a previously saved chunk from the backend
    async fn load_persisted(&self, pos: ChunkPos) -> ChunkResult<Option<ChunkData>> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };
        let load_backend = Arc::clone(backend);
        let bytes = tokio::task::spawn_blocking(move || load_backend.load(pos))
            .await
            .map_err(|e| ChunkError::Persistence(format!("load task for {} failed: {}", pos, e)))??;
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let chunk = self.serializer.deserialize(&bytes).map_err(|e| {
            log::error!("[ChunkStore] Stored data for {} is unreadable: {}", pos, e);
            ChunkError::from(e)
        })?;
        if chunk.position() != pos || chunk.stage() != GenerationStage::Complete {
            log::warn!(
                "[ChunkStore] Dropping stale stored chunk for {} (holds {} at stage {})",
                pos,
                chunk.position(),
                chunk.stage()
            );
            let backend = Arc::clone(backend);
            match tokio::task::spawn_blocking(move || backend.remove(pos)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("[ChunkStore] Failed to remove stale {}: {}", pos, e),
                Err(e) => log::error!("[ChunkStore] Remove task for {} failed: {}", pos, e),
            }
            return Ok(None);
        }

        self.stats.persisted_loads.fetch_add(1, Ordering::Relaxed);
        log::debug!("[ChunkStore] Loaded {} from persistence", pos);
        Ok(Some(chunk))
    }

    /// Insert a freshly loaded chunk, evicting LRU entries to stay within capacity
    async fn commit(
        &self,
        pos: ChunkPos,
        chunk: ChunkData,
        generation: Option<&GenerationHandle>,
    ) -> ChunkResult<ChunkHandle> {
        let (indexed, evicted) = {
            let mut cache = self.cache.lock();

            // The generation stays joinable and cancellable until this point,
            // and `invalidate` flags it under the same lock
            if let Some(generation) = generation {
                self.coordinator.release(generation);
            }

            // Lost a race with another loader of the same coordinate
            if let Some(existing) = cache.get(&pos) {
                return Ok(Arc::clone(existing));
            }
            if generation.is_some_and(|g| g.is_discarded()) {
                return match self.config.cancel_policy {
                    CancelPolicy::Eager => {
                        log::debug!("[ChunkStore] {} was unloaded before it was stored", pos);
                        Err(ChunkError::Cancelled { pos })
                    }
                    CancelPolicy::Lazy => {
                        log::debug!("[ChunkStore] {} was unloaded while generating, not caching", pos);
                        Ok(Arc::new(RwLock::new(chunk)))
                    }
                };
            }

            let evicted = self.evict_lru(&mut cache, self.config.capacity.saturating_sub(1));
            let handle: ChunkHandle = Arc::new(RwLock::new(chunk));
            cache.put(pos, Arc::clone(&handle));
            let indexed = match self.index.insert(pos) {
                Ok(_) => Ok(handle),
                Err(e) => {
                    cache.pop(&pos);
                    Err(e)
                }
            };
            (indexed, evicted)
        };

        for (evicted_pos, evicted_handle) in evicted {
            self.retire(evicted_pos, evicted_handle).await;
        }
        let handle = indexed.map_err(|e| {
            log::error!("[ChunkStore] Could not index {}: {}", pos, e);
            ChunkError::from(e)
        })?;
        log::debug!("[ChunkStore] Loaded {}", pos);
        Ok(handle)
    }

    /// Pop least recently used entries until at most `keep` remain
    fn evict_lru(&self, cache: &mut LruCache<ChunkPos, ChunkHandle>, keep: usize) -> Vec<(ChunkPos, ChunkHandle)> {
        let mut evicted = Vec::new();
        while cache.len() > keep {
            // Leave the index before the store
            if let Some((pos, _)) = cache.peek_lru() {
                self.index.remove(*pos);
            }
            match cache.pop_lru() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        self.stats.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
        evicted
    }

    /// Final step for a chunk leaving the store: save if dirty, then mark unloaded
    async fn retire(&self, pos: ChunkPos, handle: ChunkHandle) {
        let bytes = {
            let mut chunk = handle.write();
            let bytes = match (&self.backend, chunk.is_dirty()) {
                (Some(_), true) => match self.serializer.serialize(&chunk) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        log::error!("[ChunkStore] Failed to serialize evicted {}: {}", pos, e);
                        None
                    }
                },
                _ => None,
            };
            chunk.clear_dirty();
            chunk.mark_unloaded();
            bytes
        };
        log::debug!("[ChunkStore] Evicted {}", pos);

        let (Some(bytes), Some(backend)) = (bytes, &self.backend) else {
            return;
        };
        let backend = Arc::clone(backend);
        match tokio::task::spawn_blocking(move || backend.save(pos, &bytes)).await {
            Ok(Ok(())) => {
                self.stats.persisted_saves.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => log::error!("[ChunkStore] Failed to save {}: {}", pos, e),
            Err(e) => log::error!("[ChunkStore] Save task for {} failed: {}", pos, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenerationConfig, SpatialConfig};
    use crate::generation::FlatGenerator;
    use crate::persistence::MemoryBackend;
    use crate::world::BlockId;

    fn store(capacity: usize, backend: Option<Arc<dyn PersistenceBackend>>) -> ChunkStore {
        let world = WorldConfig { max_chunk_coord: 64, section_count: 2, ..Default::default() };
        let generation = GenerationConfig { persist_generated: false, ..Default::default() };
        let coordinator = Arc::new(GenerationCoordinator::new(
            Arc::new(FlatGenerator::new(20)),
            generation,
            &world,
        ));
        let index = Arc::new(SpatialIndex::new(&SpatialConfig::default(), &world));
        let config = StoreConfig { capacity, ..Default::default() };
        ChunkStore::new(
            config,
            &world,
            index,
            coordinator,
            backend,
            Arc::new(ChunkSerializer::with_kind(world.codec)),
        )
    }

    #[tokio::test]
    async fn test_hit_returns_same_handle() {
        let store = store(8, None);
        let a = store.get(ChunkPos::new(1, 2)).await.unwrap();
        let b = store.get(ChunkPos::new(1, 2)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.stats().hits, 1);
        assert_eq!(store.stats().misses, 1);
        assert!(store.spatial_index().contains(ChunkPos::new(1, 2)));
    }

    #[tokio::test]
    async fn test_out_of_bounds_fails_fast() {
        let store = store(8, None);
        let err = store.get(ChunkPos::new(65, 0)).await.unwrap_err();
        assert!(matches!(err, ChunkError::OutOfBounds { extent: 64, .. }));
        assert_eq!(store.stats().misses, 0);
        assert_eq!(store.coordinator().stats().started, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_keeps_index_in_step() {
        let store = store(2, None);
        store.get(ChunkPos::new(0, 0)).await.unwrap();
        store.get(ChunkPos::new(1, 0)).await.unwrap();
        // Touch (0, 0) so (1, 0) becomes least recently used
        store.get(ChunkPos::new(0, 0)).await.unwrap();
        store.get(ChunkPos::new(2, 0)).await.unwrap();

        let mut loaded = store.snapshot();
        loaded.sort();
        assert_eq!(loaded, vec![ChunkPos::new(0, 0), ChunkPos::new(2, 0)]);
        assert!(!store.spatial_index().contains(ChunkPos::new(1, 0)));
        assert_eq!(store.spatial_index().len(), 2);
    }

    #[tokio::test]
    async fn test_set_lod_requires_loaded_chunk() {
        let store = store(4, None);
        let pos = ChunkPos::new(3, 3);
        assert!(matches!(store.set_lod(pos, LodLevel::LOWEST), Err(ChunkError::NotLoaded { .. })));
        store.get(pos).await.unwrap();
        store.set_lod(pos, LodLevel::LOWEST).unwrap();
        assert_eq!(store.get_loaded(pos).unwrap().read().lod(), LodLevel::LOWEST);
    }

    #[tokio::test]
    async fn test_dirty_chunk_saved_on_invalidate_and_reloaded() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store(4, Some(backend.clone()));
        let pos = ChunkPos::new(-2, 5);

        let handle = store.get(pos).await.unwrap();
        assert!(handle.write().set_block(4, 25, 4, BlockId::SAND));
        assert!(store.invalidate(pos).await.unwrap());
        assert_eq!(handle.read().stage(), GenerationStage::Unloaded);
        assert!(backend.contains(pos));

        let reloaded = store.get(pos).await.unwrap();
        assert_eq!(reloaded.read().get_block(4, 25, 4), BlockId::SAND);
        assert!(!reloaded.read().is_dirty());
        assert_eq!(store.stats().persisted_loads, 1);
    }

    #[tokio::test]
    async fn test_stale_stored_chunk_is_dropped() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store(4, Some(backend.clone()));
        let pos = ChunkPos::new(1, -1);
        // Saved under the wrong coordinate and never generated
        let stray = ChunkData::new(ChunkPos::new(9, 9), 2);
        backend.save(pos, &store.serializer.serialize(&stray).unwrap()).unwrap();

        let handle = store.get(pos).await.unwrap();
        assert_eq!(handle.read().position(), pos);
        assert_eq!(handle.read().stage(), GenerationStage::Complete);
        assert!(!backend.contains(pos));
        assert_eq!(store.stats().persisted_loads, 0);
    }

    #[tokio::test]
    async fn test_commit_releases_generation() {
        let store = store(4, None);
        let pos = ChunkPos::new(2, 3);
        store.get(pos).await.unwrap();
        assert!(!store.coordinator().is_in_flight(pos));
        assert_eq!(store.coordinator().in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_expires_stale_chunks() {
        let store = store(4, None);
        let pos = ChunkPos::new(0, 1);
        store.get(pos).await.unwrap();
        assert_eq!(store.sweep().await, SweepReport::default());

        let store = ChunkStore {
            config: StoreConfig { ttl_secs: 1, ..store.config.clone() },
            ..store
        };
        let handle = store.get_loaded(pos).unwrap();
        // Age the chunk past the TTL
        let aged = {
            let chunk = handle.read();
            ChunkData::from_parts(
                pos,
                chunk.stage(),
                chunk.last_modified() - 5_000,
                chunk.sections().to_vec(),
                chunk.height_map().to_vec(),
                Vec::new(),
                Vec::new(),
            )
        };
        *handle.write() = aged;
        let report = store.sweep().await;
        assert_eq!(report.expired, 1);
        assert!(store.is_empty());
        assert!(store.spatial_index().is_empty());
    }
}
