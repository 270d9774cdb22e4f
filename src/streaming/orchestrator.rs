use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::{OrchestratorConfig, ViewShape};
use crate::generation::CancelToken;
use crate::lod::LodManager;
use crate::storage::ChunkStore;
use crate::world::{ChunkPos, ViewerPos};

/// What one streaming update did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamingReport {
    /// Loads issued for missing chunks
    pub requested: usize,
    pub loaded: usize,
    pub unloaded: usize,
    pub failed: usize,
    /// Missing chunks left alone because a recent load failed
    pub skipped_cooldown: usize,
    /// Chunks whose LOD changed
    pub lod_updates: usize,
}

impl StreamingReport {
    pub fn did_work(&self) -> bool {
        self.requested > 0 || self.unloaded > 0 || self.lod_updates > 0
    }
}

/// Keeps the store in step with the viewer: loads what is in view, unloads
/// what left it and refreshes LOD levels.
pub struct StreamingOrchestrator {
    store: Arc<ChunkStore>,
    lod: Arc<LodManager>,
    config: OrchestratorConfig,
    max_chunk_coord: i32,
    /// Failed coordinates and when they may be retried
    cooldowns: DashMap<ChunkPos, Instant>,
}

impl StreamingOrchestrator {
    pub fn new(store: Arc<ChunkStore>, lod: Arc<LodManager>, config: OrchestratorConfig, max_chunk_coord: i32) -> Self {
        let side = 2 * config.view_distance as usize + 1;
        if side * side > store.capacity() {
            log::warn!(
                "[StreamingOrchestrator] View area of {} chunks exceeds store capacity {}; chunks in view will evict each other",
                side * side,
                store.capacity()
            );
        }
        Self {
            store,
            lod,
            config,
            max_chunk_coord,
            cooldowns: DashMap::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Coordinates currently held back after a failure
    pub fn cooling_down(&self) -> Vec<ChunkPos> {
        let now = Instant::now();
        self.cooldowns
            .iter()
            .filter(|entry| *entry.value() > now)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Chunks within view distance of `center`, nearest first, clipped to the world extent
    pub fn required_set(&self, center: ChunkPos) -> Vec<ChunkPos> {
        let r = i64::from(self.config.view_distance);
        let shape = self.config.view_shape;
        let extent = i64::from(self.max_chunk_coord);
        let (cx, cz) = (i64::from(center.x), i64::from(center.z));

        // Clip before enumerating; a viewer far outside the world needs nothing
        let (x_min, x_max) = ((cx - r).max(-extent), (cx + r).min(extent));
        let (z_min, z_max) = ((cz - r).max(-extent), (cz + r).min(extent));

        let mut required: Vec<ChunkPos> = (x_min..=x_max)
            .into_par_iter()
            .flat_map_iter(|x| {
                (z_min..=z_max).filter_map(move |z| {
                    let (dx, dz) = (i128::from(x - cx), i128::from(z - cz));
                    if shape == ViewShape::Circle && dx * dx + dz * dz > i128::from(r) * i128::from(r) {
                        return None;
                    }
                    // Inside ±max_chunk_coord, so both fit in i32
                    Some(ChunkPos::new(x as i32, z as i32))
                })
            })
            .collect();
        required.sort_by_key(|pos| (pos.distance_squared_to(center), *pos));
        required
    }

    /// Apply one viewer position immediately
    pub async fn update(&self, viewer: ViewerPos) -> StreamingReport {
        let start = Instant::now();
        let center = viewer.to_chunk_pos();
        let required = self.required_set(center);
        let wanted: FxHashSet<ChunkPos> = required.iter().copied().collect();
        let loaded: FxHashSet<ChunkPos> = self.store.snapshot().into_iter().collect();
        let mut report = StreamingReport::default();

        // Unload first so loads do not evict chunks still in view
        for pos in loaded.iter().filter(|pos| !wanted.contains(*pos)) {
            match self.store.invalidate(*pos).await {
                Ok(true) => report.unloaded += 1,
                Ok(false) => {}
                Err(e) => log::error!("[StreamingOrchestrator] Failed to unload {}: {}", pos, e),
            }
        }

        let now = Instant::now();
        self.cooldowns.retain(|_, until| *until > now);
        let (cooling, ready): (Vec<ChunkPos>, Vec<ChunkPos>) = required
            .into_iter()
            .filter(|pos| !loaded.contains(pos))
            .partition(|pos| self.cooldowns.contains_key(pos));
        report.skipped_cooldown = cooling.len();
        report.requested = ready.len();

        let results: Vec<_> = stream::iter(ready)
            .map(|pos| async move { (pos, self.store.get(pos).await) })
            .buffer_unordered(self.config.max_concurrent_loads.max(1))
            .collect()
            .await;

        for (pos, result) in results {
            match result {
                Ok(_) => report.loaded += 1,
                Err(e) if e.is_cancelled() => {
                    log::debug!("[StreamingOrchestrator] Load of {} was cancelled", pos);
                }
                Err(e) if e.is_retryable() => {
                    report.failed += 1;
                    self.cooldowns.insert(pos, Instant::now() + self.config.failure_cooldown());
                    log::warn!(
                        "[StreamingOrchestrator] {} cooling down for {:?}: {}",
                        pos,
                        self.config.failure_cooldown(),
                        e
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    log::error!("[StreamingOrchestrator] Failed to load {}: {}", pos, e);
                }
            }
        }

        let loaded_now = self.store.snapshot();
        for (pos, level) in self.lod.update_batch(viewer, &loaded_now) {
            let Some(handle) = self.store.get_loaded(pos) else {
                continue;
            };
            let current = handle.read().lod();
            if current == level {
                continue;
            }
            match self.store.set_lod(pos, level) {
                Ok(()) => {
                    report.lod_updates += 1;
                    log::trace!("[StreamingOrchestrator] {} now at LOD {}", pos, level.get());
                }
                // Evicted since the snapshot
                Err(e) => log::debug!("[StreamingOrchestrator] Skipped LOD for {}: {}", pos, e),
            }
        }

        if report.did_work() {
            log::info!(
                "[StreamingOrchestrator] Viewer at {}: {} loaded, {} unloaded, {} failed, {} cooling, {} LOD changes in {:.2}ms",
                center,
                report.loaded,
                report.unloaded,
                report.failed,
                report.skipped_cooldown,
                report.lod_updates,
                start.elapsed().as_secs_f64() * 1000.0
            );
        }
        report
    }

    /// Drive updates from `viewer_feed` until it closes or `shutdown` fires.
    ///
    /// Positions arriving within the debounce window collapse into the
    /// latest one. A periodic sweep runs regardless of movement. Returns the
    /// number of updates applied.
    pub async fn run(&self, mut viewer_feed: mpsc::Receiver<ViewerPos>, shutdown: CancelToken) -> usize {
        log::info!(
            "[StreamingOrchestrator] Started: view distance {} ({:?}), debounce {:?}",
            self.config.view_distance,
            self.config.view_shape,
            self.config.debounce()
        );

        let mut cleanup = tokio::time::interval(self.config.cleanup_interval());
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        cleanup.tick().await;

        let mut pending: Option<ViewerPos> = None;
        let mut deadline = tokio::time::Instant::now();
        let mut applied = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(deadline), if pending.is_some() => {
                    if let Some(viewer) = pending.take() {
                        self.update(viewer).await;
                        applied += 1;
                    }
                }
                received = viewer_feed.recv() => match received {
                    Some(viewer) => {
                        if pending.is_none() {
                            deadline = tokio::time::Instant::now() + self.config.debounce();
                        }
                        pending = Some(viewer);
                    }
                    None => {
                        if let Some(viewer) = pending.take() {
                            self.update(viewer).await;
                            applied += 1;
                        }
                        break;
                    }
                },
                _ = cleanup.tick() => {
                    let report = self.store.sweep().await;
                    log::trace!("[StreamingOrchestrator] Cleanup sweep: {:?}", report);
                }
            }
        }

        log::info!("[StreamingOrchestrator] Stopped after {} updates", applied);
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenerationConfig, LodConfig, SpatialConfig, StoreConfig, WorldConfig};
    use crate::generation::{FlatGenerator, GenerationCoordinator};
    use crate::persistence::ChunkSerializer;
    use crate::spatial_index::SpatialIndex;

    fn orchestrator(view_distance: u32, view_shape: ViewShape, max_chunk_coord: i32) -> StreamingOrchestrator {
        let world = WorldConfig { max_chunk_coord, section_count: 1, ..Default::default() };
        let coordinator = Arc::new(GenerationCoordinator::new(
            Arc::new(FlatGenerator::new(8)),
            GenerationConfig::default(),
            &world,
        ));
        let store = Arc::new(ChunkStore::new(
            StoreConfig::default(),
            &world,
            Arc::new(SpatialIndex::new(&SpatialConfig::default(), &world)),
            coordinator,
            None,
            Arc::new(ChunkSerializer::with_kind(world.codec)),
        ));
        let config = OrchestratorConfig { view_distance, view_shape, ..Default::default() };
        StreamingOrchestrator::new(store, Arc::new(LodManager::new(&LodConfig::default())), config, max_chunk_coord)
    }

    #[test]
    fn test_square_required_set_is_nearest_first() {
        let orchestrator = orchestrator(2, ViewShape::Square, 100);
        let required = orchestrator.required_set(ChunkPos::new(5, -5));
        assert_eq!(required.len(), 25);
        assert_eq!(required[0], ChunkPos::new(5, -5));
        assert!(required.iter().all(|p| p.chebyshev_distance(ChunkPos::new(5, -5)) <= 2));
        let distances: Vec<_> = required.iter().map(|p| p.distance_squared_to(ChunkPos::new(5, -5))).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_circle_required_set_drops_corners() {
        let orchestrator = orchestrator(2, ViewShape::Circle, 100);
        let required = orchestrator.required_set(ChunkPos::new(0, 0));
        assert_eq!(required.len(), 13);
        assert!(!required.contains(&ChunkPos::new(2, 2)));
        assert!(required.contains(&ChunkPos::new(2, 0)));
    }

    #[test]
    fn test_viewer_outside_world_requires_nothing() {
        let orchestrator = orchestrator(4, ViewShape::Circle, 100);
        assert!(orchestrator.required_set(ChunkPos::new(i32::MAX, i32::MIN)).is_empty());
        assert!(orchestrator.required_set(ChunkPos::new(105, 0)).is_empty());
        assert_eq!(orchestrator.required_set(ChunkPos::new(104, 0)), vec![ChunkPos::new(100, 0)]);
    }

    #[test]
    fn test_required_set_clipped_to_world() {
        let orchestrator = orchestrator(2, ViewShape::Square, 10);
        let required = orchestrator.required_set(ChunkPos::new(10, 10));
        assert_eq!(required.len(), 9);
        assert!(required.iter().all(|p| p.x <= 10 && p.z <= 10));
    }
}
