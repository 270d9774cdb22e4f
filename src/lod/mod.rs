//! Distance-based level of detail selection

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

use crate::config::LodConfig;
use crate::world::{ChunkPos, LodLevel, ViewerPos};

/// Default Chebyshev distance thresholds for LOD 0 through 3
pub const DEFAULT_THRESHOLDS: [u32; 4] = [2, 4, 8, 16];

/// LOD for a chunk at Chebyshev distance from the viewer's chunk.
///
/// Distance up to `thresholds[0]` is LOD 0, up to `thresholds[1]` LOD 1 and
/// so on; anything past the last threshold is [`LodLevel::LOWEST`].
pub fn level_for(pos: ChunkPos, viewer: ChunkPos, thresholds: &[u32; 4]) -> LodLevel {
    let distance = pos.chebyshev_distance(viewer);
    let level = thresholds
        .iter()
        .position(|&limit| distance <= limit)
        .unwrap_or(thresholds.len());
    LodLevel::new(level as u8).unwrap_or(LodLevel::LOWEST)
}

/// Batch LOD updater with a short-lived memo keyed by chunk and viewer chunk
pub struct LodManager {
    thresholds: [u32; 4],
    memo_ttl: Duration,
    memo: Mutex<FxHashMap<(ChunkPos, ChunkPos), (LodLevel, Instant)>>,
}

impl LodManager {
    pub fn new(config: &LodConfig) -> Self {
        Self {
            thresholds: config.thresholds,
            memo_ttl: config.memo_ttl(),
            memo: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn thresholds(&self) -> &[u32; 4] {
        &self.thresholds
    }

    pub fn level_for(&self, pos: ChunkPos, viewer: ChunkPos) -> LodLevel {
        level_for(pos, viewer, &self.thresholds)
    }

    /// LOD for every loaded chunk. Viewer movement inside one chunk reuses
    /// memoized levels until they age out.
    pub fn update_batch(&self, viewer: ViewerPos, loaded: &[ChunkPos]) -> Vec<(ChunkPos, LodLevel)> {
        let bucket = viewer.to_chunk_pos();
        let now = Instant::now();
        let mut memo = self.memo.lock();
        memo.retain(|_, (_, computed)| now.duration_since(*computed) < self.memo_ttl);

        loaded
            .iter()
            .map(|&pos| {
                let (level, _) = *memo
                    .entry((pos, bucket))
                    .or_insert_with(|| (level_for(pos, bucket, &self.thresholds), now));
                (pos, level)
            })
            .collect()
    }

    /// Memoized entries still alive
    pub fn memo_len(&self) -> usize {
        self.memo.lock().len()
    }

    pub fn clear(&self) {
        self.memo.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundaries() {
        let viewer = ChunkPos::new(0, 0);
        let expected = [(0, 0), (2, 0), (3, 1), (4, 1), (5, 2), (8, 2), (9, 3), (16, 3), (17, 4), (400, 4)];
        for (distance, level) in expected {
            assert_eq!(level_for(ChunkPos::new(distance, 0), viewer, &DEFAULT_THRESHOLDS).get(), level);
            assert_eq!(level_for(ChunkPos::new(-3, -distance), viewer, &DEFAULT_THRESHOLDS).get(), level.max(1));
        }
    }

    #[test]
    fn test_viewer_at_origin_partition_ten_away() {
        let level = level_for(ChunkPos::new(10, 0), ChunkPos::new(0, 0), &DEFAULT_THRESHOLDS);
        assert_eq!(level.get(), 3);
    }

    #[test]
    fn test_monotonic_in_distance() {
        let viewer = ChunkPos::new(-7, 11);
        let mut previous = LodLevel::HIGHEST;
        for d in 0..40 {
            let level = level_for(viewer.offset(d, d / 2), viewer, &DEFAULT_THRESHOLDS);
            assert!(level >= previous);
            previous = level;
        }
    }

    #[test]
    fn test_update_batch_memoizes_per_viewer_chunk() {
        let manager = LodManager::new(&LodConfig::default());
        let loaded = [ChunkPos::new(0, 0), ChunkPos::new(5, 0)];

        let first = manager.update_batch(ViewerPos::new(1.0, 1.0), &loaded);
        assert_eq!(first, vec![(ChunkPos::new(0, 0), LodLevel::HIGHEST), (ChunkPos::new(5, 0), LodLevel::new(2).unwrap())]);
        assert_eq!(manager.memo_len(), 2);

        // Jitter inside the same chunk hits the memo
        manager.update_batch(ViewerPos::new(15.0, 3.0), &loaded);
        assert_eq!(manager.memo_len(), 2);

        let moved = manager.update_batch(ViewerPos::new(80.0, 0.0), &loaded);
        assert_eq!(moved[1].1, LodLevel::HIGHEST);
        assert_eq!(manager.memo_len(), 4);
    }
}
