//! Streaming configuration
//!
//! Loaded from TOML; every section and field is optional and falls back to
//! its `Default`.

use serde::{Serialize, Deserialize};
use std::path::Path;
use std::time::Duration;

use crate::codec::CodecKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Io { path: String, error: std::io::Error },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// What `invalidate` does to an in-flight generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Let the generation finish, then drop its result instead of caching it
    #[default]
    Lazy,
    /// Abort the generation immediately; joined callers get `Cancelled`
    Eager,
}

/// Shape of the required area around the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewShape {
    #[default]
    Square,
    Circle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Largest absolute chunk coordinate on either axis
    pub max_chunk_coord: i32,
    /// Vertical sections per chunk
    pub section_count: usize,
    pub seed: u64,
    pub codec: CodecKind,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_chunk_coord: 1_875_000,
            section_count: 16,
            seed: 12345,
            codec: CodecKind::Rle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub capacity: usize,
    /// Seconds since last modification before the sweep expires a chunk; 0 disables
    pub ttl_secs: u64,
    pub load_timeout_ms: u64,
    /// Extra join attempts after the first timeout
    pub load_retry_limit: u32,
    pub load_backoff_ms: u64,
    pub cancel_policy: CancelPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_secs: 300,
            load_timeout_ms: 5_000,
            load_retry_limit: 3,
            load_backoff_ms: 50,
            cancel_policy: CancelPolicy::Lazy,
        }
    }
}

impl StoreConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn load_backoff(&self) -> Duration {
        Duration::from_millis(self.load_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Simultaneous generations; further requests queue in FIFO order
    pub max_workers: usize,
    /// Extra attempts per failing stage
    pub stage_retry_limit: u32,
    pub stage_backoff_ms: u64,
    /// Save freshly generated chunks to the persistence backend
    pub persist_generated: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().clamp(1, 4),
            stage_retry_limit: 2,
            stage_backoff_ms: 10,
            persist_generated: true,
        }
    }
}

impl GenerationConfig {
    pub fn stage_backoff(&self) -> Duration {
        Duration::from_millis(self.stage_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub max_depth: u32,
    /// Items a leaf holds before it splits
    pub node_capacity: usize,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            max_depth: 24,
            node_capacity: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Upper Chebyshev distance (inclusive) for LOD 0..=3; beyond the last is LOD 4
    pub thresholds: [u32; 4],
    pub memo_ttl_ms: u64,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            thresholds: [2, 4, 8, 16],
            memo_ttl_ms: 3_000,
        }
    }
}

impl LodConfig {
    pub fn memo_ttl(&self) -> Duration {
        Duration::from_millis(self.memo_ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Required radius around the viewer, in chunks
    pub view_distance: u32,
    pub view_shape: ViewShape,
    pub debounce_ms: u64,
    pub cleanup_interval_ms: u64,
    pub max_concurrent_loads: usize,
    pub failure_cooldown_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            view_distance: 8,
            view_shape: ViewShape::Square,
            debounce_ms: 100,
            cleanup_interval_ms: 5_000,
            max_concurrent_loads: 8,
            failure_cooldown_ms: 2_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.failure_cooldown_ms)
    }
}

/// Top-level configuration for a streamed world
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub world: WorldConfig,
    pub store: StoreConfig,
    pub generation: GenerationConfig,
    pub spatial: SpatialConfig,
    pub lod: LodConfig,
    pub streaming: OrchestratorConfig,
}

impl StreamingConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: StreamingConfig = toml::from_str(raw)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.display().to_string(),
            error,
        })?;
        let config = Self::from_toml_str(&raw)?;
        log::info!("[StreamingConfig] Loaded {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { field, reason: reason.to_string() })
        }

        if self.world.max_chunk_coord <= 0 {
            return invalid("world.max_chunk_coord", "must be positive");
        }
        if self.world.section_count == 0 {
            return invalid("world.section_count", "must be at least 1");
        }
        if self.store.capacity == 0 {
            return invalid("store.capacity", "must be at least 1");
        }
        if self.generation.max_workers == 0 {
            return invalid("generation.max_workers", "must be at least 1");
        }
        if self.spatial.node_capacity == 0 {
            return invalid("spatial.node_capacity", "must be at least 1");
        }
        if self.lod.thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return invalid("lod.thresholds", "must be strictly increasing");
        }
        if self.streaming.view_distance == 0 {
            return invalid("streaming.view_distance", "must be at least 1");
        }
        if self.streaming.max_concurrent_loads == 0 {
            return invalid("streaming.max_concurrent_loads", "must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = StreamingConfig::from_toml_str("").unwrap();
        assert_eq!(config.store.capacity, StoreConfig::default().capacity);
        assert_eq!(config.lod.thresholds, [2, 4, 8, 16]);
        assert_eq!(config.store.cancel_policy, CancelPolicy::Lazy);
        assert_eq!(config.streaming.debounce_ms, 100);
    }

    #[test]
    fn test_partial_override() {
        let raw = r#"
            [store]
            capacity = 4
            cancel_policy = "eager"

            [streaming]
            view_shape = "circle"
        "#;
        let config = StreamingConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.store.capacity, 4);
        assert_eq!(config.store.cancel_policy, CancelPolicy::Eager);
        assert_eq!(config.store.ttl_secs, 300);
        assert_eq!(config.streaming.view_shape, ViewShape::Circle);
    }

    #[test]
    fn test_validation_rejects_bad_thresholds() {
        let raw = "[lod]\nthresholds = [2, 2, 8, 16]\n";
        match StreamingConfig::from_toml_str(raw) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "lod.thresholds"),
            other => panic!("expected invalid thresholds, got {:?}", other),
        }
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = StreamingConfig::default();
        config.store.capacity = 77;
        let raw = config.to_toml_string().unwrap();
        let parsed = StreamingConfig::from_toml_str(&raw).unwrap();
        assert_eq!(parsed.store.capacity, 77);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streaming.toml");
        std::fs::write(&path, "[world]\nseed = 99\n").unwrap();
        let config = StreamingConfig::load(&path).unwrap();
        assert_eq!(config.world.seed, 99);
        assert!(matches!(StreamingConfig::load(dir.path().join("missing.toml")), Err(ConfigError::Io { .. })));
    }
}
