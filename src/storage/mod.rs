//! Capacity- and TTL-bounded partition store with load-through on miss

mod chunk_store;

pub use chunk_store::{ChunkHandle, ChunkStore, StoreStats, SweepReport};
