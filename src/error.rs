//! Error taxonomy for the chunk streaming subsystem
//!
//! `ChunkError` is `Clone` because one generation result is handed to every
//! caller joined on the same coordinate.

use crate::codec::CodecError;
use crate::persistence::PersistenceError;
use crate::spatial_index::SpatialIndexError;
use crate::world::{ChunkPos, GenerationStage};

/// Result type for chunk operations
pub type ChunkResult<T> = Result<T, ChunkError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk {pos} is outside the world extent of ±{extent}")]
    OutOfBounds { pos: ChunkPos, extent: i32 },

    #[error("generation of chunk {pos} failed at stage {stage} after {attempts} attempts: {message}")]
    Generation {
        pos: ChunkPos,
        stage: GenerationStage,
        attempts: u32,
        message: String,
    },

    #[error("loading chunk {pos} timed out after {attempts} attempts")]
    LoadTimeout { pos: ChunkPos, attempts: u32 },

    #[error("generation of chunk {pos} was cancelled")]
    Cancelled { pos: ChunkPos },

    #[error("chunk {pos} is not loaded")]
    NotLoaded { pos: ChunkPos },

    #[error("chunk {pos} cannot move from stage {from} to {to}")]
    InvalidStageTransition {
        pos: ChunkPos,
        from: GenerationStage,
        to: GenerationStage,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    SpatialIndex(#[from] SpatialIndexError),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ChunkError {
    /// Transient failures worth another attempt after a cool-down
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChunkError::Generation { .. } | ChunkError::LoadTimeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChunkError::Cancelled { .. })
    }

    /// Coordinate the error refers to, when it has one
    pub fn pos(&self) -> Option<ChunkPos> {
        match self {
            ChunkError::OutOfBounds { pos, .. }
            | ChunkError::Generation { pos, .. }
            | ChunkError::LoadTimeout { pos, .. }
            | ChunkError::Cancelled { pos }
            | ChunkError::NotLoaded { pos }
            | ChunkError::InvalidStageTransition { pos, .. } => Some(*pos),
            ChunkError::Codec(_) | ChunkError::SpatialIndex(_) | ChunkError::Persistence(_) => None,
        }
    }
}

impl From<PersistenceError> for ChunkError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Codec(codec) => ChunkError::Codec(codec),
            other => ChunkError::Persistence(other.to_string()),
        }
    }
}
