//! Persistence backends for evicted and generated chunks

pub mod chunk_serializer;
pub mod error;
mod file_backend;
mod memory_backend;

pub use chunk_serializer::{ChunkSerializer, CHUNK_FORMAT_VERSION};
pub use error::{atomic_write, PersistenceErrorContext};
pub use file_backend::FileBackend;
pub use memory_backend::MemoryBackend;

use crate::codec::CodecError;
use crate::world::ChunkPos;

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Durable storage for serialized chunks.
///
/// Implementations are called from blocking worker threads.
pub trait PersistenceBackend: Send + Sync {
    fn save(&self, pos: ChunkPos, data: &[u8]) -> PersistenceResult<()>;

    /// `Ok(None)` when nothing is stored for `pos`
    fn load(&self, pos: ChunkPos) -> PersistenceResult<Option<Vec<u8>>>;

    fn remove(&self, pos: ChunkPos) -> PersistenceResult<()>;
}

/// Errors that can occur during persistence operations
#[derive(Debug)]
pub enum PersistenceError {
    IoError(std::io::Error),
    SerializationError(String),
    DeserializationError(String),
    VersionMismatch { expected: u32, found: u32 },
    CorruptedData(String),
    Codec(CodecError),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::IoError(e) => write!(f, "IO error: {}", e),
            PersistenceError::SerializationError(e) => write!(f, "Serialization error: {}", e),
            PersistenceError::DeserializationError(e) => write!(f, "Deserialization error: {}", e),
            PersistenceError::VersionMismatch { expected, found } => {
                write!(f, "Version mismatch: expected {}, found {}", expected, found)
            }
            PersistenceError::CorruptedData(e) => write!(f, "Corrupted data: {}", e),
            PersistenceError::Codec(e) => write!(f, "Codec error: {}", e),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        PersistenceError::IoError(err)
    }
}

impl From<bincode::Error> for PersistenceError {
    fn from(err: bincode::Error) -> Self {
        PersistenceError::SerializationError(err.to_string())
    }
}

impl From<CodecError> for PersistenceError {
    fn from(err: CodecError) -> Self {
        PersistenceError::Codec(err)
    }
}
