//! Lossless block-array codecs
//!
//! A codec turns one section's fixed-length block array into bytes and back.
//! Store and coordinator only see the [`BlockCodec`] trait, so the scheme can
//! be swapped per world without touching them. [`CodecKind`] is written into
//! the serialized chunk header so readers pick the matching decoder.

mod palette;
mod rle;

pub use palette::PaletteCodec;
pub use rle::RleCodec;

use serde::{Serialize, Deserialize};
use std::sync::Arc;

use crate::world::{BlockId, SECTION_VOLUME};

/// Codec failures. These are integrity errors and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed block stream: {reason}")]
    Malformed { reason: String },
}

impl CodecError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CodecError::Malformed { reason: reason.into() }
    }
}

/// Identifies a codec in serialized data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Rle,
    Palette,
}

impl CodecKind {
    /// Build the codec for arrays of `expected_len` blocks
    pub fn build(self, expected_len: usize) -> Arc<dyn BlockCodec> {
        match self {
            CodecKind::Rle => Arc::new(RleCodec::new(expected_len)),
            CodecKind::Palette => Arc::new(PaletteCodec::new(expected_len)),
        }
    }

    /// Codec sized for one chunk section
    pub fn for_sections(self) -> Arc<dyn BlockCodec> {
        self.build(SECTION_VOLUME)
    }
}

/// Encoder/decoder capability for fixed-length block arrays
pub trait BlockCodec: Send + Sync {
    fn kind(&self) -> CodecKind;

    /// Length every decoded array must have
    fn expected_len(&self) -> usize;

    fn encode(&self, blocks: &[BlockId]) -> Vec<u8>;

    fn decode(&self, bytes: &[u8]) -> Result<Vec<BlockId>, CodecError>;
}
