use super::{BlockCodec, CodecError, CodecKind};
use crate::world::BlockId;

/// Longest run a single pair may describe; longer runs are split
pub const MAX_RUN: u16 = 255;

/// Bytes per `(value, count)` pair: two little-endian u16 words
const PAIR_BYTES: usize = 4;

/// Run-length codec. The stream is a sequence of `(value, count)` pairs of
/// little-endian u16 words with `1 <= count <= 255`.
#[derive(Debug, Clone, Copy)]
pub struct RleCodec {
    expected_len: usize,
}

impl RleCodec {
    pub fn new(expected_len: usize) -> Self {
        Self { expected_len }
    }
}

impl BlockCodec for RleCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Rle
    }

    fn expected_len(&self) -> usize {
        self.expected_len
    }

    fn encode(&self, blocks: &[BlockId]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut iter = blocks.iter().copied();
        let Some(mut current) = iter.next() else {
            return out;
        };
        let mut run: u16 = 1;

        for block in iter {
            if block == current && run < MAX_RUN {
                run += 1;
            } else {
                push_pair(&mut out, current, run);
                current = block;
                run = 1;
            }
        }
        push_pair(&mut out, current, run);
        out
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<BlockId>, CodecError> {
        if bytes.len() % PAIR_BYTES != 0 {
            return Err(CodecError::malformed(format!(
                "byte length {} is not a whole number of (value, count) pairs",
                bytes.len()
            )));
        }

        let mut blocks = Vec::with_capacity(self.expected_len);
        for pair in bytes.chunks_exact(PAIR_BYTES) {
            let value = u16::from_le_bytes([pair[0], pair[1]]);
            let count = u16::from_le_bytes([pair[2], pair[3]]);
            if count == 0 || count > MAX_RUN {
                return Err(CodecError::malformed(format!("invalid run count {}", count)));
            }
            if blocks.len() + count as usize > self.expected_len {
                return Err(CodecError::malformed(format!(
                    "runs overflow the expected length of {}",
                    self.expected_len
                )));
            }
            blocks.extend(std::iter::repeat(BlockId(value)).take(count as usize));
        }

        if blocks.len() != self.expected_len {
            return Err(CodecError::malformed(format!(
                "decoded {} blocks, expected {}",
                blocks.len(),
                self.expected_len
            )));
        }
        Ok(blocks)
    }
}

fn push_pair(out: &mut Vec<u8>, value: BlockId, count: u16) {
    out.extend_from_slice(&value.0.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
}
