use rustc_hash::FxHashMap;

use super::{BlockCodec, CodecError, CodecKind};
use crate::world::BlockId;

/// Palettes larger than this fall back to raw ids
const MAX_PALETTE: usize = 256;

/// Palette codec: `u16 palette_len`, palette ids (u16 LE), then one u8 index
/// per block. A palette length of 0 marks raw mode: one u16 LE id per block.
#[derive(Debug, Clone, Copy)]
pub struct PaletteCodec {
    expected_len: usize,
}

impl PaletteCodec {
    pub fn new(expected_len: usize) -> Self {
        Self { expected_len }
    }

    fn encode_raw(blocks: &[BlockId]) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + blocks.len() * 2);
        out.extend_from_slice(&0u16.to_le_bytes());
        for block in blocks {
            out.extend_from_slice(&block.0.to_le_bytes());
        }
        out
    }
}

impl BlockCodec for PaletteCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Palette
    }

    fn expected_len(&self) -> usize {
        self.expected_len
    }

    fn encode(&self, blocks: &[BlockId]) -> Vec<u8> {
        if blocks.is_empty() {
            return Vec::new();
        }

        let mut palette = Vec::new();
        let mut lookup = FxHashMap::default();
        for block in blocks {
            if !lookup.contains_key(block) {
                if palette.len() == MAX_PALETTE {
                    return Self::encode_raw(blocks);
                }
                lookup.insert(*block, palette.len() as u8);
                palette.push(*block);
            }
        }

        let mut out = Vec::with_capacity(2 + palette.len() * 2 + blocks.len());
        out.extend_from_slice(&(palette.len() as u16).to_le_bytes());
        for block in &palette {
            out.extend_from_slice(&block.0.to_le_bytes());
        }
        out.extend(blocks.iter().map(|b| lookup[b]));
        out
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<BlockId>, CodecError> {
        if bytes.is_empty() {
            return if self.expected_len == 0 {
                Ok(Vec::new())
            } else {
                Err(CodecError::malformed("empty palette stream"))
            };
        }
        if bytes.len() < 2 {
            return Err(CodecError::malformed("missing palette length"));
        }

        let palette_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        let body = &bytes[2..];

        if palette_len == 0 {
            if body.len() != self.expected_len * 2 {
                return Err(CodecError::malformed(format!(
                    "raw body holds {} bytes, expected {}",
                    body.len(),
                    self.expected_len * 2
                )));
            }
            return Ok(body
                .chunks_exact(2)
                .map(|pair| BlockId(u16::from_le_bytes([pair[0], pair[1]])))
                .collect());
        }

        if palette_len > MAX_PALETTE {
            return Err(CodecError::malformed(format!("palette of {} entries", palette_len)));
        }
        let palette_bytes = palette_len * 2;
        if body.len() != palette_bytes + self.expected_len {
            return Err(CodecError::malformed(format!(
                "palette body holds {} bytes, expected {}",
                body.len(),
                palette_bytes + self.expected_len
            )));
        }

        let palette: Vec<BlockId> = body[..palette_bytes]
            .chunks_exact(2)
            .map(|pair| BlockId(u16::from_le_bytes([pair[0], pair[1]])))
            .collect();

        body[palette_bytes..]
            .iter()
            .map(|&index| {
                palette
                    .get(index as usize)
                    .copied()
                    .ok_or_else(|| CodecError::malformed(format!("palette index {} out of range", index)))
            })
            .collect()
    }
}
