use serde::{Serialize, Deserialize};
use std::sync::Arc;

use crate::codec::{BlockCodec, CodecKind};
use crate::persistence::error::corrupted_data;
use crate::persistence::{PersistenceError, PersistenceResult};
use crate::world::{
    BiomeId, ChunkData, ChunkPos, ChunkSection, EntityRef, GenerationStage, COLUMN_COUNT, SECTION_VOLUME,
};

/// Version of the chunk format
pub const CHUNK_FORMAT_VERSION: u32 = 1;

/// Magic bytes to identify chunk files
const CHUNK_MAGIC: &[u8; 4] = b"ESTR";

/// Sections beyond this are rejected as corrupt
const MAX_SECTIONS: u32 = 64;

/// Header for serialized chunks
#[derive(Debug, Serialize, Deserialize)]
struct ChunkHeader {
    magic: [u8; 4],
    version: u32,
    codec: CodecKind,
    chunk_pos: ChunkPos,
    stage: u8,
    last_modified: i64,
    section_count: u32,
    checksum: u32,
}

impl ChunkHeader {
    fn placeholder() -> Self {
        Self {
            magic: [0; 4],
            version: 0,
            codec: CodecKind::Rle,
            chunk_pos: ChunkPos::new(0, 0),
            stage: 0,
            last_modified: 0,
            section_count: 0,
            checksum: 0,
        }
    }
}

/// Serializes and deserializes chunks.
///
/// Layout: bincode header `{magic, version, codec, pos, stage, last_modified,
/// section_count, checksum}`, then per section the length-prefixed compressed
/// blocks, block light, sky light and biomes, then the height map and the
/// entity and block-entity reference lists. The CRC32 covers everything after
/// the header.
pub struct ChunkSerializer {
    codec: Arc<dyn BlockCodec>,
}

impl std::fmt::Debug for ChunkSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSerializer").field("codec", &self.codec.kind()).finish()
    }
}

impl ChunkSerializer {
    pub fn new(codec: Arc<dyn BlockCodec>) -> Self {
        Self { codec }
    }

    pub fn with_kind(kind: CodecKind) -> Self {
        Self::new(kind.for_sections())
    }

    pub fn codec_kind(&self) -> CodecKind {
        self.codec.kind()
    }

    fn header_size() -> PersistenceResult<usize> {
        Ok(bincode::serialized_size(&ChunkHeader::placeholder())? as usize)
    }

    /// Serialize a chunk to bytes
    pub fn serialize(&self, chunk: &ChunkData) -> PersistenceResult<Vec<u8>> {
        let header_size = Self::header_size()?;
        let mut buffer = vec![0u8; header_size];

        for section in chunk.sections() {
            write_block(&mut buffer, &self.codec.encode(&section.blocks));
            write_block(&mut buffer, &section.block_light);
            write_block(&mut buffer, &section.sky_light);
            let biomes: Vec<u8> = section.biomes.iter().map(|b| b.0).collect();
            write_block(&mut buffer, &biomes);
        }

        let heights: Vec<u8> = chunk.height_map().iter().flat_map(|h| h.to_le_bytes()).collect();
        write_block(&mut buffer, &heights);
        write_block(&mut buffer, &bincode::serialize(chunk.entities())?);
        write_block(&mut buffer, &bincode::serialize(chunk.block_entities())?);

        let header = ChunkHeader {
            magic: *CHUNK_MAGIC,
            version: CHUNK_FORMAT_VERSION,
            codec: self.codec.kind(),
            chunk_pos: chunk.position(),
            stage: chunk.stage().as_u8(),
            last_modified: chunk.last_modified(),
            section_count: chunk.sections().len() as u32,
            checksum: calculate_checksum(&buffer[header_size..]),
        };

        let header_bytes = bincode::serialize(&header)?;
        buffer[..header_size].copy_from_slice(&header_bytes);
        Ok(buffer)
    }

    /// Deserialize a chunk from bytes
    pub fn deserialize(&self, data: &[u8]) -> PersistenceResult<ChunkData> {
        let header_size = Self::header_size()?;
        if data.len() < header_size {
            return Err(corrupted_data("Data too small to contain valid chunk header"));
        }

        let header: ChunkHeader = bincode::deserialize(&data[..header_size])
            .map_err(|e| PersistenceError::DeserializationError(e.to_string()))?;

        if header.magic != *CHUNK_MAGIC {
            return Err(corrupted_data("Invalid chunk magic"));
        }
        if header.version != CHUNK_FORMAT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: CHUNK_FORMAT_VERSION,
                found: header.version,
            });
        }
        if header.section_count > MAX_SECTIONS {
            return Err(corrupted_data(format!(
                "Invalid section count: {} exceeds maximum {}",
                header.section_count, MAX_SECTIONS
            )));
        }
        if calculate_checksum(&data[header_size..]) != header.checksum {
            return Err(corrupted_data("Checksum mismatch"));
        }
        let stage = GenerationStage::from_u8(header.stage)
            .ok_or_else(|| corrupted_data(format!("Unknown generation stage {}", header.stage)))?;

        // Data written with another codec is still readable
        let codec = if header.codec == self.codec.kind() {
            Arc::clone(&self.codec)
        } else {
            log::debug!("[ChunkSerializer] Reading {:?}-encoded chunk {}", header.codec, header.chunk_pos);
            header.codec.for_sections()
        };

        let mut reader = Reader::new(&data[header_size..]);
        let mut sections = Vec::with_capacity(header.section_count as usize);
        for _ in 0..header.section_count {
            let blocks = codec.decode(reader.block()?)?;
            let block_light = reader.fixed_block(SECTION_VOLUME, "block light")?.to_vec();
            let sky_light = reader.fixed_block(SECTION_VOLUME, "sky light")?.to_vec();
            let biomes = reader
                .fixed_block(COLUMN_COUNT, "biomes")?
                .iter()
                .map(|&b| BiomeId(b))
                .collect();
            sections.push(ChunkSection { blocks, block_light, sky_light, biomes });
        }

        let height_map = reader
            .fixed_block(COLUMN_COUNT * 2, "height map")?
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let entities: Vec<EntityRef> = bincode::deserialize(reader.block()?)
            .map_err(|e| PersistenceError::DeserializationError(e.to_string()))?;
        let block_entities: Vec<EntityRef> = bincode::deserialize(reader.block()?)
            .map_err(|e| PersistenceError::DeserializationError(e.to_string()))?;
        reader.finish()?;

        Ok(ChunkData::from_parts(
            header.chunk_pos,
            stage,
            header.last_modified,
            sections,
            height_map,
            entities,
            block_entities,
        ))
    }
}

fn write_block(buffer: &mut Vec<u8>, bytes: &[u8]) {
    buffer.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buffer.extend_from_slice(bytes);
}

fn calculate_checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Bounds-checked reader over length-prefixed blocks
struct Reader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    fn take(&mut self, len: usize) -> PersistenceResult<&'a [u8]> {
        let end = self.cursor.checked_add(len).filter(|&end| end <= self.data.len())
            .ok_or_else(|| corrupted_data("Unexpected end of data"))?;
        let slice = &self.data[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn block(&mut self) -> PersistenceResult<&'a [u8]> {
        let len = self.take(4)?;
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        self.take(len)
    }

    fn fixed_block(&mut self, expected: usize, what: &str) -> PersistenceResult<&'a [u8]> {
        let block = self.block()?;
        if block.len() != expected {
            return Err(corrupted_data(format!("{} holds {} bytes, expected {}", what, block.len(), expected)));
        }
        Ok(block)
    }

    fn finish(&self) -> PersistenceResult<()> {
        if self.cursor != self.data.len() {
            return Err(corrupted_data(format!("{} trailing bytes", self.data.len() - self.cursor)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{BlockEdit, RawStageData};
    use crate::world::BlockId;

    fn sample_chunk() -> ChunkData {
        let mut chunk = ChunkData::new(ChunkPos::new(3, -5), 2);
        for stage in GenerationStage::PIPELINE {
            let raw = if stage == GenerationStage::Structure {
                RawStageData {
                    edits: (0..16).map(|x| BlockEdit { x, y: 0, z: 0, block: BlockId::STONE }).collect(),
                    entities: vec![EntityRef(42)],
                    block_entities: vec![EntityRef(7)],
                    ..Default::default()
                }
            } else {
                RawStageData::default()
            };
            chunk.apply_stage(stage, raw).unwrap();
        }
        chunk.set_block(5, 20, 5, BlockId::SAND);
        chunk
    }

    #[test]
    fn test_round_trip_all_codecs() {
        let chunk = sample_chunk();
        for kind in [CodecKind::Rle, CodecKind::Palette] {
            let serializer = ChunkSerializer::with_kind(kind);
            let data = serializer.serialize(&chunk).unwrap();
            let restored = serializer.deserialize(&data).unwrap();
            assert_eq!(restored.position(), chunk.position());
            assert_eq!(restored.stage(), GenerationStage::Complete);
            assert_eq!(restored.last_modified(), chunk.last_modified());
            assert_eq!(restored.sections(), chunk.sections());
            assert_eq!(restored.height_map(), chunk.height_map());
            assert_eq!(restored.entities(), &[EntityRef(42)]);
            assert_eq!(restored.block_entities(), &[EntityRef(7)]);
            assert!(!restored.is_dirty());
        }
    }

    #[test]
    fn test_reads_other_codec() {
        let chunk = sample_chunk();
        let data = ChunkSerializer::with_kind(CodecKind::Palette).serialize(&chunk).unwrap();
        let restored = ChunkSerializer::with_kind(CodecKind::Rle).deserialize(&data).unwrap();
        assert_eq!(restored.sections(), chunk.sections());
    }

    #[test]
    fn test_corruption_detection_invalid_magic() {
        let serializer = ChunkSerializer::with_kind(CodecKind::Rle);
        let mut data = serializer.serialize(&sample_chunk()).unwrap();
        data[0] = b'X';
        match serializer.deserialize(&data) {
            Err(PersistenceError::CorruptedData(msg)) => assert!(msg.contains("Invalid chunk magic")),
            other => panic!("Expected CorruptedData error, got {:?}", other.map(|c| c.position())),
        }
    }

    #[test]
    fn test_corruption_detection_invalid_version() {
        let serializer = ChunkSerializer::with_kind(CodecKind::Rle);
        let mut data = serializer.serialize(&sample_chunk()).unwrap();
        // Version follows the 4 magic bytes
        data[4..8].copy_from_slice(&999u32.to_le_bytes());
        match serializer.deserialize(&data) {
            Err(PersistenceError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, CHUNK_FORMAT_VERSION);
                assert_eq!(found, 999);
            }
            other => panic!("Expected VersionMismatch error, got {:?}", other.map(|c| c.position())),
        }
    }

    #[test]
    fn test_corruption_detection_checksum_mismatch() {
        let serializer = ChunkSerializer::with_kind(CodecKind::Rle);
        let mut data = serializer.serialize(&sample_chunk()).unwrap();
        let idx = data.len() - 1;
        data[idx] = data[idx].wrapping_add(1);
        match serializer.deserialize(&data) {
            Err(PersistenceError::CorruptedData(msg)) => assert!(msg.contains("Checksum mismatch")),
            other => panic!("Expected checksum mismatch, got {:?}", other.map(|c| c.position())),
        }
    }

    #[test]
    fn test_corruption_detection_invalid_size() {
        let serializer = ChunkSerializer::with_kind(CodecKind::Rle);
        match serializer.deserialize(&[0u8; 10]) {
            Err(PersistenceError::CorruptedData(msg)) => assert!(msg.contains("Data too small")),
            other => panic!("Expected CorruptedData error, got {:?}", other.map(|c| c.position())),
        }
    }
}
