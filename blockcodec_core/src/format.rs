use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::codec::Codec;
use crate::error::{CodecError, Result};
use crate::registry::CodecRegistry;

// ── Method bytes ───────────────────────────────────────────────────────────

pub const METHOD_NONE: u8 = 0x02;
pub const METHOD_LZ4: u8 = 0x82;
pub const METHOD_ZSTD: u8 = 0x90;
pub const METHOD_DEFLATE: u8 = 0x91;

// ── Block frame ────────────────────────────────────────────────────────────

/// Size of the header in front of every compressed block.
///   checksum:u64 + method:u8 + compressed_size:u32 + uncompressed_size:u32
///   = 8 + 1 + 4 + 4 = 17
pub const BLOCK_HEADER_SIZE: usize = 17;

/// Header of one persisted block. The checksum is xxh3-64 over everything
/// after it: the remaining header fields and the compressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub checksum: u64,
    pub method_byte: u8,
    /// Payload bytes following the header.
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8] = self.method_byte;
        buf[9..13].copy_from_slice(&self.compressed_size.to_le_bytes());
        buf[13..17].copy_from_slice(&self.uncompressed_size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < BLOCK_HEADER_SIZE {
            return Err(CodecError::CorruptBlock(format!(
                "block of {} bytes is shorter than its {BLOCK_HEADER_SIZE}-byte header",
                buf.len()
            )));
        }
        Ok(Self {
            checksum: u64::from_le_bytes(le_array(&buf[0..8])),
            method_byte: buf[8],
            compressed_size: u32::from_le_bytes(le_array(&buf[9..13])),
            uncompressed_size: u32::from_le_bytes(le_array(&buf[13..17])),
        })
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

fn frame_checksum(frame: &[u8]) -> u64 {
    xxh3_64(&frame[8..])
}

/// Compress `raw` with `codec` into a self-describing block frame.
pub fn encode_block(codec: &dyn Codec, raw: &[u8]) -> Result<Vec<u8>> {
    let uncompressed_size = u32::try_from(raw.len()).map_err(|_| {
        CodecError::compression(codec.name(), format!("block of {} bytes exceeds u32", raw.len()))
    })?;

    let mut frame = vec![0u8; BLOCK_HEADER_SIZE + codec.max_compressed_size(raw.len())];
    let written = codec.compress(raw, &mut frame[BLOCK_HEADER_SIZE..])?;
    frame.truncate(BLOCK_HEADER_SIZE + written);

    let compressed_size = u32::try_from(written).map_err(|_| {
        CodecError::compression(codec.name(), format!("compressed block of {written} bytes exceeds u32"))
    })?;
    let mut header = BlockHeader {
        checksum: 0,
        method_byte: codec.method_byte(),
        compressed_size,
        uncompressed_size,
    };
    frame[..BLOCK_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    header.checksum = frame_checksum(&frame);
    frame[..8].copy_from_slice(&header.checksum.to_le_bytes());
    Ok(frame)
}

/// Check a frame's length and checksum and return its header and payload.
pub fn split_block(frame: &[u8]) -> Result<(BlockHeader, &[u8])> {
    let header = BlockHeader::from_bytes(frame)?;
    let payload = &frame[BLOCK_HEADER_SIZE..];
    if payload.len() != header.compressed_size as usize {
        return Err(CodecError::CorruptBlock(format!(
            "header says {} compressed bytes but frame carries {}",
            header.compressed_size,
            payload.len()
        )));
    }
    let computed = frame_checksum(frame);
    if computed != header.checksum {
        return Err(CodecError::CorruptBlock(format!(
            "checksum mismatch: expected {:016x}, got {computed:016x}",
            header.checksum
        )));
    }
    Ok((header, payload))
}

/// Decode a block frame, picking the codec from its method byte alone.
pub fn decode_block(registry: &CodecRegistry, frame: &[u8]) -> Result<Vec<u8>> {
    let (header, payload) = split_block(frame)?;
    let codec = registry.get_by_method(header.method_byte)?;
    codec.decompress_to_vec(payload, header.uncompressed_size as usize)
}

// ── File container ─────────────────────────────────────────────────────────

/// Magic bytes opening every block-codec file.
pub const MAGIC: &[u8; 8] = b"BLKCODC\n";

pub const FORMAT_VERSION: u16 = 1;

/// Fixed size of the file header in bytes.
///   magic[8] + version:u16 + method:u8 + _pad:u8 + block_size:u32
///   + block_count:u64 + descriptor_hash:u64
///   = 8 + 2 + 1 + 1 + 4 + 8 + 8 = 32
pub const HEADER_SIZE: u64 = 32;

/// Size of each entry in the block index.
///   offset:u64 + frame_len:u32 + raw_len:u32 = 16
pub const BLOCK_ENTRY_SIZE: u64 = 16;

/// Size of the index footer (single u64 offset) in bytes.
pub const FOOTER_SIZE: u64 = 8;

/// Default block size: 64 KB.
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    pub method_byte: u8,
    /// Nominal raw bytes per block (the last block may be smaller).
    pub block_size: u32,
    pub block_count: u64,
    /// Hash of the writing codec's descriptor.
    pub descriptor_hash: u64,
}

impl FileHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..8].copy_from_slice(MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10] = self.method_byte;
        buf[12..16].copy_from_slice(&self.block_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.block_count.to_le_bytes());
        buf[24..32].copy_from_slice(&self.descriptor_hash.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        if &buf[..8] != MAGIC {
            return Err(CodecError::CorruptBlock("invalid magic bytes, not a block-codec file".into()));
        }
        Ok(Self {
            version: u16::from_le_bytes(le_array(&buf[8..10])),
            method_byte: buf[10],
            block_size: u32::from_le_bytes(le_array(&buf[12..16])),
            block_count: u64::from_le_bytes(le_array(&buf[16..24])),
            descriptor_hash: u64::from_le_bytes(le_array(&buf[24..32])),
        })
    }
}

/// Hash identifying the codec a file was written with.
pub fn descriptor_hash(codec: &dyn Codec) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(MAGIC);
    codec.contribute_hash(&mut hasher);
    hasher.digest()
}

/// Locates one block frame within the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockEntry {
    pub offset: u64,
    /// Full frame length, header included.
    pub frame_len: u32,
    pub raw_len: u32,
}

impl BlockEntry {
    pub fn to_bytes(&self) -> [u8; BLOCK_ENTRY_SIZE as usize] {
        let mut buf = [0u8; BLOCK_ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.frame_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.raw_len.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; BLOCK_ENTRY_SIZE as usize]) -> Self {
        Self {
            offset: u64::from_le_bytes(le_array(&buf[0..8])),
            frame_len: u32::from_le_bytes(le_array(&buf[8..12])),
            raw_len: u32::from_le_bytes(le_array(&buf[12..16])),
        }
    }
}
