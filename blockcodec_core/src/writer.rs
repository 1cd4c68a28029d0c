use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::codec::CodecPtr;
use crate::error::{CodecError, Result};
use crate::format::{
    descriptor_hash, encode_block, BlockEntry, FileHeader, BLOCK_ENTRY_SIZE, BLOCK_HEADER_SIZE, FORMAT_VERSION,
    HEADER_SIZE,
};

/// Streaming writer for block-codec files.
///
/// Call [`write`](Self::write) any number of times; every `block_size` raw
/// bytes become one independent block frame. [`finish`](Self::finish)
/// flushes the partial tail block, appends the index and footer, and writes
/// back the final header.
///
/// ```text
/// [HEADER: 32 bytes placeholder]
/// [FRAME 0] [FRAME 1] ... [FRAME N-1]
/// [BLOCK INDEX: 16 bytes × N]
/// [FOOTER: u64 LE offset of block index]
/// ```
pub struct Writer {
    file: BufWriter<File>,
    codec: CodecPtr,
    block_size: u32,
    /// Computed once, when the writer is created.
    descriptor_hash: u64,
    pending: Vec<u8>,
    entries: Vec<BlockEntry>,
    current_offset: u64,
}

impl Writer {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: impl AsRef<Path>, codec: CodecPtr, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(CodecError::Syntax("block size must be positive".into()));
        }
        let worst_frame = BLOCK_HEADER_SIZE.saturating_add(codec.max_compressed_size(block_size as usize));
        if u32::try_from(worst_frame).is_err() {
            return Err(CodecError::Syntax(format!(
                "block size {block_size} can produce {worst_frame}-byte frames, more than a u32 index entry holds"
            )));
        }
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&[0u8; HEADER_SIZE as usize])?;
        let descriptor_hash = descriptor_hash(codec.as_ref());
        debug!(codec = %codec.descriptor(), descriptor_hash = %format!("{descriptor_hash:016x}"), "creating block file");
        Ok(Self {
            file,
            codec,
            block_size,
            descriptor_hash,
            pending: Vec::with_capacity(block_size as usize * 2),
            entries: Vec::new(),
            current_offset: HEADER_SIZE,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(data);
        while self.pending.len() >= self.block_size as usize {
            let raw: Vec<u8> = self.pending.drain(..self.block_size as usize).collect();
            self.flush_block(&raw)?;
        }
        Ok(())
    }

    fn flush_block(&mut self, raw: &[u8]) -> Result<()> {
        let frame = encode_block(self.codec.as_ref(), raw)?;
        let frame_len = u32::try_from(frame.len()).map_err(|_| {
            CodecError::compression(self.codec.name(), format!("block frame of {} bytes exceeds u32", frame.len()))
        })?;
        let raw_len = u32::try_from(raw.len())
            .map_err(|_| CodecError::compression(self.codec.name(), format!("block of {} bytes exceeds u32", raw.len())))?;
        self.file.write_all(&frame)?;
        self.entries.push(BlockEntry {
            offset: self.current_offset,
            frame_len,
            raw_len,
        });
        self.current_offset += frame.len() as u64;
        Ok(())
    }

    /// Seal the file. Returns the number of blocks written.
    pub fn finish(mut self) -> Result<u64> {
        if !self.pending.is_empty() {
            let remaining = std::mem::take(&mut self.pending);
            self.flush_block(&remaining)?;
        }

        let index_offset = self.current_offset;
        for entry in &self.entries {
            self.file.write_all(&entry.to_bytes())?;
        }
        self.current_offset += self.entries.len() as u64 * BLOCK_ENTRY_SIZE;
        self.file.write_all(&index_offset.to_le_bytes())?;

        let block_count = self.entries.len() as u64;
        let header = FileHeader {
            version: FORMAT_VERSION,
            method_byte: self.codec.method_byte(),
            block_size: self.block_size,
            block_count,
            descriptor_hash: self.descriptor_hash,
        };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.flush()?;

        Ok(block_count)
    }
}
