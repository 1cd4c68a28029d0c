use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::codec::CodecPtr;
use crate::error::{CodecError, Result};
use crate::format::{
    split_block, BlockEntry, FileHeader, BLOCK_ENTRY_SIZE, FOOTER_SIZE, FORMAT_VERSION, HEADER_SIZE,
};
use crate::registry::CodecRegistry;

/// Random-access reader for block-codec files.
///
/// Opening reads the header, resolves the codec from the stored method byte
/// through the registry, then loads the whole block index. [`read_block`]
/// seeks straight to one frame and decodes only that frame.
///
/// [`read_block`]: Reader::read_block
pub struct Reader {
    file: File,
    pub header: FileHeader,
    entries: Vec<BlockEntry>,
    codec: CodecPtr,
}

impl Reader {
    pub fn open(path: impl AsRef<Path>, registry: &CodecRegistry) -> Result<Self> {
        let mut file = File::open(path)?;

        let mut header_buf = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header_buf)?;
        let header = FileHeader::from_bytes(&header_buf)?;
        if header.version != FORMAT_VERSION {
            return Err(CodecError::CorruptBlock(format!(
                "unsupported format version {} (only {FORMAT_VERSION} is supported)",
                header.version
            )));
        }
        if header.block_size == 0 {
            return Err(CodecError::CorruptBlock("file header has a zero block size".into()));
        }
        let codec = registry.get_by_method(header.method_byte)?;

        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer_buf = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer_buf)?;
        let index_offset = u64::from_le_bytes(footer_buf);

        let index_end = header
            .block_count
            .checked_mul(BLOCK_ENTRY_SIZE)
            .and_then(|index_len| index_len.checked_add(index_offset));
        if index_offset < HEADER_SIZE || index_end != Some(file_len - FOOTER_SIZE) {
            return Err(CodecError::CorruptBlock(format!(
                "index of {} blocks at offset {index_offset} does not fit a {file_len}-byte file",
                header.block_count
            )));
        }

        file.seek(SeekFrom::Start(index_offset))?;
        let mut entries = Vec::with_capacity(header.block_count as usize);
        let mut entry_buf = [0u8; BLOCK_ENTRY_SIZE as usize];
        for idx in 0..header.block_count {
            file.read_exact(&mut entry_buf)?;
            let entry = BlockEntry::from_bytes(&entry_buf);
            let frame_end = entry.offset.checked_add(entry.frame_len as u64);
            if entry.offset < HEADER_SIZE || frame_end.map_or(true, |end| end > index_offset) {
                return Err(CodecError::CorruptBlock(format!(
                    "block {idx} at offset {} overruns the data section",
                    entry.offset
                )));
            }
            entries.push(entry);
        }

        Ok(Self {
            file,
            header,
            entries,
            codec,
        })
    }

    /// The codec rebuilt from the file's method byte.
    pub fn codec(&self) -> &CodecPtr {
        &self.codec
    }

    #[inline]
    pub fn block_count(&self) -> u64 {
        self.header.block_count
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    pub fn raw_size(&self) -> u64 {
        self.entries.iter().map(|e| e.raw_len as u64).sum()
    }

    /// Total size of all block frames, headers included.
    pub fn compressed_size(&self) -> u64 {
        self.entries.iter().map(|e| e.frame_len as u64).sum()
    }

    pub fn ratio(&self) -> f64 {
        let compressed = self.compressed_size();
        if compressed == 0 {
            return 1.0;
        }
        self.raw_size() as f64 / compressed as f64
    }

    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    /// Decompress block `idx`, touching no other block.
    pub fn read_block(&mut self, idx: u64) -> Result<Vec<u8>> {
        let entry = self.entries.get(idx as usize).cloned().ok_or_else(|| {
            CodecError::CorruptBlock(format!(
                "block index {idx} out of range (total {})",
                self.header.block_count
            ))
        })?;

        self.file.seek(SeekFrom::Start(entry.offset))?;
        let mut frame = vec![0u8; entry.frame_len as usize];
        self.file.read_exact(&mut frame)?;

        let (block, payload) = split_block(&frame)?;
        if block.method_byte != self.codec.method_byte() {
            return Err(CodecError::CorruptBlock(format!(
                "block {idx} uses method 0x{:02x} but the file header says 0x{:02x}",
                block.method_byte,
                self.codec.method_byte()
            )));
        }
        if block.uncompressed_size != entry.raw_len {
            return Err(CodecError::CorruptBlock(format!(
                "block {idx} header says {} raw bytes but the index says {}",
                block.uncompressed_size, entry.raw_len
            )));
        }

        self.codec.decompress_to_vec(payload, entry.raw_len as usize)
    }

    /// Decompress exactly the raw bytes `[start, start + len)`, clamped to
    /// the end of the data, decoding only the blocks that cover them.
    pub fn read_range(&mut self, start: u64, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let raw_total = self.raw_size();
        if start >= raw_total {
            return Err(CodecError::CorruptBlock(format!(
                "range start {start} is beyond raw size {raw_total}"
            )));
        }

        let end = start.saturating_add(len).min(raw_total);
        let block_size = self.header.block_size as u64;
        let first_block = start / block_size;
        let last_block = (end - 1) / block_size;

        let mut result = Vec::with_capacity((end - start) as usize);
        for block_idx in first_block..=last_block {
            let block_raw = self.read_block(block_idx)?;
            let block_start = block_idx * block_size;
            let to = ((end - block_start) as usize).min(block_raw.len());
            let from = (start.saturating_sub(block_start) as usize).min(to);
            result.extend_from_slice(&block_raw[from..to]);
        }
        Ok(result)
    }
}
