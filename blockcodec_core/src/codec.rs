use std::fmt;
use std::sync::Arc;

use xxhash_rust::xxh3::Xxh3;

use crate::descriptor::CodecDescriptor;
use crate::error::Result;

/// Core compression abstraction.
///
/// Each `Codec` implementation:
/// - Is identified by a stable `method_byte()` persisted in every block header.
/// - Compresses and decompresses independent buffers; no state carries over
///   from one block to the next.
/// - Carries an immutable [`CodecDescriptor`] fixed at construction.
pub trait Codec: Send + Sync {
    /// Stable numeric identity written into block headers.
    fn method_byte(&self) -> u8;

    fn descriptor(&self) -> &CodecDescriptor;

    fn name(&self) -> &str {
        self.descriptor().name()
    }

    /// Upper bound on `compress` output for `source_size` input bytes.
    /// Callers size destination buffers with it.
    fn max_compressed_size(&self, source_size: usize) -> usize;

    /// Compress `source` into `dest`, returning the number of bytes written.
    ///
    /// `dest` must hold at least `max_compressed_size(source.len())` bytes.
    fn compress(&self, source: &[u8], dest: &mut [u8]) -> Result<usize>;

    /// Decompress `source` into `dest`, whose length is the exact original
    /// size taken from the block header. A stream that does not decode to
    /// exactly `dest.len()` bytes is an error.
    fn decompress(&self, source: &[u8], dest: &mut [u8]) -> Result<()>;

    /// Feed this codec's identity into a running hash.
    fn contribute_hash(&self, hasher: &mut Xxh3) {
        self.descriptor().contribute_hash(hasher);
    }

    fn compress_to_vec(&self, source: &[u8]) -> Result<Vec<u8>> {
        let mut dest = vec![0u8; self.max_compressed_size(source.len())];
        let written = self.compress(source, &mut dest)?;
        dest.truncate(written);
        Ok(dest)
    }

    fn decompress_to_vec(&self, source: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        let mut dest = vec![0u8; uncompressed_size];
        self.decompress(source, &mut dest)?;
        Ok(dest)
    }
}

impl fmt::Debug for dyn Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Codec({}, method 0x{:02x})", self.descriptor(), self.method_byte())
    }
}

pub type CodecPtr = Arc<dyn Codec>;
