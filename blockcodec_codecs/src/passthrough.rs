use std::sync::Arc;

use blockcodec_core::format::METHOD_NONE;
use blockcodec_core::params::check_arg_count;
use blockcodec_core::{Codec, CodecDescriptor, CodecError, CodecPtr, CodecRegistry, Result};

pub const NONE_CODEC_NAME: &str = "NONE";

/// No-op codec: stores blocks verbatim.
///
/// Useful for data that is already compressed, and for checking the block
/// container independently of any real backend.
#[derive(Debug, Clone)]
pub struct PassThroughCodec {
    descriptor: CodecDescriptor,
}

impl Default for PassThroughCodec {
    fn default() -> Self {
        Self {
            descriptor: CodecDescriptor::new(NONE_CODEC_NAME, METHOD_NONE, Vec::new()),
        }
    }
}

impl Codec for PassThroughCodec {
    fn method_byte(&self) -> u8 {
        METHOD_NONE
    }

    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        source_size
    }

    fn compress(&self, source: &[u8], dest: &mut [u8]) -> Result<usize> {
        let target = dest.get_mut(..source.len()).ok_or_else(|| {
            CodecError::compression(NONE_CODEC_NAME, "destination buffer too small")
        })?;
        target.copy_from_slice(source);
        Ok(source.len())
    }

    fn decompress(&self, source: &[u8], dest: &mut [u8]) -> Result<()> {
        if source.len() != dest.len() {
            return Err(CodecError::decompression(
                NONE_CODEC_NAME,
                format!("stored {} bytes, expected {}", source.len(), dest.len()),
            ));
        }
        dest.copy_from_slice(source);
        Ok(())
    }
}

pub fn register_none(registry: &mut CodecRegistry) -> Result<()> {
    registry.register(NONE_CODEC_NAME, Some(METHOD_NONE), |args| {
        check_arg_count(NONE_CODEC_NAME, args, 0)?;
        let codec: CodecPtr = Arc::new(PassThroughCodec::default());
        Ok(codec)
    })
}
