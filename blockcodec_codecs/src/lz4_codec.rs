use std::ops::RangeInclusive;
use std::sync::Arc;

use blockcodec_core::format::METHOD_LZ4;
use blockcodec_core::params::check_arg_count;
use blockcodec_core::{Capabilities, Codec, CodecDescriptor, CodecError, CodecPtr, CodecRegistry, Param, Result};

pub const LZ4_CODEC_NAME: &str = "LZ4";

/// `lz4_flex` has a single speed setting and no window tunable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Backend;

impl Capabilities for Lz4Backend {
    fn backend(&self) -> &str {
        "lz4_flex"
    }

    fn level_range(&self) -> RangeInclusive<i64> {
        1..=1
    }

    fn window_log_bounds(&self) -> Result<RangeInclusive<i64>> {
        Err(CodecError::UnsupportedCapability {
            codec: self.backend().to_string(),
            param: Param::WindowLog,
            reason: "fixed 64 KiB window".into(),
        })
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(source_size)
    }
}

/// LZ4 block codec.
///
/// Fastest decompression of all bundled codecs. Best for hot data where
/// decode speed matters more than size reduction.
#[derive(Debug, Clone)]
pub struct Lz4Codec {
    descriptor: CodecDescriptor,
}

impl Default for Lz4Codec {
    fn default() -> Self {
        Self {
            descriptor: CodecDescriptor::new(LZ4_CODEC_NAME, METHOD_LZ4, Vec::new()),
        }
    }
}

impl Codec for Lz4Codec {
    fn method_byte(&self) -> u8 {
        METHOD_LZ4
    }

    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        Lz4Backend.max_compressed_size(source_size)
    }

    fn compress(&self, source: &[u8], dest: &mut [u8]) -> Result<usize> {
        lz4_flex::block::compress_into(source, dest).map_err(|e| CodecError::compression(LZ4_CODEC_NAME, e))
    }

    fn decompress(&self, source: &[u8], dest: &mut [u8]) -> Result<()> {
        let expected = dest.len();
        let written = lz4_flex::block::decompress_into(source, dest)
            .map_err(|e| CodecError::decompression(LZ4_CODEC_NAME, e))?;
        if written != expected {
            return Err(CodecError::decompression(
                LZ4_CODEC_NAME,
                format!("decoded {written} bytes, expected {expected}"),
            ));
        }
        Ok(())
    }
}

pub fn register_lz4(registry: &mut CodecRegistry) -> Result<()> {
    registry.register(LZ4_CODEC_NAME, Some(METHOD_LZ4), |args| {
        check_arg_count(LZ4_CODEC_NAME, args, 0)?;
        let codec: CodecPtr = Arc::new(Lz4Codec::default());
        Ok(codec)
    })
}
