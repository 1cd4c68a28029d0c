use std::ops::RangeInclusive;
use std::sync::Arc;

use blockcodec_core::format::METHOD_DEFLATE;
use blockcodec_core::{
    Capabilities, Codec, CodecDescriptor, CodecError, CodecPtr, CodecRegistry, Param, ParamRules, Result,
};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

pub const DEFLATE_CODEC_NAME: &str = "DEFLATE";

pub const DEFLATE_DEFAULT_LEVEL: i32 = 6;

/// Raw deflate through `flate2`. The window is fixed at 32 KiB; flate2 only
/// exposes window bits with a zlib backend, so the tunable is reported as
/// unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateBackend;

impl Capabilities for DeflateBackend {
    fn backend(&self) -> &str {
        "flate2"
    }

    fn level_range(&self) -> RangeInclusive<i64> {
        1..=Compression::best().level() as i64
    }

    fn window_log_bounds(&self) -> Result<RangeInclusive<i64>> {
        Err(CodecError::UnsupportedCapability {
            codec: self.backend().to_string(),
            param: Param::WindowLog,
            reason: "window bits are not configurable".into(),
        })
    }

    /// miniz_oxide, flate2's default backend, only falls back to a stored
    /// block while the block is still inside its 32 KiB window, so larger
    /// incompressible blocks stay entropy coded. That costs at most 9 bits a
    /// literal, plus a dynamic block header (under 320 bytes) per 16 KiB.
    fn max_compressed_size(&self, source_size: usize) -> usize {
        source_size + (source_size >> 3) + ((source_size >> 14) + 1) * 320 + 16
    }
}

#[derive(Debug, Clone)]
pub struct DeflateCodec {
    level: u32,
    descriptor: CodecDescriptor,
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self::new(DEFLATE_DEFAULT_LEVEL as u32)
    }
}

impl DeflateCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level,
            descriptor: CodecDescriptor::new(DEFLATE_CODEC_NAME, METHOD_DEFLATE, vec![level as u64]),
        }
    }

    /// `()`, `(level)`; a window argument is rejected by the backend.
    pub fn from_args(args: &[u64]) -> Result<Self> {
        let params = ParamRules::level_and_window(DEFLATE_DEFAULT_LEVEL).validate(
            DEFLATE_CODEC_NAME,
            args,
            &DeflateBackend,
        )?;
        Ok(Self::new(params.level.get() as u32))
    }
}

impl Codec for DeflateCodec {
    fn method_byte(&self) -> u8 {
        METHOD_DEFLATE
    }

    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        DeflateBackend.max_compressed_size(source_size)
    }

    fn compress(&self, source: &[u8], dest: &mut [u8]) -> Result<usize> {
        let mut encoder = Compress::new(Compression::new(self.level), false);
        let status = encoder
            .compress(source, dest, FlushCompress::Finish)
            .map_err(|e| CodecError::compression(DEFLATE_CODEC_NAME, e))?;
        if status != Status::StreamEnd {
            return Err(CodecError::compression(DEFLATE_CODEC_NAME, "destination buffer too small"));
        }
        Ok(encoder.total_out() as usize)
    }

    fn decompress(&self, source: &[u8], dest: &mut [u8]) -> Result<()> {
        // Reaching stream end needs room to make progress; an empty block
        // still has to prove the stream produces nothing.
        let mut scratch = [0u8; 1];
        let expected = dest.len();
        let out: &mut [u8] = if dest.is_empty() { &mut scratch } else { dest };

        let mut decoder = Decompress::new(false);
        let status = decoder
            .decompress(source, out, FlushDecompress::Finish)
            .map_err(|e| CodecError::decompression(DEFLATE_CODEC_NAME, e))?;
        let written = decoder.total_out() as usize;
        if status != Status::StreamEnd || written != expected {
            return Err(CodecError::decompression(
                DEFLATE_CODEC_NAME,
                format!("decoded {written} bytes without a complete stream, expected {expected}"),
            ));
        }
        Ok(())
    }
}

pub fn register_deflate(registry: &mut CodecRegistry) -> Result<()> {
    registry.register(DEFLATE_CODEC_NAME, Some(METHOD_DEFLATE), |args| {
        let codec: CodecPtr = Arc::new(DeflateCodec::from_args(args)?);
        Ok(codec)
    })
}
