use std::ops::RangeInclusive;
use std::sync::Arc;

use blockcodec_core::format::METHOD_ZSTD;
use blockcodec_core::{
    Capabilities, Codec, CodecDescriptor, CodecError, CodecParams, CodecPtr, CodecRegistry, Param, ParamRules,
    Result,
};
use zstd_safe::{CCtx, CParameter};

pub const ZSTD_CODEC_NAME: &str = "ZSTD";

/// Level used when the descriptor carries no arguments.
pub const ZSTD_DEFAULT_LEVEL: i32 = 1;

/// Bounds as reported by the linked libzstd.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdBackend;

impl Capabilities for ZstdBackend {
    fn backend(&self) -> &str {
        "zstd"
    }

    fn level_range(&self) -> RangeInclusive<i64> {
        1..=*zstd::compression_level_range().end() as i64
    }

    fn window_log_bounds(&self) -> Result<RangeInclusive<i64>> {
        // SAFETY: both calls are pure queries on static library tables.
        let (bounds, is_error) = unsafe {
            let bounds = zstd_sys::ZSTD_cParam_getBounds(zstd_sys::ZSTD_cParameter::ZSTD_c_windowLog);
            (bounds, zstd_sys::ZSTD_isError(bounds.error) != 0)
        };
        if is_error {
            return Err(CodecError::UnsupportedCapability {
                codec: self.backend().to_string(),
                param: Param::WindowLog,
                reason: zstd_safe::get_error_name(bounds.error).to_string(),
            });
        }
        Ok(bounds.lowerBound as i64..=bounds.upperBound as i64)
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        zstd_safe::compress_bound(source_size)
    }
}

/// Zstandard block codec.
///
/// A fresh compression context is created per call, so the codec holds no
/// mutable state and can be shared across threads. A second descriptor
/// argument turns on long-distance matching with that window log (zero
/// keeps libzstd's default window).
#[derive(Debug, Clone)]
pub struct ZstdCodec {
    level: i32,
    long_range_window: Option<u32>,
    descriptor: CodecDescriptor,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(ZSTD_DEFAULT_LEVEL)
    }
}

impl ZstdCodec {
    /// `level` is not range-checked here; use [`ZstdCodec::from_args`] for
    /// descriptor input.
    pub fn new(level: i32) -> Self {
        Self {
            level,
            long_range_window: None,
            descriptor: CodecDescriptor::new(ZSTD_CODEC_NAME, METHOD_ZSTD, vec![level as u64]),
        }
    }

    pub fn with_long_range(level: i32, window_log: u32) -> Self {
        Self {
            level,
            long_range_window: Some(window_log),
            descriptor: CodecDescriptor::new(ZSTD_CODEC_NAME, METHOD_ZSTD, vec![level as u64, window_log as u64]),
        }
    }

    /// Build from raw descriptor arguments: `()`, `(level)` or
    /// `(level, window_log)`.
    pub fn from_args(args: &[u64]) -> Result<Self> {
        let params = ParamRules::level_and_window(ZSTD_DEFAULT_LEVEL).validate(ZSTD_CODEC_NAME, args, &ZstdBackend)?;
        Ok(Self::from_params(params))
    }

    fn from_params(params: CodecParams) -> Self {
        match params.window_log {
            Some(window_log) => Self::with_long_range(params.level.get(), window_log.get()),
            None => Self::new(params.level.get()),
        }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn long_range_window(&self) -> Option<u32> {
        self.long_range_window
    }
}

fn set_parameter(cctx: &mut CCtx<'_>, param: CParameter) -> Result<()> {
    cctx.set_parameter(param)
        .map(|_| ())
        .map_err(|code| CodecError::compression(ZSTD_CODEC_NAME, zstd_safe::get_error_name(code)))
}

fn compress_with(cctx: &mut CCtx<'_>, source: &[u8], dest: &mut [u8]) -> Result<usize> {
    cctx.compress2(dest, source)
        .map_err(|code| CodecError::compression(ZSTD_CODEC_NAME, zstd_safe::get_error_name(code)))
}

impl Codec for ZstdCodec {
    fn method_byte(&self) -> u8 {
        METHOD_ZSTD
    }

    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn max_compressed_size(&self, source_size: usize) -> usize {
        ZstdBackend.max_compressed_size(source_size)
    }

    fn compress(&self, source: &[u8], dest: &mut [u8]) -> Result<usize> {
        let mut cctx = CCtx::try_create()
            .ok_or_else(|| CodecError::compression(ZSTD_CODEC_NAME, "cannot allocate compression context"))?;
        set_parameter(&mut cctx, CParameter::CompressionLevel(self.level))?;
        if let Some(window_log) = self.long_range_window {
            set_parameter(&mut cctx, CParameter::EnableLongDistanceMatching(true))?;
            // zero window log means "use default" for libzstd
            set_parameter(&mut cctx, CParameter::WindowLog(window_log))?;
        }
        compress_with(&mut cctx, source, dest)
    }

    fn decompress(&self, source: &[u8], dest: &mut [u8]) -> Result<()> {
        let expected = dest.len();
        let written = zstd_safe::decompress(dest, source)
            .map_err(|code| CodecError::decompression(ZSTD_CODEC_NAME, zstd_safe::get_error_name(code)))?;
        if written != expected {
            return Err(CodecError::decompression(
                ZSTD_CODEC_NAME,
                format!("decoded {written} bytes, expected {expected}"),
            ));
        }
        Ok(())
    }
}

pub fn register_zstd(registry: &mut CodecRegistry) -> Result<()> {
    registry.register(ZSTD_CODEC_NAME, Some(METHOD_ZSTD), |args| {
        let codec: CodecPtr = Arc::new(ZstdCodec::from_args(args)?);
        Ok(codec)
    })
}
