mod deflate_codec;
mod lz4_codec;
pub mod offload;
mod passthrough;
mod zstd_codec;

use std::sync::Arc;

pub use deflate_codec::{register_deflate, DeflateBackend, DeflateCodec, DEFLATE_CODEC_NAME};
pub use lz4_codec::{register_lz4, Lz4Backend, Lz4Codec, LZ4_CODEC_NAME};
pub use offload::{
    check_parse, register_offload, Accelerator, DeviceStatus, NoDevice, OffloadCodec, OffloadState, ProducerOutcome,
    Sequence, SequenceProducer, OFFLOAD_CODEC_NAME,
};
pub use passthrough::{register_none, PassThroughCodec, NONE_CODEC_NAME};
pub use zstd_codec::{register_zstd, ZstdBackend, ZstdCodec, ZSTD_CODEC_NAME, ZSTD_DEFAULT_LEVEL};

use blockcodec_core::{CodecRegistry, Result};

/// Register every bundled codec, using `accelerator` for the offload codec.
///
/// Called once at startup; the CLI and tests then resolve codecs from
/// descriptor text or from a block's method byte through the registry.
pub fn register_all(registry: &mut CodecRegistry, accelerator: Arc<dyn Accelerator>) -> Result<()> {
    register_none(registry)?;
    register_lz4(registry)?;
    register_zstd(registry)?;
    register_deflate(registry)?;
    register_offload(registry, accelerator)?;
    Ok(())
}

/// Registry with every bundled codec and no hardware device.
pub fn default_registry() -> Result<CodecRegistry> {
    let mut registry = CodecRegistry::new();
    register_all(&mut registry, Arc::new(NoDevice))?;
    Ok(registry)
}
