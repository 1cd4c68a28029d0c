pub mod capability;
pub mod codec;
pub mod descriptor;
pub mod error;
pub mod format;
pub mod params;
pub mod reader;
pub mod registry;
pub mod writer;

pub use capability::Capabilities;
pub use codec::{Codec, CodecPtr};
pub use descriptor::CodecDescriptor;
pub use error::{CodecError, Param, Result};
pub use format::{decode_block, encode_block, BlockHeader, FileHeader, BLOCK_HEADER_SIZE, HEADER_SIZE, MAGIC};
pub use params::{CodecParams, CompressionLevel, ParamRules, WindowLog};
pub use reader::Reader;
pub use registry::CodecRegistry;
pub use writer::Writer;

pub use xxhash_rust::xxh3::Xxh3;
