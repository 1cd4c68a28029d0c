use std::fmt;

/// Errors raised while building a codec from its descriptor, while running
/// it, or while decoding a persisted block.
///
/// The first three kinds are construction-time failures: they surface from
/// the registry before any buffer is touched. `Compression` and
/// `Decompression` are per-call and leave the codec usable.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Wrong argument count or malformed descriptor text.
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("{codec} codec {param} must be in [{min}, {max}], given {given}")]
    ParameterOutOfRange {
        codec: String,
        param: Param,
        min: i64,
        max: i64,
        given: u64,
    },

    /// The backend cannot report bounds for a tunable.
    #[error("{codec} {param} parameter is not supported: {reason}")]
    UnsupportedCapability {
        codec: String,
        param: Param,
        reason: String,
    },

    #[error("cannot compress block with {codec}: {reason}")]
    Compression { codec: String, reason: String },

    #[error("cannot decompress block with {codec}: {reason}")]
    Decompression { codec: String, reason: String },

    #[error("unknown codec: {0}")]
    UnknownCodec(String),

    #[error("unknown compression method byte 0x{0:02x}")]
    UnknownMethod(u8),

    #[error("codec {0} is already registered")]
    AlreadyRegistered(String),

    #[error("corrupt block: {0}")]
    CorruptBlock(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Tunable a range check applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Level,
    WindowLog,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Level => f.write_str("level"),
            Param::WindowLog => f.write_str("window log"),
        }
    }
}

impl CodecError {
    pub fn compression(codec: &str, reason: impl fmt::Display) -> Self {
        CodecError::Compression {
            codec: codec.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn decompression(codec: &str, reason: impl fmt::Display) -> Self {
        CodecError::Decompression {
            codec: codec.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for failures raised while turning a descriptor into a codec.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            CodecError::Syntax(_)
                | CodecError::ParameterOutOfRange { .. }
                | CodecError::UnsupportedCapability { .. }
                | CodecError::UnknownCodec(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
