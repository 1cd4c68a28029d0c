//! Turning raw descriptor arguments into bounds-checked parameters.
//!
//! Every check here runs inside a registry constructor, so a bad descriptor
//! fails before the codec exists.

use std::ops::RangeInclusive;

use crate::capability::Capabilities;
use crate::error::{CodecError, Param, Result};

/// A compression level already checked against its backend range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(i32);

impl CompressionLevel {
    pub fn get(self) -> i32 {
        self.0
    }
}

/// Base-2 log of the long-range match window. Zero means "backend default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLog(u32);

impl WindowLog {
    pub const BACKEND_DEFAULT: WindowLog = WindowLog(0);

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_backend_default(self) -> bool {
        self.0 == 0
    }
}

/// Validated parameters for a level/window backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    pub level: CompressionLevel,
    /// `Some` only when the descriptor carried a second argument, including
    /// an explicit zero.
    pub window_log: Option<WindowLog>,
}

impl CodecParams {
    /// Effective parameters in descriptor order.
    pub fn descriptor_params(&self) -> Vec<u64> {
        let mut params = vec![self.level.get() as u64];
        if let Some(window_log) = self.window_log {
            params.push(window_log.get() as u64);
        }
        params
    }
}

/// Argument rules of one codec family.
#[derive(Debug, Clone)]
pub struct ParamRules {
    /// Largest accepted argument count; at most 2 (level, window log).
    pub max_args: usize,
    pub default_level: i32,
    /// Narrower level range for restricted variants; `None` asks the backend.
    pub level_range: Option<RangeInclusive<i64>>,
}

impl ParamRules {
    pub fn level_and_window(default_level: i32) -> Self {
        Self {
            max_args: 2,
            default_level,
            level_range: None,
        }
    }

    pub fn level_only(default_level: i32) -> Self {
        Self {
            max_args: 1,
            default_level,
            level_range: None,
        }
    }

    pub fn with_level_range(mut self, range: RangeInclusive<i64>) -> Self {
        self.level_range = Some(range);
        self
    }

    /// Validate `args` in order: count, then level, then window log.
    pub fn validate(&self, codec: &str, args: &[u64], caps: &dyn Capabilities) -> Result<CodecParams> {
        check_arg_count(codec, args, self.max_args)?;

        let level = match args.first() {
            None => CompressionLevel(self.default_level),
            Some(&given) => {
                let range = self.level_range.clone().unwrap_or_else(|| caps.level_range());
                validate_level(codec, given, range)?
            }
        };

        let window_log = match args.get(1) {
            None => None,
            Some(&given) => Some(validate_window_log(codec, given, caps)?),
        };

        Ok(CodecParams { level, window_log })
    }
}

/// Fail with a syntax error when more than `max` arguments were given.
pub fn check_arg_count(codec: &str, args: &[u64], max: usize) -> Result<()> {
    if args.len() <= max {
        return Ok(());
    }
    let msg = match max {
        0 => format!("{codec} codec does not take parameters, given {}", args.len()),
        1 => format!("{codec} codec must have 1 parameter, given {}", args.len()),
        _ => format!("{codec} codec must have 1 or {max} parameters, given {}", args.len()),
    };
    Err(CodecError::Syntax(msg))
}

pub fn validate_level(codec: &str, given: u64, range: RangeInclusive<i64>) -> Result<CompressionLevel> {
    match i64::try_from(given).ok().filter(|level| range.contains(level)) {
        Some(level) => Ok(CompressionLevel(level as i32)),
        None => Err(CodecError::ParameterOutOfRange {
            codec: codec.to_string(),
            param: Param::Level,
            min: *range.start(),
            max: *range.end(),
            given,
        }),
    }
}

/// Zero always passes. The bounds are queried first, so a backend without a
/// window tunable rejects even the zero sentinel.
pub fn validate_window_log(codec: &str, given: u64, caps: &dyn Capabilities) -> Result<WindowLog> {
    let bounds = caps.window_log_bounds()?;
    if given == 0 {
        return Ok(WindowLog::BACKEND_DEFAULT);
    }
    match i64::try_from(given).ok().filter(|log| bounds.contains(log)) {
        Some(log) => Ok(WindowLog(log as u32)),
        None => Err(CodecError::ParameterOutOfRange {
            codec: codec.to_string(),
            param: Param::WindowLog,
            min: *bounds.start(),
            max: *bounds.end(),
            given,
        }),
    }
}
