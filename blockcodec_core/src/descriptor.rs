use std::fmt;

use xxhash_rust::xxh3::Xxh3;

use crate::error::{CodecError, Result};

/// Canonical identity of a configured codec: its registry name, the method
/// byte it writes into block headers, and its effective parameters in order.
///
/// Built once when the codec is constructed and never changed afterwards.
/// Two codecs with the same name and parameter list are interchangeable, and
/// [`contribute_hash`](Self::contribute_hash) feeds exactly those two things
/// into a running hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    name: String,
    method_byte: u8,
    params: Vec<u64>,
}

impl CodecDescriptor {
    pub fn new(name: impl Into<String>, method_byte: u8, params: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            method_byte,
            params,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_byte(&self) -> u8 {
        self.method_byte
    }

    pub fn params(&self) -> &[u64] {
        &self.params
    }

    /// Feed the canonical form into `hasher`.
    ///
    /// Layout: name length (u64 LE), name bytes, parameter count (u64 LE),
    /// then every parameter as u64 LE. Length prefixes keep `AB(1)` and
    /// `A(1)` with a differently split name from colliding.
    pub fn contribute_hash(&self, hasher: &mut Xxh3) {
        hasher.update(&(self.name.len() as u64).to_le_bytes());
        hasher.update(self.name.as_bytes());
        hasher.update(&(self.params.len() as u64).to_le_bytes());
        for param in &self.params {
            hasher.update(&param.to_le_bytes());
        }
    }

    /// Hash of this descriptor alone.
    pub fn hash64(&self) -> u64 {
        let mut hasher = Xxh3::new();
        self.contribute_hash(&mut hasher);
        hasher.digest()
    }

    /// Split descriptor text of the form `NAME` or `NAME(arg, ...)` into the
    /// name and its raw, not yet validated, integer arguments.
    ///
    /// Argument count is not checked here; each codec constructor decides
    /// how many it accepts.
    pub fn parse_text(text: &str) -> Result<(String, Vec<u64>)> {
        let text = text.trim();
        let (name, args) = match text.find('(') {
            None => (text, None),
            Some(open) => {
                let inner = text[open + 1..].strip_suffix(')').ok_or_else(|| {
                    CodecError::Syntax(format!("codec descriptor '{text}' is missing ')'"))
                })?;
                (text[..open].trim_end(), Some(inner))
            }
        };

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CodecError::Syntax(format!(
                "invalid codec name in descriptor '{text}'"
            )));
        }

        let mut parsed = Vec::new();
        if let Some(inner) = args.map(str::trim).filter(|inner| !inner.is_empty()) {
            for arg in inner.split(',') {
                let arg = arg.trim();
                let value = arg.parse::<u64>().map_err(|_| {
                    CodecError::Syntax(format!(
                        "{name} codec argument must be a non-negative integer literal, given '{arg}'"
                    ))
                })?;
                parsed.push(value);
            }
        }

        Ok((name.to_string(), parsed))
    }
}

impl fmt::Display for CodecDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.params.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_name() {
        let (name, args) = CodecDescriptor::parse_text("ZSTD").unwrap();
        assert_eq!(name, "ZSTD");
        assert!(args.is_empty());
    }

    #[test]
    fn parses_arguments_with_whitespace() {
        let (name, args) = CodecDescriptor::parse_text("  ZSTD ( 3 ,27 ) ").unwrap();
        assert_eq!(name, "ZSTD");
        assert_eq!(args, vec![3, 27]);
    }

    #[test]
    fn empty_parens_mean_no_arguments() {
        let (_, args) = CodecDescriptor::parse_text("LZ4()").unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn rejects_non_integer_and_negative_arguments() {
        for text in ["ZSTD(fast)", "ZSTD(-1)", "ZSTD(1,)", "ZSTD(1.5)"] {
            let err = CodecDescriptor::parse_text(text).unwrap_err();
            assert!(matches!(err, CodecError::Syntax(_)), "{text}: {err}");
        }
    }

    #[test]
    fn rejects_unbalanced_or_unnamed() {
        for text in ["ZSTD(3", "(3)", "", "ZS TD"] {
            assert!(CodecDescriptor::parse_text(text).is_err(), "{text}");
        }
    }

    #[test]
    fn display_round_trips_through_parser() {
        let desc = CodecDescriptor::new("ZSTD", 0x90, vec![3, 27]);
        assert_eq!(desc.to_string(), "ZSTD(3, 27)");
        let (name, args) = CodecDescriptor::parse_text(&desc.to_string()).unwrap();
        assert_eq!(name, desc.name());
        assert_eq!(args, desc.params());

        assert_eq!(CodecDescriptor::new("NONE", 0x02, vec![]).to_string(), "NONE");
    }

    #[test]
    fn hash_is_deterministic_and_parameter_sensitive() {
        let a = CodecDescriptor::new("ZSTD", 0x90, vec![3]);
        let b = CodecDescriptor::new("ZSTD", 0x90, vec![3]);
        let c = CodecDescriptor::new("ZSTD", 0x90, vec![3, 0]);
        let d = CodecDescriptor::new("ZSTD", 0x90, vec![4]);
        assert_eq!(a.hash64(), b.hash64());
        assert_ne!(a.hash64(), c.hash64());
        assert_ne!(a.hash64(), d.hash64());
    }

    #[test]
    fn contribution_mixes_into_running_hash() {
        let desc = CodecDescriptor::new("LZ4", 0x82, vec![]);

        let mut first = Xxh3::new();
        first.update(b"block-prefix");
        desc.contribute_hash(&mut first);

        let mut second = Xxh3::new();
        second.update(b"block-prefix");
        desc.contribute_hash(&mut second);

        assert_eq!(first.digest(), second.digest());
        assert_ne!(first.digest(), desc.hash64());
    }
}
