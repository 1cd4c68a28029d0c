use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::codec::CodecPtr;
use crate::descriptor::CodecDescriptor;
use crate::error::{CodecError, Result};

/// Builds a codec from raw descriptor arguments. Validation happens inside.
pub type Constructor = Box<dyn Fn(&[u64]) -> Result<CodecPtr> + Send + Sync>;

struct Entry {
    name: String,
    method_byte: Option<u8>,
    constructor: Constructor,
}

/// Name and method-byte table of codec constructors.
///
/// Lookup by name serves configuration text; lookup by method byte serves
/// block decoding, where only the header byte is known. Entries are only
/// ever added, normally once at startup; share the finished registry
/// behind `&` or an `Arc`.
#[derive(Default)]
pub struct CodecRegistry {
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
    by_method: HashMap<u8, usize>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` under `name` and, if given, `method_byte`.
    ///
    /// An entry without a method byte is reachable by name only; its codecs
    /// write some other registered codec's byte.
    pub fn register<F>(&mut self, name: &str, method_byte: Option<u8>, constructor: F) -> Result<()>
    where
        F: Fn(&[u64]) -> Result<CodecPtr> + Send + Sync + 'static,
    {
        if self.by_name.contains_key(name) {
            return Err(CodecError::AlreadyRegistered(name.to_string()));
        }
        if let Some(byte) = method_byte {
            if let Some(&idx) = self.by_method.get(&byte) {
                return Err(CodecError::AlreadyRegistered(format!(
                    "method byte 0x{byte:02x} (held by {})",
                    self.entries[idx].name
                )));
            }
        }

        let idx = self.entries.len();
        self.entries.push(Entry {
            name: name.to_string(),
            method_byte,
            constructor: Box::new(constructor),
        });
        self.by_name.insert(name.to_string(), idx);
        if let Some(byte) = method_byte {
            self.by_method.insert(byte, idx);
        }
        debug!(codec = name, method_byte = ?method_byte, "registered codec");
        Ok(())
    }

    /// Construct the codec registered as `name` from raw arguments.
    pub fn get(&self, name: &str, args: &[u64]) -> Result<CodecPtr> {
        let idx = self
            .by_name
            .get(name)
            .ok_or_else(|| CodecError::UnknownCodec(name.to_string()))?;
        (self.entries[*idx].constructor)(args)
    }

    /// Construct a codec from descriptor text such as `ZSTD(3, 27)`.
    pub fn get_by_text(&self, text: &str) -> Result<CodecPtr> {
        let (name, args) = CodecDescriptor::parse_text(text)?;
        self.get(&name, &args)
    }

    /// Construct a decompressor for a persisted block from its method byte
    /// alone. The codec is built with default arguments, which never affect
    /// decompression.
    pub fn get_by_method(&self, method_byte: u8) -> Result<CodecPtr> {
        let idx = self
            .by_method
            .get(&method_byte)
            .ok_or(CodecError::UnknownMethod(method_byte))?;
        (self.entries[*idx].constructor)(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registered names with their method bytes, in registration order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, Option<u8>)> {
        self.entries.iter().map(|e| (e.name.as_str(), e.method_byte))
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::Codec;
    use crate::params::check_arg_count;

    struct Verbatim {
        descriptor: CodecDescriptor,
    }

    impl Codec for Verbatim {
        fn method_byte(&self) -> u8 {
            self.descriptor.method_byte()
        }

        fn descriptor(&self) -> &CodecDescriptor {
            &self.descriptor
        }

        fn max_compressed_size(&self, source_size: usize) -> usize {
            source_size
        }

        fn compress(&self, source: &[u8], dest: &mut [u8]) -> Result<usize> {
            dest[..source.len()].copy_from_slice(source);
            Ok(source.len())
        }

        fn decompress(&self, source: &[u8], dest: &mut [u8]) -> Result<()> {
            dest.copy_from_slice(source);
            Ok(())
        }
    }

    fn copy_registry(calls: Arc<AtomicUsize>) -> CodecRegistry {
        let mut registry = CodecRegistry::new();
        registry
            .register("COPY", Some(0x42), move |args| {
                calls.fetch_add(1, Ordering::SeqCst);
                check_arg_count("COPY", args, 0)?;
                Ok(Arc::new(Verbatim {
                    descriptor: CodecDescriptor::new("COPY", 0x42, vec![]),
                }))
            })
            .unwrap();
        registry
    }

    #[test]
    fn lookup_by_name_text_and_method() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = copy_registry(calls.clone());

        assert_eq!(registry.get("COPY", &[]).unwrap().method_byte(), 0x42);
        assert_eq!(registry.get_by_text("COPY()").unwrap().name(), "COPY");
        assert_eq!(registry.get_by_method(0x42).unwrap().name(), "COPY");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn constructor_errors_propagate() {
        let registry = copy_registry(Arc::new(AtomicUsize::new(0)));
        let err = registry.get_by_text("COPY(1)").unwrap_err();
        assert!(matches!(err, CodecError::Syntax(_)));
        assert!(err.is_construction_error());
    }

    #[test]
    fn unknown_lookups_fail() {
        let registry = copy_registry(Arc::new(AtomicUsize::new(0)));
        assert!(matches!(registry.get("NOPE", &[]), Err(CodecError::UnknownCodec(_))));
        assert!(matches!(registry.get_by_method(0x01), Err(CodecError::UnknownMethod(0x01))));
    }

    #[test]
    fn duplicate_name_or_method_is_rejected() {
        let mut registry = copy_registry(Arc::new(AtomicUsize::new(0)));
        let dup_name = registry.register("COPY", None, |_| Err(CodecError::UnknownCodec("x".into())));
        assert!(matches!(dup_name, Err(CodecError::AlreadyRegistered(_))));
        let dup_byte = registry.register("OTHER", Some(0x42), |_| Err(CodecError::UnknownCodec("x".into())));
        assert!(matches!(dup_byte, Err(CodecError::AlreadyRegistered(_))));
        assert!(!registry.contains("OTHER"));
    }

    #[test]
    fn name_only_entries_are_not_reachable_by_method() {
        let mut registry = copy_registry(Arc::new(AtomicUsize::new(0)));
        registry
            .register("COPY_ALIAS", None, |_| {
                Ok(Arc::new(Verbatim {
                    descriptor: CodecDescriptor::new("COPY_ALIAS", 0x42, vec![]),
                }))
            })
            .unwrap();
        assert_eq!(registry.get_by_method(0x42).unwrap().name(), "COPY");
        let names: Vec<_> = registry.entries().collect();
        assert_eq!(names, vec![("COPY", Some(0x42)), ("COPY_ALIAS", None)]);
    }
}
