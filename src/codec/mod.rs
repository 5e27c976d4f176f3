//! Block compression codecs, identified by name.
//!
//! # Identity rules
//! A container file records its codec as a UTF-8 name under the
//! `avro.codec` metadata key.  That name is the only identity a codec has:
//!   - The writer stores it once, in the header.
//!   - The reader looks it up in a [`CodecRegistry`] when the file is opened.
//!   - An absent key means `null`.
//!
//! A reader that cannot supply the named codec fails at open time; there is
//! no fallback to another codec.

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use thiserror::Error;

// ── Built-in names ───────────────────────────────────────────────────────────

/// Payload stored verbatim.
pub const NULL: &str = "null";
/// Raw DEFLATE (RFC 1951), no zlib or gzip framing.
pub const DEFLATE: &str = "deflate";
/// Zstandard frames.
pub const ZSTANDARD: &str = "zstandard";
/// XZ container around LZMA2.
pub const XZ: &str = "xz";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    /// The file names a codec this registry does not provide.  Reading MUST
    /// NOT continue.
    #[error("Codec '{name}' is not available")]
    UnknownCodec { name: String },
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    /// Name stored in the `avro.codec` metadata entry.
    fn name(&self) -> &str;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct NullCodec;
impl Codec for NullCodec {
    fn name(&self) -> &str { NULL }
    fn compress(&self, data: &[u8])   -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    /// 0 (store) to 9 (best).
    pub level: u32,
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl Codec for DeflateCodec {
    fn name(&self) -> &str { DEFLATE }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut enc = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(self.level.min(9)));
        enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        DeflateDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZstandardCodec {
    pub level: i32,
}

impl Default for ZstandardCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl Codec for ZstandardCodec {
    fn name(&self) -> &str { ZSTANDARD }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, self.level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XzCodec;
impl Codec for XzCodec {
    fn name(&self) -> &str { XZ }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::xz_compress(&mut Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::xz_decompress(&mut Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Name → codec table consulted when a container is opened or created.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Empty registry; even `null` must be registered.
    pub fn empty() -> Self {
        Self { codecs: HashMap::new() }
    }

    /// Registry holding `null`, `deflate`, `zstandard` and `xz`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register(Arc::new(NullCodec));
        reg.register(Arc::new(DeflateCodec::default()));
        reg.register(Arc::new(ZstandardCodec::default()));
        reg.register(Arc::new(XzCodec));
        reg
    }

    /// Add or replace the codec registered under `codec.name()`.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> &mut Self {
        self.codecs.insert(codec.name().to_owned(), codec);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Codec>, CodecError> {
        self.codecs
            .get(name)
            .cloned()
            .ok_or_else(|| CodecError::UnknownCodec { name: name.to_owned() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry").field("codecs", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"records records records, with a little variety 0123456789".repeat(40)
    }

    #[test]
    fn builtins_roundtrip() {
        let data = sample();
        let reg = CodecRegistry::with_builtins();
        for name in reg.names() {
            let codec = reg.get(name).unwrap();
            let packed = codec.compress(&data).unwrap();
            assert_eq!(codec.decompress(&packed).unwrap(), data, "codec {name}");
        }
    }

    #[test]
    fn compressing_codecs_shrink_repetitive_input() {
        let data = sample();
        let reg = CodecRegistry::with_builtins();
        for name in [DEFLATE, ZSTANDARD, XZ] {
            let packed = reg.get(name).unwrap().compress(&data).unwrap();
            assert!(packed.len() < data.len(), "{name} did not compress");
        }
    }

    #[test]
    fn deflate_is_raw() {
        // zlib streams start with 0x78; raw deflate at level 6 does not.
        let packed = DeflateCodec::default().compress(b"hello hello hello").unwrap();
        assert_ne!(packed[0], 0x78);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = CodecRegistry::with_builtins().get("snappy").err().unwrap();
        assert!(matches!(err, CodecError::UnknownCodec { ref name } if name == "snappy"));
        assert!(CodecRegistry::empty().get(NULL).is_err());
    }

    #[test]
    fn custom_codec_registers_by_name() {
        struct Reverse;
        impl Codec for Reverse {
            fn name(&self) -> &str { "reverse" }
            fn compress(&self, d: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(d.iter().rev().copied().collect()) }
            fn decompress(&self, d: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(d.iter().rev().copied().collect()) }
        }
        let mut reg = CodecRegistry::empty();
        reg.register(Arc::new(Reverse));
        assert!(reg.contains("reverse"));
        assert!(!reg.contains(NULL));
        assert_eq!(reg.get("reverse").unwrap().compress(b"abc").unwrap(), b"cba");
    }

    #[test]
    fn corrupt_payload_fails_to_decompress() {
        let garbage = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x11];
        assert!(ZstandardCodec::default().decompress(&garbage).is_err());
        assert!(XzCodec.decompress(&garbage).is_err());
    }
}
