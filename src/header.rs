//! Container file header.
//!
//! # Layout
//! ```text
//! 0   4   magic  "Obj" 0x01
//! 4   ..  metadata, encoded as map<bytes>
//! ..  16  sync marker
//! ```
//! Metadata always holds `avro.schema` (the writer schema's canonical text)
//! and usually `avro.codec`.  Keys beginning with `avro.` are reserved; any
//! other key is user metadata.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use byteorder::ReadBytesExt;
use thiserror::Error;
use uuid::Uuid;

use crate::binary::{write_bytes, write_long, write_string};
use crate::block::read_long;
use crate::codec;

pub const MAGIC: &[u8; 3] = b"Obj";
pub const VERSION: u8 = 1;
pub const SYNC_SIZE: usize = 16;

pub const SCHEMA_KEY: &str = "avro.schema";
pub const CODEC_KEY: &str = "avro.codec";
pub const RESERVED_PREFIX: &str = "avro.";

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Invalid magic number")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),
    #[error("Header has no 'avro.schema' entry")]
    MissingSchema,
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("Metadata key '{0}' is reserved")]
    ReservedKey(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub metadata: BTreeMap<String, Vec<u8>>,
    pub sync:     [u8; SYNC_SIZE],
}

impl FileHeader {
    /// New header with a freshly generated sync marker.
    pub fn new(schema_text: &str, codec_name: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(SCHEMA_KEY.to_owned(), schema_text.as_bytes().to_vec());
        metadata.insert(CODEC_KEY.to_owned(), codec_name.as_bytes().to_vec());
        Self { metadata, sync: Uuid::new_v4().into_bytes() }
    }

    /// Add a user entry.  Reserved `avro.` keys are refused.
    pub fn set_user(&mut self, key: &str, value: Vec<u8>) -> Result<(), HeaderError> {
        if key.starts_with(RESERVED_PREFIX) {
            return Err(HeaderError::ReservedKey(key.to_owned()));
        }
        self.metadata.insert(key.to_owned(), value);
        Ok(())
    }

    pub fn schema_text(&self) -> Result<&str, HeaderError> {
        let raw = self.metadata.get(SCHEMA_KEY).ok_or(HeaderError::MissingSchema)?;
        std::str::from_utf8(raw).map_err(|_| HeaderError::InvalidMetadata(format!("'{SCHEMA_KEY}' is not UTF-8")))
    }

    /// Codec name; an absent entry means `null`.
    pub fn codec_name(&self) -> Result<&str, HeaderError> {
        match self.metadata.get(CODEC_KEY) {
            None => Ok(codec::NULL),
            Some(raw) => std::str::from_utf8(raw)
                .map_err(|_| HeaderError::InvalidMetadata(format!("'{CODEC_KEY}' is not UTF-8"))),
        }
    }

    /// Entries outside the reserved namespace.
    pub fn user_metadata(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.metadata
            .iter()
            .filter(|(k, _)| !k.starts_with(RESERVED_PREFIX))
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.metadata.values().map(Vec::len).sum::<usize>());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        if !self.metadata.is_empty() {
            write_long(self.metadata.len() as i64, &mut out);
            for (k, v) in &self.metadata {
                write_string(k, &mut out);
                write_bytes(v, &mut out);
            }
        }
        write_long(0, &mut out);
        out.extend_from_slice(&self.sync);
        out
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 3];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(HeaderError::InvalidMagic);
        }
        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }

        let mut metadata = BTreeMap::new();
        loop {
            let count = read_long(&mut reader)?;
            if count == 0 {
                break;
            }
            if count == i64::MIN {
                return Err(HeaderError::InvalidMetadata("invalid block count".into()));
            }
            if count < 0 {
                // Byte size of the block; entries are read one by one anyway.
                read_long(&mut reader)?;
            }
            for _ in 0..count.unsigned_abs() {
                let key = String::from_utf8(read_sized(&mut reader)?)
                    .map_err(|_| HeaderError::InvalidMetadata("key is not UTF-8".into()))?;
                let value = read_sized(&mut reader)?;
                metadata.insert(key, value);
            }
        }

        let mut sync = [0u8; SYNC_SIZE];
        reader.read_exact(&mut sync)?;
        let header = Self { metadata, sync };
        header.schema_text()?;
        Ok(header)
    }
}

/// Read a length-prefixed byte string without trusting the length for
/// allocation.
fn read_sized<R: Read>(reader: &mut R) -> Result<Vec<u8>, HeaderError> {
    let len = read_long(reader)?;
    if len < 0 {
        return Err(HeaderError::InvalidMetadata(format!("negative length {len}")));
    }
    let mut buf = Vec::new();
    let got = reader.take(len as u64).read_to_end(&mut buf)?;
    if (got as u64) < len as u64 {
        return Err(HeaderError::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(buf)
}
