//! Object container files: writer and reader.
//!
//! # Writer
//! [`Writer`] writes the header (schema canonical text, codec name, random
//! sync marker) when created, then buffers encoded records.  Once the buffer
//! reaches `sync_interval` bytes, or `max_block_records` records, the buffer
//! is compressed and written as one block followed by the sync marker.
//! `flush()` and `into_inner()` write a final partial block.
//!
//! # Reader
//! [`Reader`] validates the header and fails at open time if the codec is
//! unknown or the writer schema cannot be resolved against the reader
//! schema.  Blocks are then read one at a time: frame, trailing sync check,
//! decompression, and decoding of every record in the block before the
//! first one is handed out.  A block that fails any step yields an error
//! and no records; the iterator ends after the first error.
//!
//! # Splitting
//! Every block boundary is marked by the file's sync marker, so a reader can
//! start at an arbitrary byte offset, search forward with
//! [`Reader::sync_to`], and stop once [`Reader::past_sync`] reports the end
//! of its range.  Adjacent ranges then see every block exactly once.
//!
//! Streams are read and written with many small calls; wrap files in
//! `BufReader`/`BufWriter`.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

use std::collections::BTreeMap;
use std::io::{self, Read};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::binary::{DecodeError, DecodeLimits, EncodeError, SliceReader};
use crate::block::{decode_block, BlockHeader};
use crate::codec::{self, Codec, CodecError};
use crate::header::{HeaderError, SYNC_SIZE};
use crate::resolve::{ResolveError, ResolvedPlan};
use crate::schema::SchemaError;
use crate::types::Value;

/// Default block size threshold in bytes of uncompressed record data.
pub const DEFAULT_SYNC_INTERVAL: usize = 64_000;
/// Smallest accepted sync interval.
pub const MIN_SYNC_INTERVAL: usize = 32;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
    #[error("Schema in file header is invalid: {0}")]
    Schema(#[from] SchemaError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("{0}")]
    Resolve(#[from] ResolveError),
    #[error("{0}")]
    Encode(#[from] EncodeError),
    /// The bytes after a block's payload are not the file's sync marker.
    #[error("Sync marker mismatch after block at offset {block_offset}: file is corrupt")]
    SyncMismatch { block_offset: u64 },
    #[error("Block at offset {block_offset} is truncated")]
    TruncatedBlock { block_offset: u64 },
    #[error("Invalid block at offset {block_offset}: {reason}")]
    InvalidBlock { block_offset: u64, reason: String },
    #[error("Record {index} of block at offset {block_offset}: {source}")]
    Record {
        block_offset: u64,
        index:        u64,
        #[source]
        source:       DecodeError,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ContainerError {
    /// True for damage to the file's data, as opposed to configuration or
    /// I/O failures.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ContainerError::SyncMismatch { .. }
                | ContainerError::TruncatedBlock { .. }
                | ContainerError::InvalidBlock { .. }
                | ContainerError::Record { .. }
                | ContainerError::Codec(CodecError::Decompression(_))
        )
    }

    /// Offset of the block the error was found in, if it concerns a block.
    pub fn block_offset(&self) -> Option<u64> {
        match self {
            ContainerError::SyncMismatch { block_offset }
            | ContainerError::TruncatedBlock { block_offset }
            | ContainerError::InvalidBlock { block_offset, .. }
            | ContainerError::Record { block_offset, .. } => Some(*block_offset),
            _ => None,
        }
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Registered codec name.
    pub codec:               String,
    /// Uncompressed bytes buffered before a block is written.
    pub sync_interval:       usize,
    /// Optional cap on records per block.
    pub max_block_records:   Option<usize>,
    /// Encode arrays and maps with byte-sized blocks.
    pub blocking_containers: bool,
    /// User metadata; keys must not start with `avro.`.
    pub metadata:            BTreeMap<String, Vec<u8>>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            codec:               codec::NULL.to_owned(),
            sync_interval:       DEFAULT_SYNC_INTERVAL,
            max_block_records:   None,
            blocking_containers: false,
            metadata:            BTreeMap::new(),
        }
    }
}

/// One block as framed on disk, before decompression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    /// Offset of the block's first byte.
    pub offset:  u64,
    pub count:   u64,
    pub payload: Vec<u8>,
}

/// Read the block starting at `offset` (the stream's current position),
/// including its trailing sync marker.  `Ok(None)` means the stream ended
/// cleanly at a block boundary.
pub(crate) fn read_frame<R: Read>(
    reader: &mut R,
    offset: u64,
    sync:   &[u8; SYNC_SIZE],
) -> Result<Option<RawBlock>, ContainerError> {
    let truncated_or = |e: io::Error, reason: &str| match e.kind() {
        io::ErrorKind::UnexpectedEof => ContainerError::TruncatedBlock { block_offset: offset },
        io::ErrorKind::InvalidData => ContainerError::InvalidBlock { block_offset: offset, reason: format!("{reason}: {e}") },
        _ => ContainerError::Io(e),
    };

    let header = match BlockHeader::read(&mut *reader) {
        Ok(Some(h)) => h,
        Ok(None) => return Ok(None),
        Err(e) => return Err(truncated_or(e, "bad block header")),
    };

    // The declared size is untrusted; never allocate it up front.
    let mut payload = Vec::new();
    let got = reader
        .by_ref()
        .take(header.size)
        .read_to_end(&mut payload)
        .map_err(|e| truncated_or(e, "payload"))?;
    if (got as u64) < header.size {
        return Err(ContainerError::TruncatedBlock { block_offset: offset });
    }

    let mut marker = [0u8; SYNC_SIZE];
    reader.read_exact(&mut marker).map_err(|e| truncated_or(e, "sync marker"))?;
    if &marker != sync {
        warn!(block_offset = offset, "sync marker mismatch");
        return Err(ContainerError::SyncMismatch { block_offset: offset });
    }

    Ok(Some(RawBlock { offset, count: header.count, payload }))
}

/// Decompress a block and decode all of its records.  Either every record
/// is returned or none is.
pub fn decode_raw_block(
    raw:    &RawBlock,
    codec:  &dyn Codec,
    plan:   &ResolvedPlan,
    limits: DecodeLimits,
) -> Result<Vec<Value>, ContainerError> {
    let data = decode_block(codec, &raw.payload).map_err(|e| ContainerError::InvalidBlock {
        block_offset: raw.offset,
        reason:       e.to_string(),
    })?;
    // Each record occupies at least one byte unless the schema encodes empty.
    let zero_width = plan.writer().encodes_empty(plan.writer().root());
    let bound = if zero_width { limits.max_zero_width_items as u64 } else { data.len() as u64 };
    if raw.count > bound {
        return Err(ContainerError::InvalidBlock {
            block_offset: raw.offset,
            reason:       format!("{} records declared in {} bytes", raw.count, data.len()),
        });
    }
    let mut r = SliceReader::with_limits(&data, limits);
    let mut records = Vec::with_capacity(if zero_width { 0 } else { raw.count as usize });
    for index in 0..raw.count {
        let value = plan.decode(&mut r).map_err(|source| ContainerError::Record {
            block_offset: raw.offset,
            index,
            source,
        })?;
        records.push(value);
    }
    if !r.is_empty() {
        return Err(ContainerError::InvalidBlock {
            block_offset: raw.offset,
            reason: format!("{} bytes left after {} records", r.remaining(), raw.count),
        });
    }
    Ok(records)
}
