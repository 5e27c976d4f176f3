use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::{debug, trace};

use super::{decode_raw_block, read_frame, ContainerError, RawBlock};
use crate::binary::DecodeLimits;
use crate::codec::{Codec, CodecRegistry};
use crate::header::{FileHeader, SYNC_SIZE};
use crate::recovery::find_sync;
use crate::resolve::{plan_for, ResolvedPlan};
use crate::schema::Schema;
use crate::types::Value;

pub struct Reader<R: Read + Seek> {
    reader:        R,
    header:        FileHeader,
    plan:          Arc<ResolvedPlan>,
    codec:         Arc<dyn Codec>,
    limits:        DecodeLimits,
    /// Offset of the first block, right after the header.
    data_start:    u64,

    pending:       VecDeque<Value>,
    /// Offset of the block `pending` came from.
    current_block: u64,
    /// Offset of the next block frame in the stream.
    next_block:    u64,
    failed:        bool,
    blocks_read:   u64,
}

impl<R: Read + Seek> Reader<R> {
    /// Open a container and read it with its own writer schema.
    pub fn new(reader: R) -> Result<Self, ContainerError> {
        Self::with_options(reader, None, &CodecRegistry::default())
    }

    /// Open a container and resolve its records against `reader_schema`.
    pub fn with_schema(reader: R, reader_schema: Arc<Schema>) -> Result<Self, ContainerError> {
        Self::with_options(reader, Some(reader_schema), &CodecRegistry::default())
    }

    /// Open a container.  Fails if the header is invalid, the codec is not
    /// in `registry`, or the writer schema cannot be read as `reader_schema`.
    pub fn with_options(
        mut reader:    R,
        reader_schema: Option<Arc<Schema>>,
        registry:      &CodecRegistry,
    ) -> Result<Self, ContainerError> {
        reader.seek(SeekFrom::Start(0))?;
        let header = FileHeader::read(&mut reader)?;
        let writer_schema = Arc::new(Schema::parse_str(header.schema_text()?)?);
        let codec = registry.get(header.codec_name()?)?;
        let plan = plan_for(&writer_schema, reader_schema.as_ref().unwrap_or(&writer_schema))?;
        let data_start = reader.stream_position()?;
        debug!(codec = codec.name(), writer = %writer_schema.fingerprint(), data_start, "opened container");

        Ok(Self {
            reader,
            header,
            plan,
            codec,
            limits:        DecodeLimits::default(),
            data_start,
            pending:       VecDeque::new(),
            current_block: data_start,
            next_block:    data_start,
            failed:        false,
            blocks_read:   0,
        })
    }

    /// Replace the bounds applied while decoding records.
    pub fn with_decode_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        self.limits
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// All header metadata, reserved entries included.
    pub fn metadata(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.header.metadata
    }

    pub fn user_metadata(&self, key: &str) -> Option<&[u8]> {
        self.header.user_metadata().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn writer_schema(&self) -> &Arc<Schema> {
        self.plan.writer()
    }

    pub fn reader_schema(&self) -> &Arc<Schema> {
        self.plan.reader()
    }

    pub fn plan(&self) -> &Arc<ResolvedPlan> {
        &self.plan
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    pub fn sync_marker(&self) -> &[u8; SYNC_SIZE] {
        &self.header.sync
    }

    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    /// Next record, `Ok(None)` at the end of the file.  After an error every
    /// further call returns `Ok(None)` until the reader is repositioned with
    /// [`seek`](Self::seek) or [`sync_to`](Self::sync_to).
    pub fn next_record(&mut self) -> Result<Option<Value>, ContainerError> {
        if self.failed {
            return Ok(None);
        }
        loop {
            if let Some(v) = self.pending.pop_front() {
                trace!(block = self.current_block, left = self.pending.len(), "record");
                return Ok(Some(v));
            }
            match self.load_next_block() {
                Ok(true) => continue,
                Ok(false) => return Ok(None),
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            }
        }
    }

    fn load_next_block(&mut self) -> Result<bool, ContainerError> {
        let Some(raw) = self.read_raw_block()? else {
            return Ok(false);
        };
        let records = decode_raw_block(&raw, self.codec.as_ref(), &self.plan, self.limits)?;
        self.pending = records.into();
        Ok(true)
    }

    /// Read the next block frame without decompressing it.  Records of the
    /// current block that have not been returned yet are dropped.
    pub fn read_raw_block(&mut self) -> Result<Option<RawBlock>, ContainerError> {
        self.pending.clear();
        let offset = self.next_block;
        match read_frame(&mut self.reader, offset, &self.header.sync)? {
            Some(raw) => {
                self.next_block = self.reader.stream_position()?;
                self.current_block = offset;
                self.blocks_read += 1;
                debug!(offset, records = raw.count, size = raw.payload.len(), "read block");
                Ok(Some(raw))
            }
            None => Ok(None),
        }
    }

    /// Jump to a known block boundary, such as a value returned by
    /// [`Writer::sync`](super::Writer::sync) or [`block_position`](Self::block_position).
    pub fn seek(&mut self, position: u64) -> Result<(), ContainerError> {
        self.reader.seek(SeekFrom::Start(position))?;
        self.pending.clear();
        self.current_block = position;
        self.next_block = position;
        self.failed = false;
        Ok(())
    }

    /// Move to the first block boundary at or after `position`, found by
    /// searching for the sync marker.  Returns the boundary, or `None` (and
    /// positions at the end of the file) if there is none.
    pub fn sync_to(&mut self, position: u64) -> Result<Option<u64>, ContainerError> {
        if position <= self.data_start {
            self.seek(self.data_start)?;
            return Ok(Some(self.data_start));
        }
        // A boundary exactly at `position` ends a marker that starts before it.
        let from = position - SYNC_SIZE as u64;
        match find_sync(&mut self.reader, from, &self.header.sync)? {
            Some(marker) => {
                let boundary = marker + SYNC_SIZE as u64;
                self.seek(boundary)?;
                debug!(position, boundary, "synced to block boundary");
                Ok(Some(boundary))
            }
            None => {
                let end = self.reader.seek(SeekFrom::End(0))?;
                self.seek(end)?;
                Ok(None)
            }
        }
    }

    /// Offset of the block the next record comes from: the current block
    /// while it still has records, otherwise the next block.
    pub fn block_position(&self) -> u64 {
        if self.pending.is_empty() {
            self.next_block
        } else {
            self.current_block
        }
    }

    /// True once the reader has moved to a block starting at or after
    /// `position`; a split reader covering `[start, end)` stops when
    /// `past_sync(end)` holds.
    pub fn past_sync(&self, position: u64) -> bool {
        self.block_position() >= position
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> Iterator for Reader<R> {
    type Item = Result<Value, ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

impl<R: Read + Seek> std::fmt::Debug for Reader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("codec", &self.codec.name())
            .field("writer", &self.plan.writer().fingerprint())
            .field("block_position", &self.block_position())
            .field("failed", &self.failed)
            .finish()
    }
}
