use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use tracing::{debug, trace};

use super::{ContainerError, WriterOptions, MIN_SYNC_INTERVAL};
use crate::binary::{encode_with, EncoderOptions};
use crate::block::{encode_block, write_block};
use crate::codec::{Codec, CodecRegistry};
use crate::header::{FileHeader, SYNC_SIZE};
use crate::schema::Schema;
use crate::types::Value;

pub struct Writer<W: Write> {
    writer:            W,
    header:            FileHeader,
    schema:            Arc<Schema>,
    codec:             Arc<dyn Codec>,
    encoder:           EncoderOptions,
    sync_interval:     usize,
    max_block_records: Option<usize>,

    buffer:            Vec<u8>,
    buffered:          usize,
    /// Bytes written to `writer` so far, counted from the start of the file.
    position:          u64,
    blocks_written:    u64,
}

impl<W: Write> Writer<W> {
    /// Start a new container with the `null` codec.
    pub fn new(writer: W, schema: Arc<Schema>) -> Result<Self, ContainerError> {
        Self::with_options(writer, schema, WriterOptions::default())
    }

    pub fn with_options(writer: W, schema: Arc<Schema>, options: WriterOptions) -> Result<Self, ContainerError> {
        Self::with_registry(writer, schema, options, &CodecRegistry::default())
    }

    /// Start a new container, resolving the codec name in `registry`.
    pub fn with_registry(
        mut writer: W,
        schema:     Arc<Schema>,
        options:    WriterOptions,
        registry:   &CodecRegistry,
    ) -> Result<Self, ContainerError> {
        let codec = registry.get(&options.codec)?;
        let mut header = FileHeader::new(schema.canonical_form(), codec.name());
        for (key, value) in &options.metadata {
            header.set_user(key, value.clone())?;
        }

        let bytes = header.to_bytes();
        writer.write_all(&bytes)?;
        debug!(codec = codec.name(), schema = %schema.fingerprint(), "started container");

        Ok(Self {
            writer,
            header,
            schema,
            codec,
            encoder:           EncoderOptions { blocking_containers: options.blocking_containers },
            sync_interval:     options.sync_interval.max(MIN_SYNC_INTERVAL),
            max_block_records: options.max_block_records.filter(|&n| n > 0),
            buffer:            Vec::new(),
            buffered:          0,
            position:          bytes.len() as u64,
            blocks_written:    0,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn sync_marker(&self) -> &[u8; SYNC_SIZE] {
        &self.header.sync
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Encode and buffer one record.  A record that does not conform to the
    /// schema is rejected and leaves the buffer untouched.
    pub fn append(&mut self, value: &Value) -> Result<(), ContainerError> {
        encode_with(value, &self.schema, self.encoder, &mut self.buffer)?;
        self.record_added()
    }

    /// Buffer one record that is already encoded with this file's schema.
    /// The bytes are not checked.
    pub fn append_encoded(&mut self, datum: &[u8]) -> Result<(), ContainerError> {
        self.buffer.extend_from_slice(datum);
        self.record_added()
    }

    pub fn extend<'v, I>(&mut self, values: I) -> Result<(), ContainerError>
    where
        I: IntoIterator<Item = &'v Value>,
    {
        for v in values {
            self.append(v)?;
        }
        Ok(())
    }

    fn record_added(&mut self) -> Result<(), ContainerError> {
        self.buffered += 1;
        trace!(buffered = self.buffered, bytes = self.buffer.len(), "record appended");
        let full = self.buffer.len() >= self.sync_interval
            || self.max_block_records.is_some_and(|max| self.buffered >= max);
        if full {
            self.write_pending_block()?;
        }
        Ok(())
    }

    fn write_pending_block(&mut self) -> Result<(), ContainerError> {
        if self.buffered == 0 {
            return Ok(());
        }
        let (header, payload) = encode_block(self.codec.as_ref(), self.buffered, &self.buffer)?;
        let offset = self.position;
        let mut frame = Vec::with_capacity(payload.len() + 20 + SYNC_SIZE);
        write_block(&mut frame, &header, &payload, &self.header.sync)?;
        self.writer.write_all(&frame)?;
        self.position += frame.len() as u64;
        self.blocks_written += 1;
        debug!(
            offset,
            records = self.buffered,
            raw = self.buffer.len(),
            compressed = payload.len(),
            "wrote block"
        );

        self.buffer.clear();
        self.buffered = 0;
        Ok(())
    }

    /// Close the current block, even if small, and return the offset at
    /// which the next block will start.  That offset can later be passed to
    /// [`Reader::seek`](super::Reader::seek).
    pub fn sync(&mut self) -> Result<u64, ContainerError> {
        self.write_pending_block()?;
        Ok(self.position)
    }

    /// Write any buffered records and flush the underlying stream.
    pub fn flush(&mut self) -> Result<(), ContainerError> {
        self.write_pending_block()?;
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the underlying stream.
    pub fn into_inner(mut self) -> Result<W, ContainerError> {
        self.flush()?;
        Ok(self.writer)
    }
}

impl<S: Read + Write + Seek> Writer<S> {
    /// Reopen an existing container and append blocks to its end.
    ///
    /// The schema, codec and sync marker come from the file's header;
    /// `options` only contribute the block sizing and encoding settings.
    pub fn append_to(mut stream: S, options: WriterOptions, registry: &CodecRegistry) -> Result<Self, ContainerError> {
        stream.seek(SeekFrom::Start(0))?;
        let header = FileHeader::read(&mut stream)?;
        let schema = Arc::new(Schema::parse_str(header.schema_text()?)?);
        let codec = registry.get(header.codec_name()?)?;
        let position = stream.seek(SeekFrom::End(0))?;
        debug!(position, codec = codec.name(), "appending to container");

        Ok(Self {
            writer: stream,
            header,
            schema,
            codec,
            encoder:           EncoderOptions { blocking_containers: options.blocking_containers },
            sync_interval:     options.sync_interval.max(MIN_SYNC_INTERVAL),
            max_block_records: options.max_block_records.filter(|&n| n > 0),
            buffer:            Vec::new(),
            buffered:          0,
            position,
            blocks_written:    0,
        })
    }
}

impl<W: Write> std::fmt::Debug for Writer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("codec", &self.codec.name())
            .field("schema", &self.schema.fingerprint())
            .field("buffered", &self.buffered)
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::parse_str(r#"{"type":"record","name":"P","fields":[{"name":"n","type":"long"}]}"#).unwrap())
    }

    fn rec(n: i64) -> Value {
        Value::record([("n", Value::Long(n))])
    }

    #[test]
    fn header_is_written_up_front() {
        let w = Writer::new(Vec::new(), schema()).unwrap();
        let sync = *w.sync_marker();
        let bytes = w.into_inner().unwrap();
        let header = FileHeader::read(Cursor::new(&bytes)).unwrap();
        assert_eq!(header.sync, sync);
        assert_eq!(header.schema_text().unwrap(), schema().canonical_form());
        assert_eq!(header.to_bytes().len(), bytes.len(), "no block without records");
    }

    #[test]
    fn record_limit_cuts_blocks() {
        let opts = WriterOptions { max_block_records: Some(3), ..Default::default() };
        let mut w = Writer::with_options(Vec::new(), schema(), opts).unwrap();
        for n in 0..7 {
            w.append(&rec(n)).unwrap();
        }
        assert_eq!(w.blocks_written(), 2);
        w.flush().unwrap();
        assert_eq!(w.blocks_written(), 3);
    }

    #[test]
    fn sync_reports_next_block_offset() {
        let mut w = Writer::new(Vec::new(), schema()).unwrap();
        w.append(&rec(1)).unwrap();
        let at = w.sync().unwrap();
        let bytes = w.into_inner().unwrap();
        assert_eq!(at, bytes.len() as u64);
    }

    #[test]
    fn bad_record_is_not_buffered() {
        let mut w = Writer::new(Vec::new(), schema()).unwrap();
        assert!(matches!(w.append(&Value::Long(3)), Err(ContainerError::Encode(_))));
        w.append(&rec(1)).unwrap();
        assert_eq!(w.buffered, 1);
    }

    #[test]
    fn unknown_codec_and_reserved_metadata_fail() {
        let opts = WriterOptions { codec: "snappy".into(), ..Default::default() };
        assert!(matches!(Writer::with_options(Vec::new(), schema(), opts), Err(ContainerError::Codec(_))));

        let mut opts = WriterOptions::default();
        opts.metadata.insert("avro.thing".into(), vec![1]);
        assert!(matches!(Writer::with_options(Vec::new(), schema(), opts), Err(ContainerError::Header(_))));
    }
}
