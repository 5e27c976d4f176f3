//! Data block framing.
//!
//! # Layout
//! ```text
//! long   record count   (> 0)
//! long   payload size   (bytes after compression)
//! ..     payload        (codec output of the concatenated records)
//! 16     sync marker    (must equal the header's marker)
//! ```
//! Counts and sizes are zig-zag varints, like every other integer in the
//! format.  A block is self-contained: its records can be decoded from its
//! payload alone, so blocks can be read independently and in parallel.

use std::io::{self, Read, Write};

use byteorder::ReadBytesExt;

use crate::binary::{unzigzag64, write_long, MAX_VARINT64_LEN};
use crate::codec::{Codec, CodecError};
use crate::header::SYNC_SIZE;

/// Read a zig-zag `long` from a stream.
pub fn read_long<R: Read>(reader: &mut R) -> io::Result<i64> {
    read_long_or_eof(reader)?.ok_or_else(|| io::ErrorKind::UnexpectedEof.into())
}

/// Like [`read_long`], but a stream that ends before the first byte yields
/// `None` instead of an error.
fn read_long_or_eof<R: Read>(reader: &mut R) -> io::Result<Option<i64>> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT64_LEN {
        let b = match reader.read_u8() {
            Ok(b) => b,
            Err(e) if i == 0 && e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        value |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            if i + 1 == MAX_VARINT64_LEN && b > 1 {
                break;
            }
            return Ok(Some(unzigzag64(value)));
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflows a long"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub count: u64,
    pub size:  u64,
}

impl BlockHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(2 * MAX_VARINT64_LEN);
        write_long(self.count as i64, &mut buf);
        write_long(self.size as i64, &mut buf);
        writer.write_all(&buf)
    }

    /// Read a block header.  `Ok(None)` means the stream ended cleanly
    /// between blocks.
    pub fn read<R: Read>(mut reader: R) -> io::Result<Option<Self>> {
        let Some(count) = read_long_or_eof(&mut reader)? else {
            return Ok(None);
        };
        let size = read_long(&mut reader)?;
        if count <= 0 || size < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid block header (count {count}, size {size})"),
            ));
        }
        Ok(Some(Self { count: count as u64, size: size as u64 }))
    }
}

/// Compress `records` (the concatenated encodings of `count` records).
pub fn encode_block(codec: &dyn Codec, count: usize, records: &[u8]) -> Result<(BlockHeader, Vec<u8>), CodecError> {
    let payload = codec.compress(records)?;
    let header = BlockHeader { count: count as u64, size: payload.len() as u64 };
    Ok((header, payload))
}

/// Decompress a block payload back into concatenated record encodings.
pub fn decode_block(codec: &dyn Codec, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    codec.decompress(payload)
}

/// Write header, payload and trailing sync marker.
pub fn write_block<W: Write>(
    mut writer: W,
    header:     &BlockHeader,
    payload:    &[u8],
    sync:       &[u8; SYNC_SIZE],
) -> io::Result<()> {
    header.write(&mut writer)?;
    writer.write_all(payload)?;
    writer.write_all(sync)
}
