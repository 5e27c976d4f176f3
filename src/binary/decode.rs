//! Bounded reads over an in-memory buffer, and schema-driven decoding
//! without resolution.
//!
//! Every read checks the remaining length first, so a truncated or hostile
//! buffer fails with a [`DecodeError`] carrying the byte offset instead of
//! allocating or panicking.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::{unzigzag32, unzigzag64, DecodeLimits, MAX_VARINT32_LEN, MAX_VARINT64_LEN};
use crate::schema::{NamedType, Node, Schema};
use crate::types::Value;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeErrorKind {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint is too long or overflows its type")]
    VarintOverflow,
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBoolean(u8),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("negative length {0}")]
    NegativeLength(i64),
    #[error("declared length {len} exceeds the {remaining} bytes remaining")]
    LengthExceedsBuffer { len: u64, remaining: usize },
    #[error("index {index} out of range for {len} alternatives")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("invalid block count")]
    InvalidBlockCount,
    #[error("{count} zero-width items exceed the limit of {limit}")]
    TooManyItems { count: u64, limit: usize },
    #[error("{0} trailing bytes after datum")]
    TrailingBytes(usize),
}

/// Malformed input, with the byte offset at which it was detected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("decode error at byte {offset}: {kind}")]
pub struct DecodeError {
    pub offset: usize,
    pub kind:   DecodeErrorKind,
}

impl DecodeError {
    pub fn new(offset: usize, kind: DecodeErrorKind) -> Self {
        Self { offset, kind }
    }
}

// ── SliceReader ──────────────────────────────────────────────────────────────

/// Cursor over a byte slice.  Borrowed reads (`read_exact`, `read_str`)
/// return sub-slices of the input without copying.
#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    buf:    &'a [u8],
    pos:    usize,
    limits: DecodeLimits,
}

impl<'a> SliceReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_limits(buf, DecodeLimits::default())
    }

    pub fn with_limits(buf: &'a [u8], limits: DecodeLimits) -> Self {
        Self { buf, pos: 0, limits }
    }

    pub fn limits(&self) -> DecodeLimits {
        self.limits
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn err(&self, kind: DecodeErrorKind) -> DecodeError {
        DecodeError::new(self.pos, kind)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.buf.get(self.pos).ok_or_else(|| self.err(DecodeErrorKind::UnexpectedEof))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_exact(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(self.err(DecodeErrorKind::UnexpectedEof));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_varint(&mut self, max_len: usize) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut value = 0u64;
        for i in 0..max_len {
            let b = match self.read_u8() {
                Ok(b) => b,
                Err(_) => return Err(DecodeError::new(start, DecodeErrorKind::UnexpectedEof)),
            };
            value |= u64::from(b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                // Last byte of a full-length varint may only carry the top bits.
                let ok = match max_len {
                    MAX_VARINT32_LEN => i + 1 < MAX_VARINT32_LEN || b <= 0x0f,
                    _ => i + 1 < MAX_VARINT64_LEN || b <= 0x01,
                };
                if !ok {
                    return Err(DecodeError::new(start, DecodeErrorKind::VarintOverflow));
                }
                return Ok(value);
            }
        }
        Err(DecodeError::new(start, DecodeErrorKind::VarintOverflow))
    }

    pub fn read_int(&mut self) -> Result<i32, DecodeError> {
        let raw = self.read_varint(MAX_VARINT32_LEN)?;
        Ok(unzigzag32(raw as u32))
    }

    pub fn read_long(&mut self) -> Result<i64, DecodeError> {
        let raw = self.read_varint(MAX_VARINT64_LEN)?;
        Ok(unzigzag64(raw))
    }

    pub fn read_boolean(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(DecodeError::new(self.pos - 1, DecodeErrorKind::InvalidBoolean(b))),
        }
    }

    pub fn read_float(&mut self) -> Result<f32, DecodeError> {
        Ok(LittleEndian::read_f32(self.read_exact(4)?))
    }

    pub fn read_double(&mut self) -> Result<f64, DecodeError> {
        Ok(LittleEndian::read_f64(self.read_exact(8)?))
    }

    /// Read a `long` length prefix and check it against the remaining input.
    pub fn read_len(&mut self) -> Result<usize, DecodeError> {
        let start = self.pos;
        let len = self.read_long()?;
        if len < 0 {
            return Err(DecodeError::new(start, DecodeErrorKind::NegativeLength(len)));
        }
        if len as u64 > self.remaining() as u64 {
            return Err(DecodeError::new(
                start,
                DecodeErrorKind::LengthExceedsBuffer { len: len as u64, remaining: self.remaining() },
            ));
        }
        Ok(len as usize)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_len()?;
        self.read_exact(len)
    }

    pub fn read_str(&mut self) -> Result<&'a str, DecodeError> {
        let start = self.pos;
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::new(start, DecodeErrorKind::InvalidUtf8))
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        self.read_str().map(str::to_owned)
    }

    /// Read an enum or union index and check it against `len` alternatives.
    pub fn read_index(&mut self, len: usize) -> Result<usize, DecodeError> {
        let start = self.pos;
        let index = self.read_int()?;
        if index < 0 || index as usize >= len {
            return Err(DecodeError::new(
                start,
                DecodeErrorKind::IndexOutOfRange { index: i64::from(index), len },
            ));
        }
        Ok(index as usize)
    }

    /// Read one array/map block header.
    ///
    /// Returns the item count (zero ends the sequence) and, for the
    /// negative-count form, the block's byte size.  `seen` is the number of
    /// items already read from earlier blocks of the same array or map.
    ///
    /// A negative-count block, or a block of items that occupy at least one
    /// byte each, may not declare more items than bytes remain.  A positive
    /// count of `zero_width` items is held to
    /// [`DecodeLimits::max_zero_width_items`] instead.
    pub fn read_block_header(&mut self, zero_width: bool, seen: usize) -> Result<(usize, Option<usize>), DecodeError> {
        let start = self.pos;
        let count = self.read_long()?;
        if count == i64::MIN {
            return Err(DecodeError::new(start, DecodeErrorKind::InvalidBlockCount));
        }
        let size = if count < 0 { Some(self.read_len()?) } else { None };
        let items = count.unsigned_abs();
        if (count < 0 || !zero_width) && items > self.remaining() as u64 {
            return Err(DecodeError::new(
                start,
                DecodeErrorKind::LengthExceedsBuffer { len: items, remaining: self.remaining() },
            ));
        }
        let total = items.saturating_add(seen as u64);
        if zero_width && total > self.limits.max_zero_width_items as u64 {
            return Err(DecodeError::new(
                start,
                DecodeErrorKind::TooManyItems { count: total, limit: self.limits.max_zero_width_items },
            ));
        }
        let items = usize::try_from(items)
            .map_err(|_| DecodeError::new(start, DecodeErrorKind::InvalidBlockCount))?;
        Ok((items, size))
    }

    /// Fail unless the whole input has been consumed.
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(self.err(DecodeErrorKind::TrailingBytes(n))),
        }
    }
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Decode one value of `node`'s shape, with no schema resolution.
pub fn decode_value(schema: &Schema, node: &Node, r: &mut SliceReader<'_>) -> Result<Value, DecodeError> {
    Ok(match node {
        Node::Null => Value::Null,
        Node::Boolean => Value::Boolean(r.read_boolean()?),
        Node::Int => Value::Int(r.read_int()?),
        Node::Long => Value::Long(r.read_long()?),
        Node::Float => Value::Float(r.read_float()?),
        Node::Double => Value::Double(r.read_double()?),
        Node::Bytes => Value::Bytes(r.read_bytes()?.to_vec()),
        Node::String => Value::String(r.read_string()?),
        Node::Array(items) => {
            let zero_width = schema.encodes_empty(items);
            let mut out = Vec::new();
            loop {
                let (count, _) = r.read_block_header(zero_width, out.len())?;
                if count == 0 {
                    break;
                }
                if !zero_width {
                    out.reserve(count);
                }
                for _ in 0..count {
                    out.push(decode_value(schema, items, r)?);
                }
            }
            Value::Array(out)
        }
        Node::Map(values) => {
            let mut out = HashMap::new();
            loop {
                let (count, _) = r.read_block_header(false, out.len())?;
                if count == 0 {
                    break;
                }
                for _ in 0..count {
                    let key = r.read_string()?;
                    out.insert(key, decode_value(schema, values, r)?);
                }
            }
            Value::Map(out)
        }
        Node::Union(u) => {
            let index = r.read_index(u.branches().len())?;
            Value::union(index as u32, decode_value(schema, &u.branches()[index], r)?)
        }
        Node::Named(id) => match schema.named(*id) {
            NamedType::Record(rec) => {
                let mut fields = Vec::with_capacity(rec.fields.len());
                for f in &rec.fields {
                    fields.push((f.name.clone(), decode_value(schema, &f.schema, r)?));
                }
                Value::Record(fields)
            }
            NamedType::Enum(e) => {
                let index = r.read_index(e.symbols.len())?;
                Value::Enum(index as u32, e.symbols[index].clone())
            }
            NamedType::Fixed(f) => Value::Fixed(r.read_exact(f.size)?.to_vec()),
        },
    })
}

/// Consume one value of `node`'s shape without building it.
///
/// Blocks written with a byte size are skipped in one step.
pub fn skip(schema: &Schema, node: &Node, r: &mut SliceReader<'_>) -> Result<(), DecodeError> {
    match node {
        Node::Null => {}
        Node::Boolean => {
            r.read_boolean()?;
        }
        Node::Int => {
            r.read_int()?;
        }
        Node::Long => {
            r.read_long()?;
        }
        Node::Float => {
            r.read_exact(4)?;
        }
        Node::Double => {
            r.read_exact(8)?;
        }
        Node::Bytes | Node::String => {
            r.read_bytes()?;
        }
        Node::Array(items) => {
            let zero_width = schema.encodes_empty(items);
            skip_blocks(r, zero_width, |r| skip(schema, items, r))?;
        }
        Node::Map(values) => {
            skip_blocks(r, false, |r| {
                r.read_bytes()?;
                skip(schema, values, r)
            })?;
        }
        Node::Union(u) => {
            let index = r.read_index(u.branches().len())?;
            skip(schema, &u.branches()[index], r)?;
        }
        Node::Named(id) => match schema.named(*id) {
            NamedType::Record(rec) => {
                for f in &rec.fields {
                    skip(schema, &f.schema, r)?;
                }
            }
            NamedType::Enum(e) => {
                r.read_index(e.symbols.len())?;
            }
            NamedType::Fixed(f) => {
                r.read_exact(f.size)?;
            }
        },
    }
    Ok(())
}

fn skip_blocks<'a, F>(r: &mut SliceReader<'a>, zero_width: bool, mut item: F) -> Result<(), DecodeError>
where
    F: FnMut(&mut SliceReader<'a>) -> Result<(), DecodeError>,
{
    let mut seen = 0usize;
    loop {
        let (count, size) = r.read_block_header(zero_width, seen)?;
        match (count, size) {
            (0, _) => return Ok(()),
            (_, Some(size)) => {
                r.read_exact(size)?;
            }
            (count, None) => {
                for _ in 0..count {
                    item(r)?;
                }
            }
        }
        seen = seen.saturating_add(count);
    }
}
