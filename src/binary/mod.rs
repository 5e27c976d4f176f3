//! Binary encoding rules, independent of schema resolution.
//!
//! # Integers
//! `int` and `long` are zig-zag mapped then written as base-128 varints,
//! low-order seven bits first, with the high bit set on every byte except
//! the last.  An `int` takes at most 5 bytes, a `long` at most 10.
//!
//! # Blocks
//! Arrays and maps are written as a run of blocks, each led by a `long`
//! item count, ending with a zero count.  A negative count means the block's
//! byte length follows the count, so a reader can skip the block without
//! decoding its items.  [`EncoderOptions::blocking_containers`] selects that
//! form on write; readers always accept both.
//!
//! A block's item count never exceeds the bytes left in the input, except
//! for a positive count of items that encode to zero bytes (`null`,
//! `fixed` of size 0, records of such fields).  Those are capped by
//! [`DecodeLimits::max_zero_width_items`] instead.

mod decode;

pub use decode::{decode_value, skip, DecodeError, DecodeErrorKind, SliceReader};

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::{FieldPath, Segment};
use crate::schema::{NamedType, Node, Schema};
use crate::types::Value;

/// Longest varint for a 32-bit value.
pub const MAX_VARINT32_LEN: usize = 5;
/// Longest varint for a 64-bit value.
pub const MAX_VARINT64_LEN: usize = 10;

// ── Errors ───────────────────────────────────────────────────────────────────

/// A value does not conform to the schema it is being encoded with.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot encode value at {path}: {reason}")]
pub struct EncodeError {
    pub path:   FieldPath,
    pub reason: String,
}

impl EncodeError {
    fn new(reason: impl Into<String>) -> Self {
        Self { path: FieldPath::root(), reason: reason.into() }
    }

    fn within(mut self, segment: Segment) -> Self {
        self.path = self.path.within(segment);
        self
    }
}

// ── Primitive writers ────────────────────────────────────────────────────────

#[inline]
pub fn zigzag32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

#[inline]
pub fn zigzag64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

#[inline]
pub fn unzigzag32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

#[inline]
pub fn unzigzag64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[inline]
pub fn write_varint(mut v: u64, out: &mut Vec<u8>) {
    while v >= 0x80 {
        out.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

#[inline]
pub fn write_int(n: i32, out: &mut Vec<u8>) {
    write_varint(u64::from(zigzag32(n)), out);
}

#[inline]
pub fn write_long(n: i64, out: &mut Vec<u8>) {
    write_varint(zigzag64(n), out);
}

#[inline]
pub fn write_boolean(b: bool, out: &mut Vec<u8>) {
    out.push(u8::from(b));
}

#[inline]
pub fn write_float(f: f32, out: &mut Vec<u8>) {
    let mut buf = [0u8; 4];
    LittleEndian::write_f32(&mut buf, f);
    out.extend_from_slice(&buf);
}

#[inline]
pub fn write_double(d: f64, out: &mut Vec<u8>) {
    let mut buf = [0u8; 8];
    LittleEndian::write_f64(&mut buf, d);
    out.extend_from_slice(&buf);
}

#[inline]
pub fn write_bytes(b: &[u8], out: &mut Vec<u8>) {
    write_long(b.len() as i64, out);
    out.extend_from_slice(b);
}

#[inline]
pub fn write_string(s: &str, out: &mut Vec<u8>) {
    write_bytes(s.as_bytes(), out);
}

// ── Encoder ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderOptions {
    /// Write array/map blocks with a negative count and a byte length.
    #[serde(default)]
    pub blocking_containers: bool,
}

/// Default cap on zero-width items in one array.
pub const DEFAULT_MAX_ZERO_WIDTH_ITEMS: usize = 1 << 16;

/// Bounds applied while decoding untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeLimits {
    /// Most items accepted in one array whose items encode to zero bytes,
    /// summed over all of its blocks.
    pub max_zero_width_items: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self { max_zero_width_items: DEFAULT_MAX_ZERO_WIDTH_ITEMS }
    }
}

/// Encode `value` under `schema` into a fresh buffer.
pub fn encode(value: &Value, schema: &Schema) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    encode_with(value, schema, EncoderOptions::default(), &mut out)?;
    Ok(out)
}

/// Encode `value` under `schema`, appending to `out`.
///
/// On error `out` is restored to its length before the call.
pub fn encode_with(
    value:  &Value,
    schema: &Schema,
    opts:   EncoderOptions,
    out:    &mut Vec<u8>,
) -> Result<(), EncodeError> {
    let mark = out.len();
    let result = Encoder { schema, opts }.node(schema.root(), value, out);
    if result.is_err() {
        out.truncate(mark);
    }
    result
}

struct Encoder<'s> {
    schema: &'s Schema,
    opts:   EncoderOptions,
}

impl Encoder<'_> {
    fn mismatch(&self, node: &Node, value: &Value) -> EncodeError {
        EncodeError::new(format!(
            "expected {}, found {}",
            self.schema.describe(node),
            value.kind_name()
        ))
    }

    fn node(&self, node: &Node, value: &Value, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        match (node, value) {
            (Node::Null, Value::Null) => Ok(()),
            (Node::Boolean, Value::Boolean(b)) => Ok(write_boolean(*b, out)),
            (Node::Int, Value::Int(n)) => Ok(write_int(*n, out)),
            (Node::Long, Value::Long(n)) => Ok(write_long(*n, out)),
            (Node::Float, Value::Float(f)) => Ok(write_float(*f, out)),
            (Node::Double, Value::Double(d)) => Ok(write_double(*d, out)),
            (Node::Bytes, Value::Bytes(b)) => Ok(write_bytes(b, out)),
            (Node::String, Value::String(s)) => Ok(write_string(s, out)),

            (Node::Array(items), Value::Array(values)) => {
                self.blocked(values.len(), out, |buf| {
                    for (i, v) in values.iter().enumerate() {
                        self.node(items, v, buf).map_err(|e| e.within(Segment::Index(i)))?;
                    }
                    Ok(())
                })
            }
            (Node::Map(inner), Value::Map(entries)) => {
                self.blocked(entries.len(), out, |buf| {
                    for (k, v) in entries {
                        write_string(k, buf);
                        self.node(inner, v, buf).map_err(|e| e.within(Segment::Key(k.clone())))?;
                    }
                    Ok(())
                })
            }

            (Node::Union(u), Value::Union(index, inner)) => {
                let branch = u.branches().get(*index as usize).ok_or_else(|| {
                    EncodeError::new(format!("union branch {index} out of range (union has {})", u.branches().len()))
                })?;
                write_int(*index as i32, out);
                self.node(branch, inner, out).map_err(|e| e.within(Segment::Branch(*index as usize)))
            }
            (Node::Union(u), other) => {
                // A bare value picks the first branch it conforms to.
                let index = u
                    .branches()
                    .iter()
                    .position(|b| self.conforms(b, other))
                    .ok_or_else(|| self.mismatch(node, other))?;
                write_int(index as i32, out);
                self.node(&u.branches()[index], other, out)
                    .map_err(|e| e.within(Segment::Branch(index)))
            }

            (Node::Named(id), value) => match (self.schema.named(*id), value) {
                (NamedType::Record(r), Value::Record(fields)) => {
                    for (pos, field) in r.fields.iter().enumerate() {
                        // Fast path: values usually list fields in schema order.
                        let v = match fields.get(pos) {
                            Some((name, v)) if *name == field.name => v,
                            _ => fields
                                .iter()
                                .find(|(name, _)| *name == field.name)
                                .map(|(_, v)| v)
                                .ok_or_else(|| {
                                    EncodeError::new(format!("missing field '{}' of record {}", field.name, r.name))
                                })?,
                        };
                        self.node(&field.schema, v, out)
                            .map_err(|e| e.within(Segment::Field(field.name.clone())))?;
                    }
                    if fields.len() != r.fields.len() {
                        let extra = fields
                            .iter()
                            .find(|(name, _)| r.field(name).is_none())
                            .map(|(name, _)| name.as_str())
                            .unwrap_or("?");
                        return Err(EncodeError::new(format!("field '{extra}' is not part of record {}", r.name)));
                    }
                    Ok(())
                }
                (NamedType::Enum(e), Value::Enum(index, symbol)) => {
                    match e.symbols.get(*index as usize) {
                        Some(s) if s == symbol => Ok(write_int(*index as i32, out)),
                        _ => Err(EncodeError::new(format!(
                            "symbol {symbol:?} at index {index} is not a symbol of enum {}",
                            e.name
                        ))),
                    }
                }
                (NamedType::Fixed(f), Value::Fixed(bytes)) => {
                    if bytes.len() != f.size {
                        return Err(EncodeError::new(format!(
                            "fixed {} needs {} bytes, value has {}",
                            f.name, f.size, bytes.len()
                        )));
                    }
                    out.extend_from_slice(bytes);
                    Ok(())
                }
                _ => Err(self.mismatch(node, value)),
            },

            _ => Err(self.mismatch(node, value)),
        }
    }

    /// Write `count` items produced by `body` as one block plus terminator.
    /// Items that encode to nothing keep the plain form: a sized block must
    /// not declare more items than bytes follow it.
    fn blocked<F>(&self, count: usize, out: &mut Vec<u8>, body: F) -> Result<(), EncodeError>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<(), EncodeError>,
    {
        if count > 0 {
            if self.opts.blocking_containers {
                let mut block = Vec::new();
                body(&mut block)?;
                if block.is_empty() {
                    write_long(count as i64, out);
                } else {
                    write_long(-(count as i64), out);
                    write_long(block.len() as i64, out);
                    out.extend_from_slice(&block);
                }
            } else {
                write_long(count as i64, out);
                body(out)?;
            }
        }
        write_long(0, out);
        Ok(())
    }

    /// Shallow shape check used to pick a union branch for a bare value.
    fn conforms(&self, node: &Node, value: &Value) -> bool {
        match (node, value) {
            (Node::Null, Value::Null)
            | (Node::Boolean, Value::Boolean(_))
            | (Node::Int, Value::Int(_))
            | (Node::Long, Value::Long(_))
            | (Node::Float, Value::Float(_))
            | (Node::Double, Value::Double(_))
            | (Node::Bytes, Value::Bytes(_))
            | (Node::String, Value::String(_))
            | (Node::Array(_), Value::Array(_))
            | (Node::Map(_), Value::Map(_)) => true,
            (Node::Named(id), v) => match (self.schema.named(*id), v) {
                (NamedType::Record(r), Value::Record(fields)) => {
                    fields.len() == r.fields.len() && fields.iter().all(|(n, _)| r.field(n).is_some())
                }
                (NamedType::Enum(e), Value::Enum(_, s)) => e.position(s).is_some(),
                (NamedType::Fixed(f), Value::Fixed(b)) => b.len() == f.size,
                _ => false,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn bytes_of(schema: &str, value: Value) -> Vec<u8> {
        encode(&value, &Schema::parse_str(schema).unwrap()).unwrap()
    }

    #[test]
    fn zigzag_matches_reference_values() {
        assert_eq!(zigzag64(0), 0);
        assert_eq!(zigzag64(-1), 1);
        assert_eq!(zigzag64(1), 2);
        assert_eq!(zigzag64(-2), 3);
        assert_eq!(zigzag32(i32::MAX), u32::MAX - 1);
        assert_eq!(zigzag32(i32::MIN), u32::MAX);
        assert_eq!(unzigzag64(zigzag64(i64::MIN)), i64::MIN);
    }

    #[test]
    fn varint_lengths() {
        let mut out = Vec::new();
        write_long(i64::MIN, &mut out);
        assert_eq!(out.len(), MAX_VARINT64_LEN);
        out.clear();
        write_int(i32::MIN, &mut out);
        assert_eq!(out.len(), MAX_VARINT32_LEN);
        out.clear();
        write_long(-64, &mut out);
        assert_eq!(out, [0x7f]);
        out.clear();
        write_long(64, &mut out);
        assert_eq!(out, [0x80, 0x01]);
    }

    #[test]
    fn primitives() {
        assert_eq!(bytes_of(r#""boolean""#, Value::Boolean(true)), [1]);
        assert_eq!(bytes_of(r#""float""#, Value::Float(1.0)), 1.0f32.to_le_bytes());
        assert_eq!(bytes_of(r#""double""#, Value::Double(-2.5)), (-2.5f64).to_le_bytes());
        assert_eq!(bytes_of(r#""string""#, "foo".into()), [6, b'f', b'o', b'o']);
        assert_eq!(bytes_of(r#""null""#, Value::Null), Vec::<u8>::new());
    }

    #[test]
    fn record_is_positional() {
        let out = bytes_of(
            r#"{"type":"record","name":"R","fields":[{"name":"a","type":"long"},{"name":"b","type":"string"}]}"#,
            Value::record([("b", "x".into()), ("a", Value::Long(27))]),
        );
        assert_eq!(out, [0x36, 0x02, b'x']);
    }

    #[test]
    fn arrays_plain_and_blocked() {
        let schema = Schema::parse_str(r#"{"type":"array","items":"long"}"#).unwrap();
        let v = Value::Array(vec![Value::Long(3), Value::Long(27)]);
        assert_eq!(encode(&v, &schema).unwrap(), [0x04, 0x06, 0x36, 0x00]);

        let mut out = Vec::new();
        encode_with(&v, &schema, EncoderOptions { blocking_containers: true }, &mut out).unwrap();
        assert_eq!(out, [0x03, 0x04, 0x06, 0x36, 0x00]);

        assert_eq!(encode(&Value::Array(vec![]), &schema).unwrap(), [0x00]);
    }

    #[test]
    fn blocked_zero_width_items_use_plain_count() {
        let schema = Schema::parse_str(r#"{"type":"array","items":"null"}"#).unwrap();
        let v = Value::Array(vec![Value::Null; 3]);
        let mut out = Vec::new();
        encode_with(&v, &schema, EncoderOptions { blocking_containers: true }, &mut out).unwrap();
        assert_eq!(out, [0x06, 0x00]);
        assert_eq!(decode_value(&schema, schema.root(), &mut SliceReader::new(&out)).unwrap(), v);
    }

    #[test]
    fn unions_enums_fixed() {
        let u = r#"["null","string"]"#;
        assert_eq!(bytes_of(u, Value::union(0, Value::Null)), [0x00]);
        assert_eq!(bytes_of(u, Value::union(1, "a".into())), [0x02, 0x02, b'a']);
        // Bare value picks its branch.
        assert_eq!(bytes_of(u, "a".into()), [0x02, 0x02, b'a']);

        let e = r#"{"type":"enum","name":"E","symbols":["A","B","C"]}"#;
        assert_eq!(bytes_of(e, Value::Enum(2, "C".into())), [0x04]);

        let f = r#"{"type":"fixed","name":"F","size":3}"#;
        assert_eq!(bytes_of(f, Value::Fixed(vec![1, 2, 3])), [1, 2, 3]);
    }

    #[test]
    fn mismatch_reports_field_path() {
        let schema = Schema::parse_str(r#"{"type":"record","name":"R","fields":[
            {"name":"items","type":{"type":"array","items":{"type":"map","values":"int"}}}
        ]}"#).unwrap();
        let mut bad = HashMap::new();
        bad.insert("k".to_owned(), Value::String("nope".into()));
        let v = Value::record([("items", Value::Array(vec![Value::Map(HashMap::new()), Value::Map(bad)]))]);

        let mut out = vec![0xAA];
        let err = encode_with(&v, &schema, EncoderOptions::default(), &mut out).unwrap_err();
        assert_eq!(err.path.to_string(), r#"$.items[1]["k"]"#);
        assert_eq!(out, [0xAA], "partial output must be rolled back");
    }

    #[test]
    fn record_field_set_must_match() {
        let schema = Schema::parse_str(r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"}]}"#).unwrap();
        let missing = encode(&Value::record(Vec::<(String, Value)>::new()), &schema).unwrap_err();
        assert!(missing.reason.contains("missing field 'a'"));
        let extra = encode(&Value::record([("a", Value::Int(1)), ("z", Value::Null)]), &schema).unwrap_err();
        assert!(extra.reason.contains("'z'"));
    }

    #[test]
    fn enum_symbol_must_match_index() {
        let schema = Schema::parse_str(r#"{"type":"enum","name":"E","symbols":["A","B"]}"#).unwrap();
        assert!(encode(&Value::Enum(0, "B".into()), &schema).is_err());
        assert!(encode(&Value::Enum(5, "A".into()), &schema).is_err());
    }
}
