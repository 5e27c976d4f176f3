//! Parsing Canonical Form, the full JSON form, and fingerprints.
//!
//! Canonical form keeps only the attributes that affect the binary layout
//! (`name`, `type`, `fields`, `symbols`, `items`, `values`, `size`, in that
//! order), uses full names, drops whitespace, and writes a named type inline
//! only at its first occurrence.

use std::collections::HashSet;
use std::fmt;

use serde_json::{json, Map, Value as Json};
use sha2::{Digest, Sha256};

use super::{NamedId, NamedType, Node, Schema};
use crate::types::Value;

// ── Fingerprints ─────────────────────────────────────────────────────────────

/// Seed and empty-input value of CRC-64-AVRO.
pub const RABIN_EMPTY: u64 = 0xc15d_213a_a4d7_a795;

const RABIN_TABLE: [u64; 256] = build_rabin_table();

const fn build_rabin_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut fp = i as u64;
        let mut j = 0;
        while j < 8 {
            let mask = 0u64.wrapping_sub(fp & 1);
            fp = (fp >> 1) ^ (RABIN_EMPTY & mask);
            j += 1;
        }
        table[i] = fp;
        i += 1;
    }
    table
}

/// 64-bit Rabin fingerprint (CRC-64-AVRO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn rabin(bytes: &[u8]) -> Fingerprint {
        let mut fp = RABIN_EMPTY;
        for &b in bytes {
            fp = (fp >> 8) ^ RABIN_TABLE[((fp ^ u64::from(b)) & 0xff) as usize];
        }
        Fingerprint(fp)
    }

    pub fn sha256(bytes: &[u8]) -> [u8; 32] {
        Sha256::digest(bytes).into()
    }

    /// Little-endian bytes, the order used by single-object encoding.
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0.to_be_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ── Canonical form ───────────────────────────────────────────────────────────

pub(super) fn canonical_form(schema: &Schema) -> String {
    let mut out = String::new();
    let mut seen = HashSet::new();
    write_canonical(schema, schema.root(), &mut seen, &mut out);
    out
}

fn push_str_literal(out: &mut String, s: &str) {
    // serde_json escapes minimally, which is what canonical form requires.
    match serde_json::to_string(s) {
        Ok(lit) => out.push_str(&lit),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

fn write_canonical(schema: &Schema, node: &Node, seen: &mut HashSet<NamedId>, out: &mut String) {
    match node {
        Node::Null    => out.push_str("\"null\""),
        Node::Boolean => out.push_str("\"boolean\""),
        Node::Int     => out.push_str("\"int\""),
        Node::Long    => out.push_str("\"long\""),
        Node::Float   => out.push_str("\"float\""),
        Node::Double  => out.push_str("\"double\""),
        Node::Bytes   => out.push_str("\"bytes\""),
        Node::String  => out.push_str("\"string\""),
        Node::Array(items) => {
            out.push_str("{\"type\":\"array\",\"items\":");
            write_canonical(schema, items, seen, out);
            out.push('}');
        }
        Node::Map(values) => {
            out.push_str("{\"type\":\"map\",\"values\":");
            write_canonical(schema, values, seen, out);
            out.push('}');
        }
        Node::Union(u) => {
            out.push('[');
            for (i, b) in u.branches().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(schema, b, seen, out);
            }
            out.push(']');
        }
        Node::Named(id) => {
            let def = schema.named(*id);
            let fullname = def.name().fullname();
            if !seen.insert(*id) {
                push_str_literal(out, &fullname);
                return;
            }
            out.push_str("{\"name\":");
            push_str_literal(out, &fullname);
            match def {
                NamedType::Record(r) => {
                    out.push_str(",\"type\":\"record\",\"fields\":[");
                    for (i, f) in r.fields.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        out.push_str("{\"name\":");
                        push_str_literal(out, &f.name);
                        out.push_str(",\"type\":");
                        write_canonical(schema, &f.schema, seen, out);
                        out.push('}');
                    }
                    out.push(']');
                }
                NamedType::Enum(e) => {
                    out.push_str(",\"type\":\"enum\",\"symbols\":[");
                    for (i, s) in e.symbols.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        push_str_literal(out, s);
                    }
                    out.push(']');
                }
                NamedType::Fixed(f) => {
                    out.push_str(",\"type\":\"fixed\",\"size\":");
                    out.push_str(&f.size.to_string());
                }
            }
            out.push('}');
        }
    }
}

// ── Full form ────────────────────────────────────────────────────────────────

pub(super) fn full_form(schema: &Schema) -> Json {
    let mut seen = HashSet::new();
    full_node(schema, schema.root(), &mut seen)
}

fn full_node(schema: &Schema, node: &Node, seen: &mut HashSet<NamedId>) -> Json {
    match node {
        Node::Array(items) => json!({"type": "array", "items": full_node(schema, items, seen)}),
        Node::Map(values)  => json!({"type": "map", "values": full_node(schema, values, seen)}),
        Node::Union(u) => Json::Array(u.branches().iter().map(|b| full_node(schema, b, seen)).collect()),
        Node::Named(id) => {
            let def = schema.named(*id);
            if !seen.insert(*id) {
                return Json::String(def.name().fullname());
            }
            let mut obj = Map::new();
            obj.insert("name".into(), Json::String(def.name().fullname()));
            if !def.aliases().is_empty() {
                let aliases = def.aliases().iter().map(|a| Json::String(a.fullname())).collect();
                obj.insert("aliases".into(), Json::Array(aliases));
            }
            match def {
                NamedType::Record(r) => {
                    obj.insert("type".into(), "record".into());
                    if let Some(doc) = &r.doc {
                        obj.insert("doc".into(), doc.clone().into());
                    }
                    let fields = r.fields.iter().map(|f| {
                        let mut fo = Map::new();
                        fo.insert("name".into(), f.name.clone().into());
                        fo.insert("type".into(), full_node(schema, &f.schema, seen));
                        if let Some(d) = &f.default {
                            fo.insert("default".into(), value_to_json(d));
                        }
                        if !f.aliases.is_empty() {
                            fo.insert("aliases".into(), f.aliases.clone().into());
                        }
                        if let Some(doc) = &f.doc {
                            fo.insert("doc".into(), doc.clone().into());
                        }
                        Json::Object(fo)
                    }).collect();
                    obj.insert("fields".into(), Json::Array(fields));
                }
                NamedType::Enum(e) => {
                    obj.insert("type".into(), "enum".into());
                    obj.insert("symbols".into(), e.symbols.clone().into());
                    if let Some(d) = &e.default {
                        obj.insert("default".into(), d.clone().into());
                    }
                    if let Some(doc) = &e.doc {
                        obj.insert("doc".into(), doc.clone().into());
                    }
                }
                NamedType::Fixed(f) => {
                    obj.insert("type".into(), "fixed".into());
                    obj.insert("size".into(), f.size.into());
                    if let Some(doc) = &f.doc {
                        obj.insert("doc".into(), doc.clone().into());
                    }
                }
            }
            Json::Object(obj)
        }
        primitive => Json::String(schema.kind(primitive).to_string()),
    }
}

/// JSON rendering of a default value (the inverse of default parsing).
pub(crate) fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::Long(l) => (*l).into(),
        Value::Float(f) => f64::from(*f).into(),
        Value::Double(d) => (*d).into(),
        Value::Bytes(b) | Value::Fixed(b) => Json::String(b.iter().map(|&c| char::from(c)).collect()),
        Value::String(s) => s.clone().into(),
        Value::Enum(_, s) => s.clone().into(),
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(m) => Json::Object(m.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect()),
        Value::Union(_, v) => value_to_json(v),
        Value::Record(fields) => {
            Json::Object(fields.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect())
        }
    }
}
