//! Single-object encoding.
//!
//! ```text
//! 0  2  marker 0xC3 0x01
//! 2  8  writer schema Rabin fingerprint, little-endian
//! 10 .. datum
//! ```
//! The fingerprint lets a reader find the writer schema in a store of known
//! schemas before resolving the datum against its own schema.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::binary::{self, DecodeError, EncodeError};
use crate::resolve::{plan_for, ResolveError};
use crate::schema::{Fingerprint, Schema};
use crate::types::Value;

pub const MARKER: [u8; 2] = [0xC3, 0x01];
pub const HEADER_SIZE: usize = MARKER.len() + 8;

#[derive(Error, Debug)]
pub enum SingleObjectError {
    #[error("Not a single-object datum: bad marker")]
    InvalidMarker,
    #[error("Single-object datum is shorter than its 10-byte header")]
    Truncated,
    #[error("No schema known for fingerprint {0}")]
    UnknownSchema(Fingerprint),
    #[error("{0}")]
    Encode(#[from] EncodeError),
    #[error("{0}")]
    Resolve(#[from] ResolveError),
    #[error("{0}")]
    Decode(#[from] DecodeError),
}

/// Writer schemas addressable by their Rabin fingerprint.
pub trait SchemaStore {
    fn lookup(&self, fingerprint: Fingerprint) -> Option<Arc<Schema>>;
}

impl SchemaStore for HashMap<Fingerprint, Arc<Schema>> {
    fn lookup(&self, fingerprint: Fingerprint) -> Option<Arc<Schema>> {
        self.get(&fingerprint).cloned()
    }
}

impl<S: SchemaStore + ?Sized> SchemaStore for &S {
    fn lookup(&self, fingerprint: Fingerprint) -> Option<Arc<Schema>> {
        (**self).lookup(fingerprint)
    }
}

/// A store holding a single schema.
impl SchemaStore for Arc<Schema> {
    fn lookup(&self, fingerprint: Fingerprint) -> Option<Arc<Schema>> {
        (self.fingerprint() == fingerprint).then(|| Arc::clone(self))
    }
}

/// Encode `value` with its schema's fingerprint in front.
pub fn encode(value: &Value, schema: &Schema) -> Result<Vec<u8>, SingleObjectError> {
    let datum = binary::encode(value, schema)?;
    let mut out = Vec::with_capacity(HEADER_SIZE + datum.len());
    out.extend_from_slice(&MARKER);
    out.extend_from_slice(&schema.fingerprint().to_le_bytes());
    out.extend_from_slice(&datum);
    Ok(out)
}

/// Split a single-object buffer into its fingerprint and datum.
pub fn split(bytes: &[u8]) -> Result<(Fingerprint, &[u8]), SingleObjectError> {
    if bytes.len() < MARKER.len() || bytes[..MARKER.len()] != MARKER {
        return Err(if bytes.len() < MARKER.len() && MARKER.starts_with(bytes) {
            SingleObjectError::Truncated
        } else {
            SingleObjectError::InvalidMarker
        });
    }
    if bytes.len() < HEADER_SIZE {
        return Err(SingleObjectError::Truncated);
    }
    let (head, datum) = bytes.split_at(HEADER_SIZE);
    let mut fp = [0u8; 8];
    fp.copy_from_slice(&head[MARKER.len()..]);
    Ok((Fingerprint(u64::from_le_bytes(fp)), datum))
}

/// Decode a single-object buffer.  The writer schema is looked up in
/// `store`; the datum is resolved against `reader`, or read with the writer
/// schema when `reader` is `None`.
pub fn decode<S: SchemaStore + ?Sized>(
    bytes:  &[u8],
    store:  &S,
    reader: Option<&Arc<Schema>>,
) -> Result<Value, SingleObjectError> {
    let (fingerprint, datum) = split(bytes)?;
    let writer = store.lookup(fingerprint).ok_or(SingleObjectError::UnknownSchema(fingerprint))?;
    let plan = plan_for(&writer, reader.unwrap_or(&writer))?;
    Ok(plan.decode_slice(datum)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1() -> Arc<Schema> {
        Arc::new(Schema::parse_str(r#"{"type":"record","name":"Ev","fields":[{"name":"id","type":"int"}]}"#).unwrap())
    }

    fn v2() -> Arc<Schema> {
        Arc::new(
            Schema::parse_str(
                r#"{"type":"record","name":"Ev","fields":[
                    {"name":"id","type":"long"},
                    {"name":"tag","type":"string","default":"none"}]}"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn layout() {
        let bytes = encode(&Value::record([("id", Value::Int(3))]), &v1()).unwrap();
        assert_eq!(&bytes[..2], &[0xC3, 0x01]);
        assert_eq!(&bytes[2..10], &v1().fingerprint().to_le_bytes());
        assert_eq!(&bytes[10..], &[6]);
    }

    #[test]
    fn decode_through_store_and_resolve() {
        let mut store: HashMap<Fingerprint, Arc<Schema>> = HashMap::new();
        store.insert(v1().fingerprint(), v1());
        let bytes = encode(&Value::record([("id", Value::Int(3))]), &v1()).unwrap();

        let same = decode(&bytes, &store, None).unwrap();
        assert_eq!(same, Value::record([("id", Value::Int(3))]));

        let evolved = decode(&bytes, &store, Some(&v2())).unwrap();
        assert_eq!(evolved, Value::record([("id", Value::Long(3)), ("tag", Value::String("none".into()))]));
    }

    #[test]
    fn rejects_bad_input() {
        let store = v1();
        assert!(matches!(decode(&[0xC3, 0x02, 0, 0], &store, None), Err(SingleObjectError::InvalidMarker)));
        assert!(matches!(decode(&[0xC3, 0x01, 1, 2], &store, None), Err(SingleObjectError::Truncated)));
        assert!(matches!(decode(&[0xC3], &store, None), Err(SingleObjectError::Truncated)));

        let other = Arc::new(Schema::parse_str(r#""string""#).unwrap());
        let bytes = encode(&Value::String("x".into()), &other).unwrap();
        assert!(matches!(decode(&bytes, &store, None), Err(SingleObjectError::UnknownSchema(_))));

        let mut bytes = encode(&Value::record([("id", Value::Int(3))]), &v1()).unwrap();
        bytes.push(0);
        assert!(matches!(decode(&bytes, &store, None), Err(SingleObjectError::Decode(_))));
    }
}
