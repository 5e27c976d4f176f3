pub mod path;
pub mod types;
pub mod schema;
pub mod binary;
pub mod resolve;
pub mod codec;
pub mod header;
pub mod block;
pub mod io_stream;
pub mod recovery;
pub mod perf;
pub mod single_object;

pub use path::FieldPath;
pub use types::Value;
pub use schema::{Fingerprint, Schema, SchemaError};
pub use binary::{DecodeError, DecodeLimits, EncodeError, EncoderOptions};
pub use resolve::{check_compatibility, plan_for, ResolveError, ResolvedPlan};
pub use codec::{Codec, CodecError, CodecRegistry};
pub use header::FileHeader;
pub use block::{decode_block, encode_block, BlockHeader};
pub use io_stream::{ContainerError, Reader, Writer, WriterOptions};
pub use recovery::{scan, RecoveryReport};

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Schema(#[from] SchemaError),
    #[error("{0}")]
    Encode(#[from] EncodeError),
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("{0}")]
    Resolve(#[from] ResolveError),
    #[error("{0}")]
    Container(#[from] ContainerError),
}

/// Encode one value with `schema`.
pub fn to_datum(value: &Value, schema: &Schema) -> Result<Vec<u8>, Error> {
    Ok(binary::encode(value, schema)?)
}

/// Decode a buffer holding exactly one datum written with `writer`, resolved
/// against `reader` when given.  Trailing bytes are an error.
pub fn from_datum(bytes: &[u8], writer: &Arc<Schema>, reader: Option<&Arc<Schema>>) -> Result<Value, Error> {
    let plan = plan_for(writer, reader.unwrap_or(writer))?;
    Ok(plan.decode_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datum_roundtrip_and_promotion() {
        let writer = Arc::new(Schema::parse_str(r#"["null","int"]"#).unwrap());
        let reader = Arc::new(Schema::parse_str(r#"["null","long","string"]"#).unwrap());
        let bytes = to_datum(&Value::union(1, Value::Int(-7)), &writer).unwrap();

        assert_eq!(from_datum(&bytes, &writer, None).unwrap(), Value::union(1, Value::Int(-7)));
        assert_eq!(from_datum(&bytes, &writer, Some(&reader)).unwrap(), Value::union(1, Value::Long(-7)));
    }

    #[test]
    fn errors_are_classified() {
        let writer = Arc::new(Schema::parse_str(r#""int""#).unwrap());
        let reader = Arc::new(Schema::parse_str(r#""string""#).unwrap());
        assert!(matches!(to_datum(&Value::Long(1), &writer), Err(Error::Encode(_))));
        assert!(matches!(from_datum(&[2], &writer, Some(&reader)), Err(Error::Resolve(_))));
        assert!(matches!(from_datum(&[2, 0], &writer, None), Err(Error::Decode(_))));
        assert!(matches!("{".parse::<Schema>().map_err(Error::from), Err(Error::Schema(_))));
    }
}
