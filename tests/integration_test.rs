use avrocado::io_stream::{ContainerError, Reader, Writer, WriterOptions};
use avrocado::recovery::{extract_recoverable, find_sync};
use avrocado::{check_compatibility, from_datum, to_datum, CodecRegistry, Schema, Value};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Cursor};
use std::sync::Arc;
use tempfile::NamedTempFile;

const USER: &str = r#"{
    "type": "record", "name": "User", "namespace": "test",
    "fields": [
        {"name": "id",     "type": "long"},
        {"name": "name",   "type": "string"},
        {"name": "email",  "type": ["null", "string"], "default": null},
        {"name": "tags",   "type": {"type": "array", "items": "string"}},
        {"name": "scores", "type": {"type": "map", "values": "double"}},
        {"name": "kind",   "type": {"type": "enum", "name": "Kind", "symbols": ["ADMIN", "GUEST"]}},
        {"name": "hash",   "type": {"type": "fixed", "name": "Hash", "size": 4}}
    ]
}"#;

fn user_schema() -> Arc<Schema> {
    Arc::new(Schema::parse_str(USER).unwrap())
}

fn user(id: i64) -> Value {
    let mut scores = HashMap::new();
    scores.insert("math".to_string(), Value::Double(id as f64 / 2.0));
    Value::record([
        ("id", Value::Long(id)),
        ("name", Value::String(format!("user-{id}"))),
        ("email", if id % 2 == 0 { Value::union(0, Value::Null) } else { Value::union(1, Value::String(format!("u{id}@example.com"))) }),
        ("tags", Value::Array(vec![Value::String("a".into()), Value::String("b".into())])),
        ("scores", Value::Map(scores)),
        ("kind", Value::Enum((id % 2) as u32, if id % 2 == 0 { "ADMIN" } else { "GUEST" }.into())),
        ("hash", Value::Fixed((id as u32).to_le_bytes().to_vec())),
    ])
}

fn write_users(codec: &str, n: i64, per_block: usize) -> (Vec<u8>, Vec<u64>) {
    let opts = WriterOptions { codec: codec.into(), max_block_records: Some(per_block), ..Default::default() };
    let mut w = Writer::with_options(Vec::new(), user_schema(), opts).unwrap();
    let mut boundaries = vec![];
    for id in 0..n {
        w.append(&user(id)).unwrap();
        if (id as usize + 1) % per_block == 0 {
            boundaries.push(w.sync().unwrap());
        }
    }
    (w.into_inner().unwrap(), boundaries)
}

#[test]
fn test_container_roundtrip_on_disk() {
    for codec in ["null", "deflate", "zstandard", "xz"] {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        {
            let file = BufWriter::new(File::create(&path).unwrap());
            let mut opts = WriterOptions { codec: codec.into(), sync_interval: 256, ..Default::default() };
            opts.metadata.insert("origin".into(), b"integration".to_vec());
            let mut writer = Writer::with_options(file, user_schema(), opts).unwrap();
            for id in 0..40 {
                writer.append(&user(id)).unwrap();
            }
            assert!(writer.blocks_written() > 1, "{codec}: expected several blocks");
            writer.into_inner().unwrap();
        }

        let reader = Reader::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        assert_eq!(reader.user_metadata("origin"), Some(&b"integration"[..]));
        assert_eq!(reader.codec().name(), codec);
        let records: Vec<Value> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(records, (0..40).map(user).collect::<Vec<_>>(), "{codec}");
    }
}

#[test]
fn test_resume_from_second_sync_marker() {
    let (bytes, boundaries) = write_users("deflate", 30, 10);
    let mut reader = Reader::new(Cursor::new(bytes.clone())).unwrap();
    let sync = *reader.sync_marker();

    // The first marker closes the header; the second closes block 0.
    let mut cur = Cursor::new(bytes);
    let first = find_sync(&mut cur, 0, &sync).unwrap().unwrap();
    let second = find_sync(&mut cur, first + 1, &sync).unwrap().unwrap();
    assert_eq!(second + 16, boundaries[0]);

    reader.seek(second + 16).unwrap();
    let tail: Vec<Value> = reader.map(|r| r.unwrap()).collect();
    assert_eq!(tail, (10..30).map(user).collect::<Vec<_>>());
}

#[test]
fn test_truncation_isolates_later_block() {
    let (bytes, boundaries) = write_users("null", 30, 10);
    // Cut in the middle of the third block.
    let cut = (boundaries[1] + (bytes.len() as u64 - boundaries[1]) / 2) as usize;
    let reader = Reader::new(Cursor::new(bytes[..cut].to_vec())).unwrap();

    let results: Vec<Result<Value, ContainerError>> = reader.collect();
    assert_eq!(results.len(), 21, "two full blocks, then one error, then nothing");
    for (id, r) in results[..20].iter().enumerate() {
        assert_eq!(r.as_ref().unwrap(), &user(id as i64));
    }
    let err = results[20].as_ref().unwrap_err();
    assert!(err.is_corruption());
    assert_eq!(err.block_offset(), Some(boundaries[1]));
}

#[test]
fn test_sync_mismatch_is_corruption() {
    let (mut bytes, boundaries) = write_users("null", 20, 10);
    // Last byte of block 0's trailing marker.
    bytes[boundaries[0] as usize - 1] ^= 0xff;
    let mut reader = Reader::new(Cursor::new(bytes)).unwrap();
    let err = reader.next().unwrap().unwrap_err();
    assert!(matches!(err, ContainerError::SyncMismatch { block_offset } if block_offset == reader.data_start()));
    assert!(reader.next().is_none());
}

#[test]
fn test_append_to_existing_file() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let sync = {
        let mut w = Writer::new(File::create(&path).unwrap(), user_schema()).unwrap();
        for id in 0..5 {
            w.append(&user(id)).unwrap();
        }
        let sync = *w.sync_marker();
        w.into_inner().unwrap();
        sync
    };

    {
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let mut w = Writer::append_to(file, WriterOptions::default(), &CodecRegistry::default()).unwrap();
        assert_eq!(w.sync_marker(), &sync);
        for id in 5..10 {
            w.append(&user(id)).unwrap();
        }
        w.into_inner().unwrap();
    }

    let reader = Reader::new(File::open(&path).unwrap()).unwrap();
    let records: Vec<Value> = reader.map(|r| r.unwrap()).collect();
    assert_eq!(records, (0..10).map(user).collect::<Vec<_>>());
}

#[test]
fn test_extract_recoverable_to_file() {
    let (mut bytes, boundaries) = write_users("zstandard", 30, 10);
    // Negative record count in block 1.
    bytes[boundaries[0] as usize] = 0x01;

    let out = NamedTempFile::new().unwrap();
    let report = {
        let mut dst = BufWriter::new(File::create(out.path()).unwrap());
        extract_recoverable(&mut Cursor::new(bytes), &mut dst, &CodecRegistry::default()).unwrap()
    };
    assert_eq!(report.healthy_blocks, 2);
    assert_eq!(report.recoverable_records, 20);

    let reader = Reader::new(File::open(out.path()).unwrap()).unwrap();
    let ids: Vec<i64> = reader
        .map(|r| match r.unwrap().field("id") {
            Some(Value::Long(id)) => *id,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(ids, (0..10).chain(20..30).collect::<Vec<_>>());
}

#[test]
fn test_reader_schema_projection_over_container() {
    let (bytes, _) = write_users("deflate", 12, 5);
    let reader_schema = Arc::new(
        Schema::parse_str(
            r#"{"type":"record","name":"User","namespace":"test","fields":[
                {"name":"name","type":"string"},
                {"name":"id","type":"double"},
                {"name":"active","type":"boolean","default":true}]}"#,
        )
        .unwrap(),
    );
    let reader = Reader::with_schema(Cursor::new(bytes), reader_schema).unwrap();
    let records: Vec<Value> = reader.map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 12);
    assert_eq!(
        records[3],
        Value::record([
            ("name", Value::String("user-3".into())),
            ("id", Value::Double(3.0)),
            ("active", Value::Boolean(true)),
        ])
    );
}

#[test]
fn test_incompatible_reader_fails_at_open() {
    let (bytes, _) = write_users("null", 3, 10);
    let reader_schema = Arc::new(
        Schema::parse_str(r#"{"type":"record","name":"User","namespace":"test","fields":[{"name":"id","type":"int"}]}"#)
            .unwrap(),
    );
    let err = Reader::with_schema(Cursor::new(bytes), reader_schema).unwrap_err();
    assert!(matches!(err, ContainerError::Resolve(_)));
}

// ── Resolution properties ────────────────────────────────────────────────────

#[test]
fn test_int_promotions() {
    let writer = Arc::new(Schema::parse_str(r#""int""#).unwrap());
    let bytes = to_datum(&Value::Int(-123_456), &writer).unwrap();
    for (reader, expected) in [
        (r#""long""#, Value::Long(-123_456)),
        (r#""float""#, Value::Float(-123_456.0)),
        (r#""double""#, Value::Double(-123_456.0)),
    ] {
        let reader = Arc::new(Schema::parse_str(reader).unwrap());
        assert_eq!(from_datum(&bytes, &writer, Some(&reader)).unwrap(), expected);
    }

    let long = Schema::parse_str(r#""long""#).unwrap();
    let int = Schema::parse_str(r#""int""#).unwrap();
    assert!(check_compatibility(&long, &int).is_err());
}

#[test]
fn test_field_subset_reads_consecutive_records() {
    let writer = Arc::new(
        Schema::parse_str(
            r#"{"type":"record","name":"R","fields":[
                {"name":"a","type":"int"},{"name":"b","type":"string"},{"name":"c","type":"long"}]}"#,
        )
        .unwrap(),
    );
    let reader = Arc::new(
        Schema::parse_str(r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"c","type":"long"}]}"#)
            .unwrap(),
    );
    let rec = |a: i32, b: &str, c: i64| Value::record([("a", Value::Int(a)), ("b", Value::String(b.into())), ("c", Value::Long(c))]);

    let mut bytes = to_datum(&rec(1, "skipped", 2), &writer).unwrap();
    let first_len = bytes.len();
    bytes.extend(to_datum(&rec(3, "also skipped", 4), &writer).unwrap());

    assert_eq!(
        from_datum(&bytes[..first_len], &writer, Some(&reader)).unwrap(),
        Value::record([("a", Value::Int(1)), ("c", Value::Long(2))])
    );
    assert_eq!(
        from_datum(&bytes[first_len..], &writer, Some(&reader)).unwrap(),
        Value::record([("a", Value::Int(3)), ("c", Value::Long(4))])
    );
}

#[test]
fn test_defaults_and_missing_default() {
    let writer = Arc::new(Schema::parse_str(r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"}]}"#).unwrap());
    let with_default = Arc::new(
        Schema::parse_str(
            r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"d","type":"string","default":"x"}]}"#,
        )
        .unwrap(),
    );
    let without_default = Schema::parse_str(
        r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"d","type":"string"}]}"#,
    )
    .unwrap();

    let bytes = to_datum(&Value::record([("a", Value::Int(5))]), &writer).unwrap();
    assert_eq!(
        from_datum(&bytes, &writer, Some(&with_default)).unwrap(),
        Value::record([("a", Value::Int(5)), ("d", Value::String("x".into()))])
    );
    let err = check_compatibility(&writer, &without_default).unwrap_err();
    assert_eq!(err.path.to_string(), "$.d");
}

#[test]
fn test_union_resolution() {
    let writer = Schema::parse_str(r#"["null","int"]"#).unwrap();
    assert!(check_compatibility(&writer, &Schema::parse_str(r#"["null","long","string"]"#).unwrap()).is_ok());
    assert!(check_compatibility(&writer, &Schema::parse_str(r#"["null","string"]"#).unwrap()).is_err());
}

#[test]
fn test_canonical_fingerprint_ignores_doc_and_order_of_attributes() {
    let a = Schema::parse_str(
        r#"{"type":"record","name":"P","namespace":"n","doc":"a point","aliases":["Q"],
            "fields":[{"name":"x","type":"int","doc":"x axis"},{"name":"y","type":"int"}]}"#,
    )
    .unwrap();
    let b = Schema::parse_str(
        r#"{"fields":[{"type":"int","name":"x"},{"name":"y","type":"int"}],"name":"n.P","type":"record"}"#,
    )
    .unwrap();
    let swapped = Schema::parse_str(
        r#"{"type":"record","name":"n.P","fields":[{"name":"y","type":"int"},{"name":"x","type":"int"}]}"#,
    )
    .unwrap();

    assert_eq!(a.canonical_form(), b.canonical_form());
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_ne!(a.fingerprint(), swapped.fingerprint());
}
