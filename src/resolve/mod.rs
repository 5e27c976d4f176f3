//! Writer/reader schema resolution.
//!
//! A [`ResolvedPlan`] is built once per (writer, reader) pair.  It mirrors
//! the writer schema's shape, because that is the order bytes arrive in, and
//! records at each node what reader value to produce: a direct read, a
//! promotion, a skip, a projected record, a remapped enum symbol.  Every
//! incompatibility is found while building the plan, so decoding never has
//! to re-check schemas.
//!
//! Record plans are stored in an arena and referenced by index, so a
//! recursive writer/reader pair yields a finite plan.

mod cache;
mod decode;

pub use cache::{cached_plans, plan_for};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::binary::{DecodeError, SliceReader};
use crate::path::{FieldPath, Segment};
use crate::schema::{EnumSchema, Kind, Name, NamedId, NamedType, Node, RecordSchema, Schema};
use crate::types::Value;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveReason {
    /// Kinds that can never be read as one another.
    Incompatible { writer: String, reader: String },
    NameMismatch { writer: String, reader: String },
    SizeMismatch { writer: usize, reader: usize },
    /// Reader field absent from the writer and without a default.
    MissingDefault { field: String },
    /// Writer enum symbol unknown to the reader, which has no default symbol.
    MissingSymbol { symbol: String },
    /// Writer type matches no branch of the reader union.
    NoMatchingBranch { writer: String, reader: String },
}

impl fmt::Display for ResolveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveReason::Incompatible { writer, reader } => {
                write!(f, "writer type {writer} cannot be read as {reader}")
            }
            ResolveReason::NameMismatch { writer, reader } => {
                write!(f, "writer type {writer} does not match reader type {reader} by name or alias")
            }
            ResolveReason::SizeMismatch { writer, reader } => {
                write!(f, "fixed size {writer} does not match reader size {reader}")
            }
            ResolveReason::MissingDefault { field } => {
                write!(f, "reader field '{field}' is not written and has no default")
            }
            ResolveReason::MissingSymbol { symbol } => {
                write!(f, "writer symbol '{symbol}' is unknown to the reader enum, which has no default")
            }
            ResolveReason::NoMatchingBranch { writer, reader } => {
                write!(f, "writer type {writer} matches no branch of reader union {reader}")
            }
        }
    }
}

/// The writer and reader schemas cannot be reconciled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot resolve {path}: {reason}")]
pub struct ResolveError {
    pub path:   FieldPath,
    pub reason: ResolveReason,
}

impl ResolveError {
    fn new(reason: ResolveReason) -> Self {
        Self { path: FieldPath::root(), reason }
    }

    fn within(mut self, segment: Segment) -> Self {
        self.path = self.path.within(segment);
        self
    }
}

// ── Plan ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Promotion {
    IntToLong,
    IntToFloat,
    IntToDouble,
    LongToFloat,
    LongToDouble,
    FloatToDouble,
    StringToBytes,
    BytesToString,
}

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Promote(Promotion),
    Fixed(usize),
    /// Writer symbol index → reader (index, symbol).
    Enum(Vec<(u32, String)>),
    Array { items: Box<Step>, zero_width: bool },
    Map(Box<Step>),
    /// One step per writer branch.
    WriterUnion(Vec<Step>),
    /// Non-union writer read into one reader branch.
    ReaderUnion { branch: u32, step: Box<Step> },
    Record(usize),
}

#[derive(Debug, Clone)]
pub(crate) enum FieldAction {
    Read { target: usize, step: Step },
    Skip(Node),
}

#[derive(Debug, Clone)]
pub(crate) struct RecordPlan {
    /// One action per writer field, in writer order.
    actions:   Vec<FieldAction>,
    /// Reader field names, in reader order.
    names:     Vec<String>,
    /// Reader fields filled from defaults.
    defaults:  Vec<(usize, Value)>,
}

/// Immutable decoding plan for one writer/reader schema pair.
#[derive(Debug)]
pub struct ResolvedPlan {
    writer:  Arc<Schema>,
    reader:  Arc<Schema>,
    root:    Step,
    records: Vec<RecordPlan>,
}

impl ResolvedPlan {
    pub fn writer(&self) -> &Arc<Schema> {
        &self.writer
    }

    pub fn reader(&self) -> &Arc<Schema> {
        &self.reader
    }

    /// Decode one writer-encoded datum into a reader-shaped value.
    pub fn decode(&self, r: &mut SliceReader<'_>) -> Result<Value, DecodeError> {
        decode::read(self, &self.root, r)
    }

    /// Decode a buffer holding exactly one datum.
    pub fn decode_slice(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        let mut r = SliceReader::new(bytes);
        let value = self.decode(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}

/// Build a plan without consulting the cache.
pub fn resolve(writer: Arc<Schema>, reader: Arc<Schema>) -> Result<ResolvedPlan, ResolveError> {
    let (root, records) = {
        let mut b = Builder::new(&writer, &reader);
        let root = b.step(writer.root(), reader.root())?;
        (root, b.records)
    };
    debug!(
        writer = %writer.fingerprint(),
        reader = %reader.resolution_fingerprint(),
        records = records.len(),
        "built resolution plan"
    );
    Ok(ResolvedPlan { writer, reader, root, records })
}

/// Check that data written with `writer` can be read with `reader`.
pub fn check_compatibility(writer: &Schema, reader: &Schema) -> Result<(), ResolveError> {
    Builder::new(writer, reader).step(writer.root(), reader.root()).map(|_| ())
}

// ── Builder ──────────────────────────────────────────────────────────────────

struct Builder<'s> {
    writer:  &'s Schema,
    reader:  &'s Schema,
    records: Vec<RecordPlan>,
    memo:    HashMap<(NamedId, NamedId), usize>,
}

impl<'s> Builder<'s> {
    fn new(writer: &'s Schema, reader: &'s Schema) -> Self {
        Self { writer, reader, records: Vec::new(), memo: HashMap::new() }
    }

    fn incompatible(&self, w: &Node, r: &Node) -> ResolveError {
        ResolveError::new(ResolveReason::Incompatible {
            writer: self.writer.describe(w),
            reader: self.reader.describe(r),
        })
    }

    fn step(&mut self, w: &Node, r: &Node) -> Result<Step, ResolveError> {
        use Promotion::*;

        if let Node::Union(wu) = w {
            let mut steps = Vec::with_capacity(wu.branches().len());
            for (i, branch) in wu.branches().iter().enumerate() {
                let step = match r {
                    Node::Union(_) => self.into_reader_union(branch, r),
                    _ => self.step(branch, r),
                };
                steps.push(step.map_err(|e| e.within(Segment::Branch(i)))?);
            }
            return Ok(Step::WriterUnion(steps));
        }

        Ok(match (w, r) {
            (_, Node::Union(_)) => self.into_reader_union(w, r)?,

            (Node::Null, Node::Null) => Step::Null,
            (Node::Boolean, Node::Boolean) => Step::Boolean,
            (Node::Int, Node::Int) => Step::Int,
            (Node::Long, Node::Long) => Step::Long,
            (Node::Float, Node::Float) => Step::Float,
            (Node::Double, Node::Double) => Step::Double,
            (Node::Bytes, Node::Bytes) => Step::Bytes,
            (Node::String, Node::String) => Step::String,

            (Node::Int, Node::Long) => Step::Promote(IntToLong),
            (Node::Int, Node::Float) => Step::Promote(IntToFloat),
            (Node::Int, Node::Double) => Step::Promote(IntToDouble),
            (Node::Long, Node::Float) => Step::Promote(LongToFloat),
            (Node::Long, Node::Double) => Step::Promote(LongToDouble),
            (Node::Float, Node::Double) => Step::Promote(FloatToDouble),
            (Node::String, Node::Bytes) => Step::Promote(StringToBytes),
            (Node::Bytes, Node::String) => Step::Promote(BytesToString),

            (Node::Array(wi), Node::Array(ri)) => {
                let items = self.step(wi, ri).map_err(|e| e.within(Segment::Items))?;
                Step::Array { items: Box::new(items), zero_width: self.writer.encodes_empty(wi) }
            }
            (Node::Map(wv), Node::Map(rv)) => {
                Step::Map(Box::new(self.step(wv, rv).map_err(|e| e.within(Segment::Values))?))
            }

            (Node::Named(wid), Node::Named(rid)) => self.named(*wid, *rid, w, r)?,

            _ => return Err(self.incompatible(w, r)),
        })
    }

    /// Resolve a non-union writer node against a reader union: the first
    /// branch of the same kind wins, then the first branch it promotes to.
    fn into_reader_union(&mut self, w: &Node, r: &Node) -> Result<Step, ResolveError> {
        let Node::Union(ru) = r else {
            return self.step(w, r);
        };
        let wkind = self.writer.kind(w);
        let (mut order, rest): (Vec<_>, Vec<_>) =
            ru.branches().iter().enumerate().partition(|(_, b)| self.same_kind(w, wkind, b));
        order.extend(rest);

        for (i, branch) in order {
            let saved = self.records.len();
            match self.step(w, branch) {
                Ok(step) => return Ok(Step::ReaderUnion { branch: i as u32, step: Box::new(step) }),
                Err(_) => self.rollback(saved),
            }
        }
        Err(ResolveError::new(ResolveReason::NoMatchingBranch {
            writer: self.writer.describe(w),
            reader: self.reader.describe(r),
        }))
    }

    fn same_kind(&self, w: &Node, wkind: Kind, r: &Node) -> bool {
        if self.reader.kind(r) != wkind {
            return false;
        }
        match (w, r) {
            (Node::Named(wid), Node::Named(rid)) => {
                names_match(self.writer.named(*wid).name(), self.reader.named(*rid))
            }
            _ => true,
        }
    }

    /// Forget record plans built by a failed union-branch attempt.
    fn rollback(&mut self, saved: usize) {
        self.records.truncate(saved);
        self.memo.retain(|_, index| *index < saved);
    }

    fn named(&mut self, wid: NamedId, rid: NamedId, w: &Node, r: &Node) -> Result<Step, ResolveError> {
        let (writer, reader) = (self.writer, self.reader);
        let wt = writer.named(wid);
        let rt = reader.named(rid);
        if wt.kind() != rt.kind() {
            return Err(self.incompatible(w, r));
        }
        if !names_match(wt.name(), rt) {
            return Err(ResolveError::new(ResolveReason::NameMismatch {
                writer: wt.name().fullname(),
                reader: rt.name().fullname(),
            }));
        }
        match (wt, rt) {
            (NamedType::Fixed(wf), NamedType::Fixed(rf)) => {
                if wf.size != rf.size {
                    return Err(ResolveError::new(ResolveReason::SizeMismatch {
                        writer: wf.size,
                        reader: rf.size,
                    }));
                }
                Ok(Step::Fixed(wf.size))
            }
            (NamedType::Enum(we), NamedType::Enum(re)) => enum_step(we, re),
            (NamedType::Record(wr), NamedType::Record(rr)) => {
                if let Some(&index) = self.memo.get(&(wid, rid)) {
                    return Ok(Step::Record(index));
                }
                let index = self.records.len();
                self.memo.insert((wid, rid), index);
                self.records.push(RecordPlan { actions: Vec::new(), names: Vec::new(), defaults: Vec::new() });
                let plan = self.record(wr, rr)?;
                self.records[index] = plan;
                Ok(Step::Record(index))
            }
            _ => Err(self.incompatible(w, r)),
        }
    }

    fn record(&mut self, wr: &RecordSchema, rr: &RecordSchema) -> Result<RecordPlan, ResolveError> {
        let mut taken = vec![false; rr.fields.len()];
        let mut actions = Vec::with_capacity(wr.fields.len());

        for wf in &wr.fields {
            let target = rr
                .field(&wf.name)
                .map(|(i, _)| i)
                .or_else(|| rr.fields.iter().position(|rf| rf.aliases.iter().any(|a| *a == wf.name)))
                .filter(|&i| !taken[i]);
            match target {
                Some(i) => {
                    taken[i] = true;
                    let rf = &rr.fields[i];
                    let step = self
                        .step(&wf.schema, &rf.schema)
                        .map_err(|e| e.within(Segment::Field(rf.name.clone())))?;
                    actions.push(FieldAction::Read { target: i, step });
                }
                None => actions.push(FieldAction::Skip(wf.schema.clone())),
            }
        }

        let mut defaults = Vec::new();
        for (i, rf) in rr.fields.iter().enumerate() {
            if taken[i] {
                continue;
            }
            match &rf.default {
                Some(v) => defaults.push((i, v.clone())),
                None => {
                    return Err(ResolveError::new(ResolveReason::MissingDefault { field: rf.name.clone() })
                        .within(Segment::Field(rf.name.clone())))
                }
            }
        }

        Ok(RecordPlan {
            actions,
            names: rr.fields.iter().map(|f| f.name.clone()).collect(),
            defaults,
        })
    }
}

fn enum_step(we: &EnumSchema, re: &EnumSchema) -> Result<Step, ResolveError> {
    let fallback = re.default.as_deref().and_then(|d| re.position(d));
    we.symbols
        .iter()
        .map(|symbol| {
            let index = re
                .position(symbol)
                .or(fallback)
                .ok_or_else(|| ResolveError::new(ResolveReason::MissingSymbol { symbol: symbol.clone() }))?;
            Ok((index as u32, re.symbols[index].clone()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Step::Enum)
}

/// Full name, simple name, or one of the reader's aliases.
fn names_match(writer: &Name, reader: &NamedType) -> bool {
    let rn = reader.name();
    writer.fullname() == rn.fullname()
        || writer.name == rn.name
        || reader
            .aliases()
            .iter()
            .any(|a| a.fullname() == writer.fullname() || a.name == writer.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::encode;

    fn arc(text: &str) -> Arc<Schema> {
        Arc::new(Schema::parse_str(text).unwrap())
    }

    fn read_as(writer: &str, reader: &str, value: Value) -> Result<Value, ResolveError> {
        let (w, r) = (arc(writer), arc(reader));
        let bytes = encode(&value, &w).unwrap();
        let plan = resolve(w, r)?;
        Ok(plan.decode_slice(&bytes).unwrap())
    }

    #[test]
    fn int_promotes_to_wider_kinds() {
        assert_eq!(read_as(r#""int""#, r#""long""#, Value::Int(-7)).unwrap(), Value::Long(-7));
        assert_eq!(read_as(r#""int""#, r#""float""#, Value::Int(3)).unwrap(), Value::Float(3.0));
        assert_eq!(read_as(r#""int""#, r#""double""#, Value::Int(3)).unwrap(), Value::Double(3.0));
        assert_eq!(read_as(r#""float""#, r#""double""#, Value::Float(1.5)).unwrap(), Value::Double(1.5));
    }

    #[test]
    fn narrowing_is_rejected() {
        let err = read_as(r#""long""#, r#""int""#, Value::Long(1)).unwrap_err();
        assert!(matches!(err.reason, ResolveReason::Incompatible { .. }));
        assert!(read_as(r#""double""#, r#""float""#, Value::Double(1.0)).is_err());
    }

    #[test]
    fn string_and_bytes_interchange() {
        assert_eq!(read_as(r#""string""#, r#""bytes""#, "hi".into()).unwrap(), Value::Bytes(b"hi".to_vec()));
        assert_eq!(read_as(r#""bytes""#, r#""string""#, Value::Bytes(b"hi".to_vec())).unwrap(), "hi".into());
    }

    #[test]
    fn enum_symbols_map_by_name() {
        let w = r#"{"type":"enum","name":"E","symbols":["A","B","C"]}"#;
        let r = r#"{"type":"enum","name":"E","symbols":["C","A","Z"],"default":"Z"}"#;
        assert_eq!(read_as(w, r, Value::Enum(0, "A".into())).unwrap(), Value::Enum(1, "A".into()));
        assert_eq!(read_as(w, r, Value::Enum(1, "B".into())).unwrap(), Value::Enum(2, "Z".into()));

        let strict = r#"{"type":"enum","name":"E","symbols":["A","C"]}"#;
        let err = read_as(w, strict, Value::Enum(0, "A".into())).unwrap_err();
        assert_eq!(err.reason, ResolveReason::MissingSymbol { symbol: "B".into() });
    }

    #[test]
    fn record_names_match_through_aliases() {
        let w = r#"{"type":"record","name":"old.Point","fields":[{"name":"x","type":"int"}]}"#;
        let r = r#"{"type":"record","name":"new.Pt","aliases":["old.Point"],"fields":[{"name":"x","type":"int"}]}"#;
        assert!(check_compatibility(&arc(w), &arc(r)).is_ok());

        let other = r#"{"type":"record","name":"Other","fields":[{"name":"x","type":"int"}]}"#;
        let err = check_compatibility(&arc(w), &arc(other)).unwrap_err();
        assert!(matches!(err.reason, ResolveReason::NameMismatch { .. }));
    }

    #[test]
    fn field_alias_targets_renamed_field() {
        let w = r#"{"type":"record","name":"R","fields":[{"name":"old","type":"int"}]}"#;
        let r = r#"{"type":"record","name":"R","fields":[{"name":"new","type":"long","aliases":["old"]}]}"#;
        let v = read_as(w, r, Value::record([("old", Value::Int(5))])).unwrap();
        assert_eq!(v, Value::record([("new", Value::Long(5))]));
    }

    #[test]
    fn missing_default_names_the_field() {
        let w = r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"}]}"#;
        let r = r#"{"type":"record","name":"R","fields":[{"name":"a","type":"int"},{"name":"b","type":"int"}]}"#;
        let err = check_compatibility(&arc(w), &arc(r)).unwrap_err();
        assert_eq!(err.path.to_string(), "$.b");
        assert_eq!(err.reason, ResolveReason::MissingDefault { field: "b".into() });
    }

    #[test]
    fn fixed_sizes_must_agree() {
        let err = check_compatibility(
            &arc(r#"{"type":"fixed","name":"F","size":4}"#),
            &arc(r#"{"type":"fixed","name":"F","size":8}"#),
        )
        .unwrap_err();
        assert_eq!(err.reason, ResolveReason::SizeMismatch { writer: 4, reader: 8 });
    }

    #[test]
    fn writer_union_into_plain_reader() {
        let v = read_as(r#"["int","long"]"#, r#""double""#, Value::union(0, Value::Int(2))).unwrap();
        assert_eq!(v, Value::Double(2.0));
    }

    #[test]
    fn plain_writer_into_reader_union_prefers_exact_kind() {
        let v = read_as(r#""int""#, r#"["null","double","int"]"#, Value::Int(9)).unwrap();
        assert_eq!(v, Value::union(2, Value::Int(9)));
        let v = read_as(r#""int""#, r#"["null","double"]"#, Value::Int(9)).unwrap();
        assert_eq!(v, Value::union(1, Value::Double(9.0)));
    }

    #[test]
    fn failed_branch_attempt_leaves_no_plan_behind() {
        // The record branch matches by name but lacks a default for `y`;
        // the map branch is the wrong kind.
        let w = r#"{"type":"record","name":"R","fields":[{"name":"x","type":"int"}]}"#;
        let r = r#"[
            {"type":"record","name":"R","fields":[{"name":"x","type":"int"},{"name":"y","type":"int"}]},
            {"type":"map","values":"int"}
        ]"#;
        let err = check_compatibility(&arc(w), &arc(r)).unwrap_err();
        assert!(matches!(err.reason, ResolveReason::NoMatchingBranch { .. }));
    }

    #[test]
    fn recursive_pair_builds_finite_plan() {
        let s = r#"{"type":"record","name":"L","fields":[
            {"name":"v","type":"int"},
            {"name":"next","type":["null","L"]}
        ]}"#;
        let plan = resolve(arc(s), arc(s)).unwrap();
        assert_eq!(plan.records.len(), 1);
    }
}
