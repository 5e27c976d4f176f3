//! Plan-driven decoding: walk the writer's bytes, emit reader-shaped values.

use std::collections::HashMap;

use super::{FieldAction, Promotion, ResolvedPlan, Step};
use crate::binary::{skip, DecodeError, SliceReader};
use crate::types::Value;

pub(super) fn read(plan: &ResolvedPlan, step: &Step, r: &mut SliceReader<'_>) -> Result<Value, DecodeError> {
    Ok(match step {
        Step::Null => Value::Null,
        Step::Boolean => Value::Boolean(r.read_boolean()?),
        Step::Int => Value::Int(r.read_int()?),
        Step::Long => Value::Long(r.read_long()?),
        Step::Float => Value::Float(r.read_float()?),
        Step::Double => Value::Double(r.read_double()?),
        Step::Bytes => Value::Bytes(r.read_bytes()?.to_vec()),
        Step::String => Value::String(r.read_string()?),
        Step::Promote(p) => promote(*p, r)?,
        Step::Fixed(size) => Value::Fixed(r.read_exact(*size)?.to_vec()),
        Step::Enum(mapping) => {
            let index = r.read_index(mapping.len())?;
            let (target, symbol) = &mapping[index];
            Value::Enum(*target, symbol.clone())
        }
        Step::Array { items, zero_width } => {
            let mut out = Vec::new();
            loop {
                let (count, _) = r.read_block_header(*zero_width, out.len())?;
                if count == 0 {
                    break;
                }
                if !*zero_width {
                    out.reserve(count);
                }
                for _ in 0..count {
                    out.push(read(plan, items, r)?);
                }
            }
            Value::Array(out)
        }
        Step::Map(values) => {
            let mut out = HashMap::new();
            loop {
                let (count, _) = r.read_block_header(false, out.len())?;
                if count == 0 {
                    break;
                }
                for _ in 0..count {
                    let key = r.read_string()?;
                    out.insert(key, read(plan, values, r)?);
                }
            }
            Value::Map(out)
        }
        Step::WriterUnion(branches) => {
            let index = r.read_index(branches.len())?;
            read(plan, &branches[index], r)?
        }
        Step::ReaderUnion { branch, step } => Value::union(*branch, read(plan, step, r)?),
        Step::Record(index) => {
            let rec = &plan.records[*index];
            let mut slots: Vec<Option<Value>> = vec![None; rec.names.len()];
            for action in &rec.actions {
                match action {
                    FieldAction::Read { target, step } => slots[*target] = Some(read(plan, step, r)?),
                    FieldAction::Skip(node) => skip(&plan.writer, node, r)?,
                }
            }
            for (target, default) in &rec.defaults {
                slots[*target] = Some(default.clone());
            }
            Value::Record(
                rec.names
                    .iter()
                    .zip(slots)
                    .map(|(name, v)| (name.clone(), v.unwrap_or(Value::Null)))
                    .collect(),
            )
        }
    })
}

fn promote(p: Promotion, r: &mut SliceReader<'_>) -> Result<Value, DecodeError> {
    Ok(match p {
        Promotion::IntToLong => Value::Long(i64::from(r.read_int()?)),
        Promotion::IntToFloat => Value::Float(r.read_int()? as f32),
        Promotion::IntToDouble => Value::Double(f64::from(r.read_int()?)),
        Promotion::LongToFloat => Value::Float(r.read_long()? as f32),
        Promotion::LongToDouble => Value::Double(r.read_long()? as f64),
        Promotion::FloatToDouble => Value::Double(f64::from(r.read_float()?)),
        Promotion::StringToBytes => Value::Bytes(r.read_bytes()?.to_vec()),
        Promotion::BytesToString => Value::String(r.read_string()?),
    })
}
