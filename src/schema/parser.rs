//! JSON schema text → arena-backed [`Node`] tree.
//!
//! The parser keeps one slot per named type.  A record's slot is created
//! (with no definition yet) before its fields are parsed, so fields can
//! refer to the record itself or to any type defined earlier in the
//! document.  Enums and fixed types have no children and are registered
//! once their attributes validate.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value as Json};

use super::{
    EnumSchema, Field, FixedSchema, Kind, Name, NamedId, NamedType, Node, RecordSchema,
    SchemaError, UnionSchema,
};
use crate::types::Value;

type JsonObject = Map<String, Json>;

struct Slot {
    fullname: String,
    def:      Option<NamedType>,
}

#[derive(Default)]
pub(super) struct Parser {
    slots: Vec<Slot>,
    names: HashMap<String, NamedId>,
}

impl Parser {
    pub(super) fn parse_document(
        mut self,
        json: &Json,
    ) -> Result<(Node, Vec<NamedType>, HashMap<String, NamedId>), SchemaError> {
        let root = self.parse(json, None, "$")?;
        let Parser { slots, names } = self;
        let mut named = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot.def {
                Some(def) => named.push(def),
                None => {
                    return Err(SchemaError::UnknownName { path: "$".into(), name: slot.fullname });
                }
            }
        }
        Ok((root, named, names))
    }

    fn parse(&mut self, json: &Json, ns: Option<&str>, path: &str) -> Result<Node, SchemaError> {
        match json {
            Json::String(name) => self.parse_type_name(name, ns, path),
            Json::Array(branches) => self.parse_union(branches, ns, path),
            Json::Object(obj) => self.parse_object(obj, ns, path),
            other => Err(malformed(path, format!("expected a type name, object or array, found {other}"))),
        }
    }

    fn parse_type_name(&self, name: &str, ns: Option<&str>, path: &str) -> Result<Node, SchemaError> {
        match primitive(name) {
            Some(node) => Ok(node),
            None => self.resolve_reference(name, ns, path),
        }
    }

    fn resolve_reference(&self, raw: &str, ns: Option<&str>, path: &str) -> Result<Node, SchemaError> {
        let qualified = Name::qualify(raw, ns).fullname();
        let found = self.names.get(&qualified).or_else(|| self.names.get(raw));
        match found {
            Some(id) => Ok(Node::Named(*id)),
            None => Err(SchemaError::UnknownName { path: path.into(), name: raw.into() }),
        }
    }

    fn parse_union(&mut self, branches: &[Json], ns: Option<&str>, path: &str) -> Result<Node, SchemaError> {
        let mut nodes = Vec::with_capacity(branches.len());
        let mut seen = HashSet::new();
        for (i, branch) in branches.iter().enumerate() {
            let bpath = format!("{path}[{i}]");
            let node = self.parse(branch, ns, &bpath)?;
            if matches!(node, Node::Union(_)) {
                return Err(SchemaError::NestedUnion { path: path.into() });
            }
            let key = self.branch_key(&node);
            if !seen.insert(key.clone()) {
                return Err(SchemaError::DuplicateBranch { path: path.into(), kind: key });
            }
            nodes.push(node);
        }
        Ok(Node::Union(UnionSchema { branches: nodes }))
    }

    /// Distinctness key for a union branch: kind for unnamed, full name for named.
    fn branch_key(&self, node: &Node) -> String {
        match node {
            Node::Named(id) => self.slots[id.0].fullname.clone(),
            Node::Null      => Kind::Null.to_string(),
            Node::Boolean   => Kind::Boolean.to_string(),
            Node::Int       => Kind::Int.to_string(),
            Node::Long      => Kind::Long.to_string(),
            Node::Float     => Kind::Float.to_string(),
            Node::Double    => Kind::Double.to_string(),
            Node::Bytes     => Kind::Bytes.to_string(),
            Node::String    => Kind::String.to_string(),
            Node::Array(_)  => Kind::Array.to_string(),
            Node::Map(_)    => Kind::Map.to_string(),
            Node::Union(_)  => Kind::Union.to_string(),
        }
    }

    fn parse_object(&mut self, obj: &JsonObject, ns: Option<&str>, path: &str) -> Result<Node, SchemaError> {
        let ty = obj
            .get("type")
            .ok_or_else(|| malformed(path, "missing 'type' attribute"))?;
        match ty {
            Json::String(t) => match t.as_str() {
                "record" | "error" => self.parse_record(obj, ns, path),
                "enum" => self.parse_enum(obj, ns, path),
                "fixed" => self.parse_fixed(obj, ns, path),
                "array" => {
                    let items = obj
                        .get("items")
                        .ok_or_else(|| malformed(path, "array requires 'items'"))?;
                    Ok(Node::Array(Box::new(self.parse(items, ns, &format!("{path}.items"))?)))
                }
                "map" => {
                    let values = obj
                        .get("values")
                        .ok_or_else(|| malformed(path, "map requires 'values'"))?;
                    Ok(Node::Map(Box::new(self.parse(values, ns, &format!("{path}.values"))?)))
                }
                other => self.parse_type_name(other, ns, &format!("{path}.type")),
            },
            Json::Object(_) | Json::Array(_) => self.parse(ty, ns, &format!("{path}.type")),
            other => Err(malformed(path, format!("'type' must be a string, object or array, found {other}"))),
        }
    }

    // ── Named types ──────────────────────────────────────────────────────────

    fn named_header(
        &self,
        obj:  &JsonObject,
        ns:   Option<&str>,
        path: &str,
    ) -> Result<(Name, Vec<Name>, Option<String>), SchemaError> {
        let raw = obj
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| malformed(path, "named type requires a string 'name'"))?;
        let namespace = match obj.get("namespace") {
            Some(Json::String(s)) => Some(s.as_str()),
            Some(Json::Null) | None => ns,
            Some(other) => return Err(malformed(path, format!("'namespace' must be a string, found {other}"))),
        };
        let name = Name::qualify(raw, namespace);
        if !valid_name(&name) {
            return Err(SchemaError::InvalidName { path: path.into(), name: raw.into() });
        }
        if name.namespace.is_none() && primitive(&name.name).is_some() {
            return Err(SchemaError::InvalidName { path: path.into(), name: raw.into() });
        }

        let mut aliases = Vec::new();
        for alias in string_list(obj, "aliases", path)? {
            let alias_name = Name::qualify(&alias, name.namespace.as_deref());
            if !valid_name(&alias_name) {
                return Err(SchemaError::InvalidName { path: format!("{path}.aliases"), name: alias });
            }
            aliases.push(alias_name);
        }
        let doc = obj.get("doc").and_then(Json::as_str).map(str::to_owned);
        Ok((name, aliases, doc))
    }

    fn register(&mut self, name: &Name, path: &str) -> Result<NamedId, SchemaError> {
        let fullname = name.fullname();
        if self.names.contains_key(&fullname) {
            return Err(SchemaError::DuplicateName { path: path.into(), name: fullname });
        }
        let id = NamedId(self.slots.len());
        self.slots.push(Slot { fullname: fullname.clone(), def: None });
        self.names.insert(fullname, id);
        Ok(id)
    }

    fn parse_record(&mut self, obj: &JsonObject, ns: Option<&str>, path: &str) -> Result<Node, SchemaError> {
        let (name, aliases, doc) = self.named_header(obj, ns, path)?;
        let id = self.register(&name, path)?;

        let fields_json = obj
            .get("fields")
            .and_then(Json::as_array)
            .ok_or_else(|| malformed(path, "record requires a 'fields' array"))?;

        let record_ns = name.namespace.clone();
        let mut fields = Vec::with_capacity(fields_json.len());
        let mut raw_defaults = Vec::new();
        let mut seen = HashSet::new();

        for (i, field_json) in fields_json.iter().enumerate() {
            let fpath = format!("{path}.fields[{i}]");
            let fobj = field_json
                .as_object()
                .ok_or_else(|| malformed(&fpath, "field must be an object"))?;
            let fname = fobj
                .get("name")
                .and_then(Json::as_str)
                .ok_or_else(|| malformed(&fpath, "field requires a string 'name'"))?;
            if !valid_simple_name(fname) {
                return Err(SchemaError::InvalidName { path: fpath, name: fname.into() });
            }
            if !seen.insert(fname) {
                return Err(malformed(&fpath, format!("duplicate field name '{fname}'")));
            }
            let ftype = fobj
                .get("type")
                .ok_or_else(|| malformed(&fpath, "field requires 'type'"))?;
            let schema = self.parse(ftype, record_ns.as_deref(), &format!("{fpath}.type"))?;

            if let Some(default) = fobj.get("default") {
                raw_defaults.push((i, fpath.clone(), default));
            }
            fields.push(Field {
                name:    fname.to_owned(),
                schema,
                default: None,
                aliases: string_list(fobj, "aliases", &fpath)?,
                doc:     fobj.get("doc").and_then(Json::as_str).map(str::to_owned),
            });
        }

        self.slots[id.0].def = Some(NamedType::Record(RecordSchema { name, aliases, doc, fields }));

        // Defaults are converted once the record is complete so they may
        // mention the record itself (e.g. a `null` default on a recursive link).
        let mut converted = Vec::with_capacity(raw_defaults.len());
        if let Some(NamedType::Record(record)) = &self.slots[id.0].def {
            for (i, fpath, json) in raw_defaults {
                let field = &record.fields[i];
                let value = self.default_value(&field.schema, json).map_err(|message| {
                    SchemaError::InvalidDefault { path: fpath, field: field.name.clone(), message }
                })?;
                converted.push((i, value));
            }
        }
        if let Some(NamedType::Record(record)) = &mut self.slots[id.0].def {
            for (i, value) in converted {
                record.fields[i].default = Some(value);
            }
        }
        Ok(Node::Named(id))
    }

    fn parse_enum(&mut self, obj: &JsonObject, ns: Option<&str>, path: &str) -> Result<Node, SchemaError> {
        let (name, aliases, doc) = self.named_header(obj, ns, path)?;
        let symbols_json = obj
            .get("symbols")
            .and_then(Json::as_array)
            .ok_or_else(|| malformed(path, "enum requires a 'symbols' array"))?;

        let mut symbols = Vec::with_capacity(symbols_json.len());
        for sym in symbols_json {
            let s = sym
                .as_str()
                .ok_or_else(|| malformed(path, "enum symbols must be strings"))?;
            if !valid_simple_name(s) {
                return Err(SchemaError::InvalidName { path: format!("{path}.symbols"), name: s.into() });
            }
            if symbols.iter().any(|existing| existing == s) {
                return Err(malformed(path, format!("duplicate enum symbol '{s}'")));
            }
            symbols.push(s.to_owned());
        }

        let default = match obj.get("default") {
            None | Some(Json::Null) => None,
            Some(Json::String(s)) if symbols.contains(s) => Some(s.clone()),
            Some(other) => {
                return Err(malformed(path, format!("enum default {other} is not one of the symbols")));
            }
        };

        let id = self.register(&name, path)?;
        self.slots[id.0].def = Some(NamedType::Enum(EnumSchema { name, aliases, doc, symbols, default }));
        Ok(Node::Named(id))
    }

    fn parse_fixed(&mut self, obj: &JsonObject, ns: Option<&str>, path: &str) -> Result<Node, SchemaError> {
        let (name, aliases, doc) = self.named_header(obj, ns, path)?;
        let size = obj
            .get("size")
            .and_then(Json::as_u64)
            .and_then(|s| usize::try_from(s).ok())
            .ok_or_else(|| malformed(path, "fixed requires a non-negative integer 'size'"))?;
        let id = self.register(&name, path)?;
        self.slots[id.0].def = Some(NamedType::Fixed(FixedSchema { name, aliases, doc, size }));
        Ok(Node::Named(id))
    }

    // ── Defaults ─────────────────────────────────────────────────────────────

    fn default_value(&self, node: &Node, json: &Json) -> Result<Value, String> {
        let mismatch = || format!("{json} does not match {}", self.branch_key(node));
        match node {
            Node::Null => json.is_null().then_some(Value::Null).ok_or_else(mismatch),
            Node::Boolean => json.as_bool().map(Value::Boolean).ok_or_else(mismatch),
            Node::Int => json
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Value::Int)
                .ok_or_else(mismatch),
            Node::Long => json.as_i64().map(Value::Long).ok_or_else(mismatch),
            Node::Float => json.as_f64().map(|f| Value::Float(f as f32)).ok_or_else(mismatch),
            Node::Double => json.as_f64().map(Value::Double).ok_or_else(mismatch),
            Node::Bytes => json.as_str().ok_or_else(mismatch).and_then(latin1).map(Value::Bytes),
            Node::String => json.as_str().map(|s| Value::String(s.to_owned())).ok_or_else(mismatch),
            Node::Array(items) => {
                let arr = json.as_array().ok_or_else(mismatch)?;
                arr.iter()
                    .map(|item| self.default_value(items, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            Node::Map(values) => {
                let obj = json.as_object().ok_or_else(mismatch)?;
                obj.iter()
                    .map(|(k, v)| Ok((k.clone(), self.default_value(values, v)?)))
                    .collect::<Result<HashMap<_, _>, String>>()
                    .map(Value::Map)
            }
            Node::Union(u) => {
                // The first branch is the declared home of a union default;
                // later branches are accepted when the first does not fit.
                u.branches
                    .iter()
                    .enumerate()
                    .find_map(|(i, b)| self.default_value(b, json).ok().map(|v| Value::union(i as u32, v)))
                    .ok_or_else(|| format!("{json} matches no branch of the union"))
            }
            Node::Named(id) => {
                let def = self.slots[id.0]
                    .def
                    .as_ref()
                    .ok_or_else(|| format!("type '{}' is not fully defined yet", self.slots[id.0].fullname))?;
                match def {
                    NamedType::Record(r) => {
                        let obj = json.as_object().ok_or_else(mismatch)?;
                        let mut fields = Vec::with_capacity(r.fields.len());
                        for f in &r.fields {
                            let v = match (obj.get(&f.name), &f.default) {
                                (Some(j), _) => self.default_value(&f.schema, j)?,
                                (None, Some(d)) => d.clone(),
                                (None, None) => return Err(format!("missing value for field '{}'", f.name)),
                            };
                            fields.push((f.name.clone(), v));
                        }
                        Ok(Value::Record(fields))
                    }
                    NamedType::Enum(e) => {
                        let s = json.as_str().ok_or_else(mismatch)?;
                        e.position(s)
                            .map(|i| Value::Enum(i as u32, s.to_owned()))
                            .ok_or_else(|| format!("'{s}' is not a symbol of {}", e.name))
                    }
                    NamedType::Fixed(f) => {
                        let bytes = json.as_str().ok_or_else(mismatch).and_then(latin1)?;
                        if bytes.len() != f.size {
                            return Err(format!("fixed {} needs {} bytes, default has {}", f.name, f.size, bytes.len()));
                        }
                        Ok(Value::Fixed(bytes))
                    }
                }
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn primitive(name: &str) -> Option<Node> {
    Some(match name {
        "null"    => Node::Null,
        "boolean" => Node::Boolean,
        "int"     => Node::Int,
        "long"    => Node::Long,
        "float"   => Node::Float,
        "double"  => Node::Double,
        "bytes"   => Node::Bytes,
        "string"  => Node::String,
        _ => return None,
    })
}

fn malformed(path: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::Malformed { path: path.into(), message: message.into() }
}

fn string_list(obj: &JsonObject, key: &str, path: &str) -> Result<Vec<String>, SchemaError> {
    match obj.get(key) {
        None | Some(Json::Null) => Ok(Vec::new()),
        Some(Json::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| malformed(path, format!("'{key}' must contain only strings")))
            })
            .collect(),
        Some(_) => Err(malformed(path, format!("'{key}' must be an array of strings"))),
    }
}

/// Bytes and fixed defaults are strings whose code points are byte values.
fn latin1(s: &str) -> Result<Vec<u8>, String> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| format!("character {c:?} is outside 0..=255")))
        .collect()
}

pub(super) fn valid_simple_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn valid_name(name: &Name) -> bool {
    valid_simple_name(&name.name)
        && name
            .namespace
            .as_deref()
            .map_or(true, |ns| ns.split('.').all(valid_simple_name))
}
