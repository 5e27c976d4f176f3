//! Schema model: a tree of [`Node`]s whose named types (records, enums,
//! fixed) live in an arena owned by the [`Schema`].
//!
//! # Recursion
//! A record may refer to itself, directly or through other named types.
//! Nodes never own named definitions; they hold a [`NamedId`] index into the
//! arena, so cycles are plain indices rather than ownership loops.  Names are
//! registered in a full-name table while parsing, before a record's fields
//! are parsed, which is what makes forward and self references resolvable.
//!
//! # Identity
//! Every parsed schema carries its Parsing Canonical Form and the 64-bit
//! Rabin fingerprint of that text.  Two schemas with the same fingerprint
//! are interchangeable as writer schemas.  Reader schemas are additionally
//! identified by [`Schema::resolution_fingerprint`], which also covers
//! defaults and aliases because those change how data is resolved.

mod canonical;
mod parser;

pub use canonical::Fingerprint;

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::types::Value;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("malformed schema at {path}: {message}")]
    Malformed { path: String, message: String },
    #[error("invalid name '{name}' at {path}")]
    InvalidName { path: String, name: String },
    #[error("duplicate definition of type '{name}' at {path}")]
    DuplicateName { path: String, name: String },
    #[error("unknown type '{name}' referenced at {path}")]
    UnknownName { path: String, name: String },
    #[error("union at {path} directly contains another union")]
    NestedUnion { path: String },
    #[error("union at {path} contains more than one branch of kind {kind}")]
    DuplicateBranch { path: String, kind: String },
    #[error("invalid default for field '{field}' at {path}: {message}")]
    InvalidDefault { path: String, field: String, message: String },
    #[error("schema text is not valid JSON: {0}")]
    Json(String),
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        SchemaError::Json(e.to_string())
    }
}

// ── Names ────────────────────────────────────────────────────────────────────

/// A possibly namespaced type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub name:      String,
    pub namespace: Option<String>,
}

impl Name {
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self { name: name.into(), namespace: namespace.filter(|ns| !ns.is_empty()) }
    }

    /// Split a dotted full name; a bare name takes `enclosing` as its namespace.
    pub fn qualify(raw: &str, enclosing: Option<&str>) -> Self {
        match raw.rsplit_once('.') {
            Some((ns, name)) => Name::new(name, Some(ns.to_owned())),
            None => Name::new(raw, enclosing.map(str::to_owned)),
        }
    }

    pub fn fullname(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

// ── Nodes ────────────────────────────────────────────────────────────────────

/// Index of a named type inside its [`Schema`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamedId(pub(crate) usize);

impl NamedId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Array(Box<Node>),
    Map(Box<Node>),
    Union(UnionSchema),
    Named(NamedId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionSchema {
    branches: Vec<Node>,
}

impl UnionSchema {
    pub fn branches(&self) -> &[Node] {
        &self.branches
    }
}

/// Shape of a node, used for union distinctness and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Array,
    Map,
    Union,
    Record,
    Enum,
    Fixed,
}

impl Kind {
    pub fn is_named(self) -> bool {
        matches!(self, Kind::Record | Kind::Enum | Kind::Fixed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Null    => "null",
            Kind::Boolean => "boolean",
            Kind::Int     => "int",
            Kind::Long    => "long",
            Kind::Float   => "float",
            Kind::Double  => "double",
            Kind::Bytes   => "bytes",
            Kind::String  => "string",
            Kind::Array   => "array",
            Kind::Map     => "map",
            Kind::Union   => "union",
            Kind::Record  => "record",
            Kind::Enum    => "enum",
            Kind::Fixed   => "fixed",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Named types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name:    String,
    pub schema:  Node,
    pub default: Option<Value>,
    pub aliases: Vec<String>,
    pub doc:     Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name:    Name,
    pub aliases: Vec<Name>,
    pub doc:     Option<String>,
    pub fields:  Vec<Field>,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name:    Name,
    pub aliases: Vec<Name>,
    pub doc:     Option<String>,
    pub symbols: Vec<String>,
    pub default: Option<String>,
}

impl EnumSchema {
    pub fn position(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixedSchema {
    pub name:    Name,
    pub aliases: Vec<Name>,
    pub doc:     Option<String>,
    pub size:    usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NamedType {
    Record(RecordSchema),
    Enum(EnumSchema),
    Fixed(FixedSchema),
}

impl NamedType {
    pub fn name(&self) -> &Name {
        match self {
            NamedType::Record(r) => &r.name,
            NamedType::Enum(e)   => &e.name,
            NamedType::Fixed(f)  => &f.name,
        }
    }

    pub fn aliases(&self) -> &[Name] {
        match self {
            NamedType::Record(r) => &r.aliases,
            NamedType::Enum(e)   => &e.aliases,
            NamedType::Fixed(f)  => &f.aliases,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            NamedType::Record(_) => Kind::Record,
            NamedType::Enum(_)   => Kind::Enum,
            NamedType::Fixed(_)  => Kind::Fixed,
        }
    }
}

// ── Schema ───────────────────────────────────────────────────────────────────

/// A parsed, validated schema document.
#[derive(Debug, Clone)]
pub struct Schema {
    root:        Node,
    named:       Vec<NamedType>,
    names:       HashMap<String, NamedId>,
    canonical:   String,
    fingerprint: Fingerprint,
    resolution:  Fingerprint,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.resolution == other.resolution && self.canonical == other.canonical
    }
}

impl Schema {
    /// Parse a schema from JSON text.
    pub fn parse_str(text: &str) -> Result<Schema, SchemaError> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        Self::parse_json(&json)
    }

    /// Parse a schema from an already-decoded JSON document.
    pub fn parse_json(json: &serde_json::Value) -> Result<Schema, SchemaError> {
        let (root, named, names) = parser::Parser::default().parse_document(json)?;
        Ok(Self::assemble(root, named, names))
    }

    fn assemble(root: Node, named: Vec<NamedType>, names: HashMap<String, NamedId>) -> Schema {
        let mut schema = Schema {
            root,
            named,
            names,
            canonical:   String::new(),
            fingerprint: Fingerprint::default(),
            resolution:  Fingerprint::default(),
        };
        schema.canonical   = canonical::canonical_form(&schema);
        schema.fingerprint = Fingerprint::rabin(schema.canonical.as_bytes());
        schema.resolution  = Fingerprint::rabin(canonical::full_form(&schema).to_string().as_bytes());
        schema
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn named(&self, id: NamedId) -> &NamedType {
        &self.named[id.0]
    }

    pub fn named_types(&self) -> impl Iterator<Item = (NamedId, &NamedType)> {
        self.named.iter().enumerate().map(|(i, t)| (NamedId(i), t))
    }

    /// Find a named type by its full name.
    pub fn lookup(&self, fullname: &str) -> Option<NamedId> {
        self.names.get(fullname).copied()
    }

    pub fn kind(&self, node: &Node) -> Kind {
        match node {
            Node::Null      => Kind::Null,
            Node::Boolean   => Kind::Boolean,
            Node::Int       => Kind::Int,
            Node::Long      => Kind::Long,
            Node::Float     => Kind::Float,
            Node::Double    => Kind::Double,
            Node::Bytes     => Kind::Bytes,
            Node::String    => Kind::String,
            Node::Array(_)  => Kind::Array,
            Node::Map(_)    => Kind::Map,
            Node::Union(_)  => Kind::Union,
            Node::Named(id) => self.named(*id).kind(),
        }
    }

    /// Human-readable label for a node: its kind, or its full name if named.
    pub fn describe(&self, node: &Node) -> String {
        match node {
            Node::Named(id) => format!("{} {}", self.named(*id).kind(), self.named(*id).name()),
            Node::Array(items) => format!("array<{}>", self.describe(items)),
            Node::Map(values)  => format!("map<{}>", self.describe(values)),
            Node::Union(u) => {
                let parts: Vec<String> = u.branches.iter().map(|b| self.describe(b)).collect();
                format!("[{}]", parts.join(", "))
            }
            other => self.kind(other).to_string(),
        }
    }

    /// True when every value of `node` encodes to zero bytes.
    pub fn encodes_empty(&self, node: &Node) -> bool {
        let mut visiting = Vec::new();
        self.encodes_empty_inner(node, &mut visiting)
    }

    fn encodes_empty_inner(&self, node: &Node, visiting: &mut Vec<NamedId>) -> bool {
        match node {
            Node::Null => true,
            Node::Named(id) => {
                if visiting.contains(id) {
                    return false;
                }
                match self.named(*id) {
                    NamedType::Fixed(f) => f.size == 0,
                    NamedType::Enum(_) => false,
                    NamedType::Record(r) => {
                        visiting.push(*id);
                        let empty = r.fields.iter().all(|f| self.encodes_empty_inner(&f.schema, visiting));
                        visiting.pop();
                        empty
                    }
                }
            }
            _ => false,
        }
    }

    /// Parsing Canonical Form of this schema.
    pub fn canonical_form(&self) -> &str {
        &self.canonical
    }

    /// CRC-64-AVRO fingerprint of the canonical form.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// SHA-256 of the canonical form.
    pub fn sha256_fingerprint(&self) -> [u8; 32] {
        Fingerprint::sha256(self.canonical.as_bytes())
    }

    /// Fingerprint of the full form, which also covers defaults and aliases.
    pub fn resolution_fingerprint(&self) -> Fingerprint {
        self.resolution
    }

    /// Full JSON form including namespaces, docs, aliases and defaults.
    pub fn to_json(&self) -> serde_json::Value {
        canonical::full_form(self)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}

impl std::str::FromStr for Schema {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schema::parse_str(s)
    }
}
