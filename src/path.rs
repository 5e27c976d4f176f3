//! Locations inside a value or schema, used to point errors at the
//! offending field.
//!
//! Paths are built while an error unwinds: the innermost frame creates an
//! empty path and every enclosing frame prepends its own segment with
//! [`FieldPath::within`].  Nothing is allocated on the success path.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
    Key(String),
    Branch(usize),
    Items,
    Values,
}

/// A path such as `$.order.lines[3].sku`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath {
    // Innermost segment first; reversed on display.
    rev: Vec<Segment>,
}

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Prepend `segment` (the caller is the enclosing frame).
    pub fn within(mut self, segment: Segment) -> Self {
        self.rev.push(segment);
        self
    }

    pub fn is_root(&self) -> bool {
        self.rev.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.rev.iter().rev()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for seg in self.segments() {
            match seg {
                Segment::Field(name) => write!(f, ".{name}")?,
                Segment::Index(i)    => write!(f, "[{i}]")?,
                Segment::Key(k)      => write!(f, "[{k:?}]")?,
                Segment::Branch(b)   => write!(f, "<{b}>")?,
                Segment::Items       => f.write_str("[*]")?,
                Segment::Values      => f.write_str("{*}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_outermost_first() {
        let p = FieldPath::root()
            .within(Segment::Field("sku".into()))
            .within(Segment::Index(3))
            .within(Segment::Field("lines".into()));
        assert_eq!(p.to_string(), "$.lines[3].sku");
    }

    #[test]
    fn root_is_dollar() {
        assert_eq!(FieldPath::root().to_string(), "$");
        assert!(FieldPath::root().is_root());
    }
}
