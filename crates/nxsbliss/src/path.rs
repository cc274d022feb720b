//! Textual node addresses such as `/scan1:NXentry/instrument:NXinstrument/x@units`.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One path component, optionally tagged with a node class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub class: Option<String>,
}

impl Segment {
    pub fn new(name: impl Into<String>, class: Option<&str>) -> Self {
        Self {
            name: name.into(),
            class: class.map(str::to_string),
        }
    }
}

/// What a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A field (dataset) at the last segment.
    Field,
    /// An attribute on the field at the last segment, or on the group of
    /// that name when no field exists.
    FieldAttribute,
    /// An attribute on the group at the last segment (or the root).
    GroupAttribute,
}

/// Parsed hierarchical address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    pub segments: Vec<Segment>,
    pub attribute: Option<String>,
}

impl NodePath {
    pub fn parse(text: &str) -> Result<NodePath> {
        let malformed = |reason| Error::MalformedPath {
            path: text.to_string(),
            reason,
        };

        let (nodes, attribute) = match text.split_once('@') {
            Some((_, attr)) if attr.contains('@') => {
                return Err(malformed("more than one attribute marker"))
            }
            Some((_, "")) => return Err(malformed("empty attribute name")),
            Some((nodes, attr)) => (nodes, Some(attr.to_string())),
            None => (text, None),
        };

        let mut segments = Vec::new();
        for part in nodes.split('/').filter(|p| !p.is_empty()) {
            let (name, class) = match part.split_once(':') {
                Some((name, class)) => (name, Some(class).filter(|c| !c.is_empty())),
                None => (part, None),
            };
            if name.is_empty() {
                return Err(malformed("segment without a name"));
            }
            segments.push(Segment::new(name, class));
        }
        Ok(NodePath {
            segments,
            attribute,
        })
    }

    pub fn target(&self) -> Target {
        match (&self.attribute, self.segments.last()) {
            (None, _) => Target::Field,
            (Some(_), Some(last)) if last.class.is_none() => Target::FieldAttribute,
            (Some(_), _) => Target::GroupAttribute,
        }
    }

    /// All segments but the last.
    pub fn parents(&self) -> &[Segment] {
        match self.segments.split_last() {
            Some((_, parents)) => parents,
            None => &[],
        }
    }

    pub fn leaf(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Slash-joined names without class tags, as stored in the file.
    pub fn storage_path(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            out.push('/');
            out.push_str(&seg.name);
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }
}

impl FromStr for NodePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NodePath::parse(s)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            f.write_str("/")?;
        }
        for seg in &self.segments {
            write!(f, "/{}", seg.name)?;
            if let Some(class) = &seg.class {
                write!(f, ":{class}")?;
            }
        }
        if let Some(attr) = &self.attribute {
            write!(f, "@{attr}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_path_with_classes() {
        let p = NodePath::parse("/scan1:NXentry/instrument:NXinstrument/mot01").unwrap();
        assert_eq!(p.segments.len(), 3);
        assert_eq!(p.segments[0], Segment::new("scan1", Some("NXentry")));
        assert_eq!(p.leaf().unwrap().class, None);
        assert_eq!(p.target(), Target::Field);
        assert_eq!(p.storage_path(), "/scan1/instrument/mot01");
    }

    #[test]
    fn attribute_targets() {
        let field = NodePath::parse("/entry:NXentry/data/x@units").unwrap();
        assert_eq!(field.target(), Target::FieldAttribute);
        assert_eq!(field.attribute.as_deref(), Some("units"));

        let group = NodePath::parse("/entry:NXentry/sample:NXsample@default").unwrap();
        assert_eq!(group.target(), Target::GroupAttribute);

        let root = NodePath::parse("@title").unwrap();
        assert!(root.segments.is_empty());
        assert_eq!(root.target(), Target::GroupAttribute);
    }

    #[test]
    fn empty_segments_are_ignored() {
        let p = NodePath::parse("//a:NXentry///b/").unwrap();
        assert_eq!(p.segments.len(), 2);
        assert_eq!(p.to_string(), "/a:NXentry/b");
    }

    #[test]
    fn two_attribute_markers_are_rejected() {
        let err = NodePath::parse("/a/b@c@d").unwrap_err();
        assert!(matches!(err, Error::MalformedPath { .. }));
    }

    #[test]
    fn nameless_segment_is_rejected() {
        assert!(NodePath::parse("/:NXentry/x").is_err());
        assert!(NodePath::parse("/a/x@").is_err());
    }

    #[test]
    fn parents_exclude_leaf() {
        let p = NodePath::parse("/a:NXentry/b:NXdata/c").unwrap();
        let names: Vec<&str> = p.parents().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
