//! Seeding a file's initial structure from an embedded NeXus XML definition.
//!
//! The definition arrives as the first value of the
//! [`SCHEMA_GROUP`](crate::snapshot::SCHEMA_GROUP) snapshot group. Groups,
//! fields with static values and `<attribute>` elements are instantiated;
//! fields that depend on runtime dimensions are left to the snapshot and
//! channel writers.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::attrs;
use crate::error::{Error, Result};
use crate::kind::ValueKind;
use crate::path::Segment;
use crate::store::{Layout, MemStore, NodeId, NodeKind, Store};
use crate::tree::{self, NX_CLASS};
use crate::value::{Scalar, Value};

/// A parsed XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn has_child(&self, tag: &str) -> bool {
        self.children.iter().any(|c| c.tag == tag)
    }
}

/// Counts of objects written while seeding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub groups: usize,
    pub fields: usize,
    pub attributes: usize,
}

/// Textual fixes applied before parsing: date-time fields become plain
/// text and dimension indices become zero-based.
pub fn sanitize(xml: &str) -> String {
    xml.replace("\"NX_DATE_TIME\"", "\"NX_CHAR\"")
        .replace("index=\"1\"", "index=\"0\"")
        .replace("index=\"2\"", "index=\"1\"")
        .replace("index=\"3\"", "index=\"2\"")
}

/// Parse `xml` into its root element.
pub fn parse(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;
    loop {
        match reader.read_event()? {
            Event::Start(ref e) => stack.push(element(e)?),
            Event::Empty(ref e) => {
                let el = element(e)?;
                attach(&mut stack, &mut root, el);
            }
            Event::Text(ref e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| Error::Schema("unbalanced closing tag".into()))?;
                attach(&mut stack, &mut root, el);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(Error::Schema("unterminated element".into()));
    }
    root.ok_or_else(|| Error::Schema("empty document".into()))
}

fn element(e: &BytesStart<'_>) -> Result<Element> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        attrs.push((key, attr.unescape_value()?.into_owned()));
    }
    Ok(Element {
        tag: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
        attrs,
        ..Element::default()
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

/// Remove every `field`/`vds` element with a `dimensions` child.
pub fn strip_dimensioned(el: &mut Element) {
    el.children
        .retain(|c| !(matches!(c.tag.as_str(), "field" | "vds") && c.has_child("dimensions")));
    for child in &mut el.children {
        strip_dimensioned(child);
    }
}

/// Sanitize, parse and instantiate `xml` below the store root.
/// Existing groups are reused; existing fields are left alone.
///
/// The definition is first built in a scratch tree and checked against
/// the store, so an error leaves the store untouched.
pub fn seed<S: Store + ?Sized>(store: &mut S, xml: &str) -> Result<SeedReport> {
    let mut root = parse(&sanitize(xml))?;
    strip_dimensioned(&mut root);

    let mut scratch = MemStore::new();
    let mut staged = SeedReport::default();
    let top = scratch.root();
    if root.tag == "definition" {
        for child in &root.children {
            seed_node(&mut scratch, top, child, &mut staged)?;
        }
    } else {
        seed_node(&mut scratch, top, &root, &mut staged)?;
    }

    check_graft(&scratch, scratch.root(), store, store.root())?;
    let mut report = SeedReport::default();
    let target = store.root();
    graft(&scratch, scratch.root(), store, target, &mut report)?;
    debug!(
        groups = report.groups,
        fields = report.fields,
        attributes = report.attributes,
        "schema seeded"
    );
    Ok(report)
}

/// Refuse a graft that would need a group where the store has a field.
fn check_graft<S: Store + ?Sized>(
    scratch: &MemStore,
    from: NodeId,
    store: &S,
    to: NodeId,
) -> Result<()> {
    for (name, child) in scratch.children(from)? {
        if scratch.node_kind(*child)? != NodeKind::Group {
            continue;
        }
        match store.child(to, name) {
            Ok(node) if store.node_kind(node)? == NodeKind::Group => {
                check_graft(scratch, *child, store, node)?;
            }
            Ok(_) => return Err(Error::Schema(format!("{name} is not a group"))),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Copy the members and attributes of scratch group `from` into `to`.
fn graft<S: Store + ?Sized>(
    scratch: &MemStore,
    from: NodeId,
    store: &mut S,
    to: NodeId,
    report: &mut SeedReport,
) -> Result<()> {
    copy_attrs(scratch, from, store, to, report)?;
    for (name, child) in scratch.children(from)? {
        let existing = match store.child(to, name) {
            Ok(node) => Some(node),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        if scratch.node_kind(*child)? == NodeKind::Group {
            let node = match existing {
                Some(node) => node,
                None => {
                    report.groups += 1;
                    let class = scratch.read_attr(*child, NX_CLASS).ok().map(|v| v.to_string());
                    tree::create_group(store, to, &Segment::new(name.as_str(), class.as_deref()))?
                }
            };
            graft(scratch, *child, store, node, report)?;
            continue;
        }
        let node = match existing {
            Some(node) => node,
            None => {
                let info = scratch.field_info(*child)?;
                let layout = Layout {
                    shape: info.shape.clone(),
                    chunk: info.chunk,
                };
                let node = store.create_field(to, name, info.element, &layout)?;
                if info.shape.iter().product::<usize>() > 0 {
                    store.write_field(node, &scratch.read_field(*child)?)?;
                }
                report.fields += 1;
                node
            }
        };
        copy_attrs(scratch, *child, store, node, report)?;
    }
    Ok(())
}

/// The class tag is only set when a group is created, never on reuse.
fn copy_attrs<S: Store + ?Sized>(
    scratch: &MemStore,
    from: NodeId,
    store: &mut S,
    to: NodeId,
    report: &mut SeedReport,
) -> Result<()> {
    for name in scratch.attr_names(from)? {
        if name == NX_CLASS {
            continue;
        }
        let element = scratch.attr_info(from, name)?.element;
        let value = scratch.read_attr(from, name)?;
        if attrs::merge(store, to, name, ValueKind::from(element), &value)?.wrote() {
            report.attributes += 1;
        }
    }
    Ok(())
}

fn seed_node<S: Store + ?Sized>(
    store: &mut S,
    parent: NodeId,
    el: &Element,
    report: &mut SeedReport,
) -> Result<()> {
    match el.tag.as_str() {
        "group" => seed_group(store, parent, el, report),
        "field" => seed_field(store, parent, el, report),
        "attribute" => seed_attribute(store, parent, el, report),
        "doc" | "strategy" | "dimensions" | "link" | "vds" => Ok(()),
        other => {
            debug!(tag = other, "ignoring schema element");
            Ok(())
        }
    }
}

fn seed_group<S: Store + ?Sized>(
    store: &mut S,
    parent: NodeId,
    el: &Element,
    report: &mut SeedReport,
) -> Result<()> {
    let class = el.attr("type");
    let name = match (el.attr("name"), class) {
        (Some(name), _) => name.to_string(),
        (None, Some(class)) => class.strip_prefix("NX").unwrap_or(class).to_string(),
        (None, None) => return Err(Error::Schema("group without name or type".into())),
    };

    let node = match store.child(parent, &name) {
        Ok(node) if store.node_kind(node)? == NodeKind::Group => node,
        Ok(_) => return Err(Error::Schema(format!("{name} is not a group"))),
        Err(e) if e.is_not_found() => {
            report.groups += 1;
            tree::create_group(store, parent, &Segment::new(name, class))?
        }
        Err(e) => return Err(e.into()),
    };
    write_extra_attrs(store, node, el, report)?;
    for child in &el.children {
        seed_node(store, node, child, report)?;
    }
    Ok(())
}

fn seed_field<S: Store + ?Sized>(
    store: &mut S,
    parent: NodeId,
    el: &Element,
    report: &mut SeedReport,
) -> Result<()> {
    let name = el
        .attr("name")
        .ok_or_else(|| Error::Schema("field without name".into()))?;
    let kind: ValueKind = el.attr("type").unwrap_or("NX_CHAR").parse()?;

    let node = match store.child(parent, name) {
        Ok(node) => node,
        Err(e) if e.is_not_found() => {
            let node = match parse_text(kind, &el.text)? {
                Some(value) => {
                    let node = store.create_field(
                        parent,
                        name,
                        kind.element_type(),
                        &kind.snapshot_layout(&value),
                    )?;
                    store.write_field(node, &value)?;
                    node
                }
                None if kind == ValueKind::Text => {
                    let node = store.create_field(parent, name, kind.element_type(), &Layout::scalar())?;
                    store.write_field(node, &Value::from(""))?;
                    node
                }
                None => store.create_field(parent, name, kind.element_type(), &kind.default_layout(&[]))?,
            };
            report.fields += 1;
            node
        }
        Err(e) => return Err(e.into()),
    };

    write_extra_attrs(store, node, el, report)?;
    for child in el.children.iter().filter(|c| c.tag == "attribute") {
        seed_attribute(store, node, child, report)?;
    }
    Ok(())
}

fn seed_attribute<S: Store + ?Sized>(
    store: &mut S,
    holder: NodeId,
    el: &Element,
    report: &mut SeedReport,
) -> Result<()> {
    let name = el
        .attr("name")
        .ok_or_else(|| Error::Schema("attribute without name".into()))?;
    let kind: ValueKind = el.attr("type").unwrap_or("NX_CHAR").parse()?;
    let value = match parse_text(kind, &el.text)? {
        Some(value) => value,
        None if kind == ValueKind::Text => Value::from(""),
        None => return Ok(()),
    };
    if attrs::merge(store, holder, name, kind, &value)?.wrote() {
        report.attributes += 1;
    }
    Ok(())
}

/// XML attributes other than `name`/`type` become text attributes.
fn write_extra_attrs<S: Store + ?Sized>(
    store: &mut S,
    node: NodeId,
    el: &Element,
    report: &mut SeedReport,
) -> Result<()> {
    for (key, value) in &el.attrs {
        if key == "name" || key == "type" {
            continue;
        }
        if attrs::merge(store, node, key, ValueKind::Text, &Value::from(value.as_str()))?.wrote() {
            report.attributes += 1;
        }
    }
    Ok(())
}

/// Static element text as a value: verbatim for text kinds, otherwise
/// whitespace-separated numbers (several make a 1-d array).
fn parse_text(kind: ValueKind, text: &str) -> Result<Option<Value>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if kind == ValueKind::Text {
        return Ok(Some(Value::from(text)));
    }
    let items = text
        .split_whitespace()
        .map(|token| match token {
            "true" | "True" => Ok(Scalar::Bool(true)),
            "false" | "False" => Ok(Scalar::Bool(false)),
            _ => serde_json::from_str(token)
                .map_err(|_| Error::Value(format!("{token:?} is not a number")))
                .and_then(|json| Scalar::from_json(&json)),
        })
        .collect::<Result<Vec<_>>>()?;
    if items.len() == 1 {
        Ok(items.into_iter().next().map(Value::Scalar))
    } else {
        Value::array(vec![items.len()], items).map(Some)
    }
}
