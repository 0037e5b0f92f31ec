//! Shared XML helpers for the manifest and config codecs.
//!
//! Reading goes through `roxmltree`; writing through `quick-xml` events.
//! Unknown tags are warned about but never fail a load; missing mandatory
//! tags or attributes are invalid-format errors.

use std::io::Write;

use log::warn;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use roxmltree::{Document, Node};

use crate::errors::{LauncherError, Result};

/// Parse an XML document and check its root tag name.
pub fn parse_document<'a>(text: &'a str, expected_root: &str) -> Result<Document<'a>> {
    let document = Document::parse(text)?;
    let root = document.root_element();
    if root.tag_name().name() != expected_root {
        return Err(LauncherError::invalid_format(format!(
            "missing root tag '{}', found '{}'",
            expected_root,
            root.tag_name().name()
        )));
    }
    Ok(document)
}

/// Element children of a node.
pub fn element_children<'a, 'input>(
    node: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|child| child.is_element())
}

/// First element child with the given tag name.
pub fn child_named<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    element_children(node).find(|child| child.tag_name().name() == name)
}

/// Character data of an element, empty when absent.
pub fn cdata<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().unwrap_or("")
}

/// Character data parsed as integer.
pub fn cdata_int(node: Node) -> Result<i64> {
    let text = cdata(node).trim();
    text.parse().map_err(|_| {
        LauncherError::invalid_format(format!(
            "tag '{}' carries no integer: '{}'",
            node.tag_name().name(),
            text
        ))
    })
}

/// Character data parsed as boolean (`true`/`yes`/`1`).
pub fn cdata_bool(node: Node) -> bool {
    matches!(cdata(node).trim(), "true" | "yes" | "1")
}

/// Required attribute of an element.
pub fn attribute<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        LauncherError::invalid_format(format!(
            "tag '{}' misses attribute '{}'",
            node.tag_name().name(),
            name
        ))
    })
}

/// Log an unknown tag. Loads keep going.
pub fn warn_unknown_tag(context: &str, node: Node) {
    warn!("{}: unknown tag '{}'", context, node.tag_name().name());
}

/// Write one event, mapping either writer error type.
pub fn emit<W: Write>(writer: &mut Writer<W>, event: Event) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| LauncherError::XmlWrite(e.into()))
}

/// Write the XML declaration.
pub fn emit_decl<W: Write>(writer: &mut Writer<W>) -> Result<()> {
    emit(writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
}

/// Write `<name>` with attributes.
pub fn emit_start<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attributes: &[(&str, &str)],
) -> Result<()> {
    let mut start = BytesStart::new(name);
    for (key, value) in attributes {
        start.push_attribute((*key, *value));
    }
    emit(writer, Event::Start(start))
}

/// Write `</name>`.
pub fn emit_end<W: Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    emit(writer, Event::End(BytesEnd::new(name)))
}

/// Write `<name attr..>text</name>`.
pub fn emit_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attributes: &[(&str, &str)],
    text: &str,
) -> Result<()> {
    emit_start(writer, name, attributes)?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit_end(writer, name)
}

/// Write `<name attr.. />`.
pub fn emit_empty_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attributes: &[(&str, &str)],
) -> Result<()> {
    let mut start = BytesStart::new(name);
    for (key, value) in attributes {
        start.push_attribute((*key, *value));
    }
    emit(writer, Event::Empty(start))
}

/// Build an indented XML document in memory.
pub fn build_document<F>(fill: F) -> Result<String>
where
    F: FnOnce(&mut Writer<Vec<u8>>) -> Result<()>,
{
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit_decl(&mut writer)?;
    fill(&mut writer)?;
    let buffer = writer.into_inner();
    String::from_utf8(buffer)
        .map_err(|_| LauncherError::invalid_format("generated XML is not valid UTF-8"))
}
