//! Small element tree built from `quick-xml` events, plus the writer helpers
//! used to serialize snapshots.
//!
//! Both feed schemas are read from this tree rather than straight from the
//! event stream. Building the tree once validates nesting for the whole
//! document, and Atom `type="xhtml"` bodies can be turned back into markup.

use std::io::Write;

use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};

use crate::util::decode_entities;

/// SEC-003: Maximum element nesting depth accepted in a feed document.
const MAX_DEPTH: usize = 256;

/// Failure to build a tree from a document.
///
/// `root` is the local name of the document element when parsing got far
/// enough to see it; callers use it to tell "wrong schema" apart from
/// "right schema, broken content".
#[derive(Debug)]
pub(crate) struct TreeError {
    pub root: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Element {
    pub prefix: Option<String>,
    pub local: String,
    /// Attributes keyed by their qualified name
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Self {
        let name = start.name();
        let attrs = start
            .attributes()
            .filter_map(|attr| match attr {
                Ok(attr) => Some(attr),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed XML attribute");
                    None
                }
            })
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let raw = String::from_utf8_lossy(&attr.value);
                (key, decode_entities(&raw).into_owned())
            })
            .collect();

        Self {
            prefix: name
                .prefix()
                .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned()),
            local: local_name(name),
            attrs,
            children: Vec::new(),
        }
    }

    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local),
            None => self.local.clone(),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements with the given local name and namespace prefix.
    pub fn children_named<'a>(
        &'a self,
        prefix: Option<&'a str>,
        local: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter_map(move |node| match node {
            Node::Element(el) if el.local == local && el.prefix.as_deref() == prefix => Some(el),
            _ => None,
        })
    }

    pub fn child<'a>(&'a self, prefix: Option<&str>, local: &str) -> Option<&'a Element> {
        self.children.iter().find_map(|node| match node {
            Node::Element(el) if el.local == local && el.prefix.as_deref() == prefix => Some(el),
            _ => None,
        })
    }

    /// Concatenated text of this element and all its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(el) => el.collect_text(out),
            }
        }
    }

    /// Children serialized back to markup, for inline XHTML content.
    pub fn inner_markup(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            write_markup(node, &mut out);
        }
        out
    }
}

fn write_markup(node: &Node, out: &mut String) {
    match node {
        Node::Text(t) => out.push_str(&quick_xml::escape::escape(t.as_str())),
        Node::Element(el) => {
            let name = el.qualified_name();
            out.push('<');
            out.push_str(&name);
            for (k, v) in &el.attrs {
                out.push_str(&format!(" {}=\"{}\"", k, quick_xml::escape::escape(v.as_str())));
            }
            if el.children.is_empty() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in &el.children {
                write_markup(child, out);
            }
            out.push_str(&format!("</{}>", name));
        }
    }
}

fn local_name(name: QName<'_>) -> String {
    String::from_utf8_lossy(name.local_name().as_ref()).into_owned()
}

fn push_text(stack: &mut [Element], text: String) {
    let Some(parent) = stack.last_mut() else {
        // Whitespace and stray text outside the document element
        return;
    };
    if let Some(Node::Text(prev)) = parent.children.last_mut() {
        prev.push_str(&text);
    } else {
        parent.children.push(Node::Text(text));
    }
}

/// Parses a whole document into its root element.
///
/// Text keeps its whitespace; feed bodies rely on the spaces between inline
/// tags. Entity references are decoded leniently, so the HTML entities that
/// many feeds use without declaring them survive instead of failing the
/// document.
pub(crate) fn parse_document(text: &str) -> Result<Element, TreeError> {
    // SEC-002: quick-xml never expands <!ENTITY> declarations from a DOCTYPE;
    // text is decoded by `decode_entities`, which only knows the fixed HTML5 table.
    let mut reader = Reader::from_str(text);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut root_name: Option<String> = None;

    let fail = |root_name: &Option<String>, message: String| TreeError {
        root: root_name.clone(),
        message,
    };

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(fail(
                    &root_name,
                    format!("{} at byte {}", e, reader.buffer_position()),
                ))
            }
        };

        match event {
            Event::Start(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err(fail(&root_name, "multiple root elements".to_string()));
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(fail(
                        &root_name,
                        format!("nesting depth exceeds maximum of {} levels", MAX_DEPTH),
                    ));
                }
                let el = Element::from_start(&start);
                if stack.is_empty() {
                    root_name = Some(el.local.clone());
                }
                stack.push(el);
            }
            Event::Empty(start) => {
                let el = Element::from_start(&start);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(el)),
                    None if root.is_none() => {
                        root_name = Some(el.local.clone());
                        root = Some(el);
                    }
                    None => return Err(fail(&root_name, "multiple root elements".to_string())),
                }
            }
            Event::End(_) => {
                let Some(el) = stack.pop() else {
                    return Err(fail(&root_name, "unexpected closing tag".to_string()));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(el)),
                    None => root = Some(el),
                }
            }
            Event::Text(t) => {
                let raw = String::from_utf8_lossy(&t);
                push_text(&mut stack, decode_entities(&raw).into_owned());
            }
            Event::CData(c) => {
                push_text(&mut stack, String::from_utf8_lossy(&c).into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(fail(
            &root_name,
            format!("unexpected end of document inside <{}>", open.qualified_name()),
        ));
    }

    root.ok_or_else(|| fail(&None, "document has no root element".to_string()))
}

// ============================================================================
// Writing
// ============================================================================

pub(crate) fn new_writer() -> Writer<Vec<u8>> {
    Writer::new_with_indent(Vec::new(), b' ', 2)
}

pub(crate) fn write_declaration<W: Write>(writer: &mut Writer<W>) -> Result<()> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    Ok(())
}

pub(crate) fn start<W: Write>(writer: &mut Writer<W>, element: BytesStart<'_>) -> Result<()> {
    writer.write_event(Event::Start(element))?;
    Ok(())
}

pub(crate) fn end<W: Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

pub(crate) fn empty<W: Write>(writer: &mut Writer<W>, element: BytesStart<'_>) -> Result<()> {
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

/// Writes `<name>value</name>`, escaping the value.
pub(crate) fn text_element<W: Write>(
    writer: &mut Writer<W>,
    element: BytesStart<'_>,
    value: &str,
) -> Result<()> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    writer.write_event(Event::Start(element))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
