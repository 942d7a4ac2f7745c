use anyhow::Result;
use quick_xml::events::BytesStart;

use super::decoder::{ReadState, SchemaError};
use super::model::{resolve_link, FeedItem};
use super::xml::{self, Element};
use crate::util::{sanitize_markup, strip_control_chars};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// An Atom `<link>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomLink {
    pub href: String,
    pub rel: Option<String>,
}

impl AtomLink {
    /// Only an explicit `rel="alternate"` counts; rel-less links are not
    /// treated as navigable.
    pub fn is_alternate(&self) -> bool {
        self.rel.as_deref() == Some("alternate")
    }
}

fn alternate_href(links: &[AtomLink]) -> Option<&str> {
    links
        .iter()
        .find(|l| l.is_alternate() && !l.href.is_empty())
        .map(|l| l.href.as_str())
}

/// One `<entry>` of an Atom feed.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomEntry {
    pub(crate) origin: String,
    pub title: String,
    pub id: String,
    pub updated: String,
    pub links: Vec<AtomLink>,
    /// Raw summary markup
    pub summary: String,
    /// Raw content markup; preferred over `summary` when present
    pub content: String,
    pub(crate) read: bool,
}

impl FeedItem for AtomEntry {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> String {
        self.link()
    }

    fn content(&self) -> String {
        if self.content.trim().is_empty() {
            sanitize_markup(&self.summary)
        } else {
            sanitize_markup(&self.content)
        }
    }

    /// The `alternate` link, else the entry id.
    fn link(&self) -> String {
        match alternate_href(&self.links) {
            Some(href) => resolve_link(&self.origin, href),
            None => self.id.clone(),
        }
    }

    fn is_read(&self) -> bool {
        self.read
    }

    fn set_read(&mut self, read: bool) {
        self.read = read;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtomFeed {
    pub(crate) url: String,
    pub(crate) origin: String,
    pub title: String,
    pub id: String,
    pub updated: String,
    pub links: Vec<AtomLink>,
    pub entries: Vec<AtomEntry>,
    pub(crate) title_override: Option<String>,
}

/// Body of an Atom text construct. XHTML bodies come back as markup so the
/// sanitizer sees the same thing it would for `type="html"`.
fn text_construct(el: &Element) -> String {
    match el.attr("type") {
        Some("xhtml") => el.inner_markup(),
        _ => el.text(),
    }
}

fn title_of(el: Option<&Element>) -> String {
    let Some(el) = el else {
        return String::new();
    };
    match el.attr("type") {
        Some("html") | Some("xhtml") => sanitize_markup(&text_construct(el)),
        _ => strip_control_chars(el.text().trim()).into_owned(),
    }
}

fn child_text(el: &Element, ns: Option<&str>, name: &str) -> String {
    el.child(ns, name)
        .map(|c| c.text().trim().to_string())
        .unwrap_or_default()
}

fn links_of(el: &Element, ns: Option<&str>) -> Vec<AtomLink> {
    el.children_named(ns, "link")
        .map(|l| AtomLink {
            href: l.attr("href").unwrap_or_default().trim().to_string(),
            rel: l.attr("rel").map(str::to_string),
        })
        .collect()
}

fn write_links<W: std::io::Write>(
    writer: &mut quick_xml::Writer<W>,
    links: &[AtomLink],
) -> Result<()> {
    for link in links {
        let mut el = BytesStart::new("link");
        el.push_attribute(("href", link.href.as_str()));
        if let Some(rel) = &link.rel {
            el.push_attribute(("rel", rel.as_str()));
        }
        xml::empty(writer, el)?;
    }
    Ok(())
}

fn write_body<W: std::io::Write>(
    writer: &mut quick_xml::Writer<W>,
    name: &str,
    body: &str,
) -> Result<()> {
    if body.is_empty() {
        return Ok(());
    }
    let mut el = BytesStart::new(name);
    el.push_attribute(("type", "html"));
    xml::text_element(writer, el, body)
}

impl AtomFeed {
    /// Reads an Atom `<feed>` document element.
    ///
    /// Children only count when they share the root's namespace prefix, so
    /// both `<feed xmlns=...>` and `<atom:feed>` documents work while foreign
    /// elements like `<media:title>` are ignored.
    pub(crate) fn from_root(
        root: &Element,
        url: &str,
        origin: &str,
        read_state: ReadState,
    ) -> Result<Self, SchemaError> {
        let ns = root.prefix.as_deref();

        let entries = root
            .children_named(ns, "entry")
            .map(|entry| AtomEntry {
                origin: origin.to_string(),
                title: title_of(entry.child(ns, "title")),
                id: child_text(entry, ns, "id"),
                updated: child_text(entry, ns, "updated"),
                links: links_of(entry, ns),
                summary: entry
                    .child(ns, "summary")
                    .map(text_construct)
                    .unwrap_or_default(),
                content: entry
                    .child(ns, "content")
                    .map(text_construct)
                    .unwrap_or_default(),
                read: read_state == ReadState::Restore && child_text(entry, ns, "read") == "true",
            })
            .collect();

        let title_override = match read_state {
            ReadState::Restore => Some(child_text(root, ns, "displayName")).filter(|n| !n.is_empty()),
            ReadState::Ignore => None,
        };

        Ok(Self {
            url: url.to_string(),
            origin: origin.to_string(),
            title: title_of(root.child(ns, "title")),
            id: child_text(root, ns, "id"),
            updated: child_text(root, ns, "updated"),
            links: links_of(root, ns),
            entries,
            title_override,
        })
    }

    /// The feed's `alternate` link, else its id.
    pub fn link(&self) -> String {
        match alternate_href(&self.links) {
            Some(href) => resolve_link(&self.origin, href),
            None => self.id.clone(),
        }
    }

    /// Serializes the feed as Atom with the snapshot extension elements
    /// (`<read>` per entry, `<displayName>` on the feed).
    pub(crate) fn to_snapshot_xml(&self) -> Result<Vec<u8>> {
        let mut writer = xml::new_writer();
        xml::write_declaration(&mut writer)?;

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", ATOM_NS));
        xml::start(&mut writer, feed)?;

        xml::text_element(&mut writer, BytesStart::new("title"), &self.title)?;
        xml::text_element(&mut writer, BytesStart::new("id"), &self.id)?;
        xml::text_element(&mut writer, BytesStart::new("updated"), &self.updated)?;
        write_links(&mut writer, &self.links)?;
        if let Some(name) = &self.title_override {
            xml::text_element(&mut writer, BytesStart::new("displayName"), name)?;
        }

        for entry in &self.entries {
            xml::start(&mut writer, BytesStart::new("entry"))?;
            xml::text_element(&mut writer, BytesStart::new("title"), &entry.title)?;
            xml::text_element(&mut writer, BytesStart::new("id"), &entry.id)?;
            xml::text_element(&mut writer, BytesStart::new("updated"), &entry.updated)?;
            write_links(&mut writer, &entry.links)?;
            write_body(&mut writer, "summary", &entry.summary)?;
            write_body(&mut writer, "content", &entry.content)?;
            if entry.read {
                xml::text_element(&mut writer, BytesStart::new("read"), "true")?;
            }
            xml::end(&mut writer, "entry")?;
        }

        xml::end(&mut writer, "feed")?;
        Ok(writer.into_inner())
    }
}
