use anyhow::Result;
use quick_xml::events::BytesStart;

use super::decoder::{ReadState, SchemaError};
use super::model::{resolve_link, FeedItem};
use super::xml::{self, Element};
use crate::util::{sanitize_markup, strip_control_chars};

/// One `<item>` of an RSS channel.
///
/// `description` and `link` hold the document's raw values; sanitizing and
/// link resolution happen in the [`FeedItem`] accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct RssItem {
    pub(crate) origin: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub guid: Option<String>,
    pub(crate) read: bool,
}

impl FeedItem for RssItem {
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
        sanitize_markup(&self.description)
    }

    fn link(&self) -> String {
        resolve_link(&self.origin, &self.link)
    }

    fn is_read(&self) -> bool {
        self.read
    }

    fn set_read(&mut self, read: bool) {
        self.read = read;
    }
}

/// An RSS 2.0 document: channel metadata plus its items in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct RssFeed {
    pub(crate) url: String,
    pub(crate) origin: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub items: Vec<RssItem>,
    pub(crate) title_override: Option<String>,
}

fn child_text(el: &Element, ns: Option<&str>, name: &str) -> String {
    el.child(ns, name)
        .map(|c| c.text().trim().to_string())
        .unwrap_or_default()
}

fn clean_title(raw: String) -> String {
    strip_control_chars(&raw).into_owned()
}

impl RssFeed {
    /// Reads the channel out of an `<rss>` document element.
    pub(crate) fn from_root(
        root: &Element,
        url: &str,
        origin: &str,
        read_state: ReadState,
    ) -> Result<Self, SchemaError> {
        let ns = root.prefix.as_deref();
        // A bare <rss> reads as an empty channel
        let empty = Element::default();
        let channel = root.child(ns, "channel").unwrap_or(&empty);

        let items = channel
            .children_named(ns, "item")
            .map(|item| RssItem {
                origin: origin.to_string(),
                title: clean_title(child_text(item, ns, "title")),
                // Raw body keeps its whitespace; it is sanitized on read
                description: item
                    .child(ns, "description")
                    .map(Element::text)
                    .unwrap_or_default(),
                link: child_text(item, ns, "link"),
                guid: item
                    .child(ns, "guid")
                    .map(|g| g.text().trim().to_string())
                    .filter(|g| !g.is_empty()),
                read: read_state == ReadState::Restore && child_text(item, ns, "read") == "true",
            })
            .collect();

        let title_override = match read_state {
            ReadState::Restore => Some(child_text(channel, ns, "displayName")).filter(|n| !n.is_empty()),
            ReadState::Ignore => None,
        };

        Ok(Self {
            url: url.to_string(),
            origin: origin.to_string(),
            title: clean_title(child_text(channel, ns, "title")),
            description: child_text(channel, ns, "description"),
            link: child_text(channel, ns, "link"),
            items,
            title_override,
        })
    }

    /// Serializes the channel as RSS 2.0 with the snapshot extension
    /// elements (`<read>` per item, `<displayName>` on the channel).
    pub(crate) fn to_snapshot_xml(&self) -> Result<Vec<u8>> {
        let mut writer = xml::new_writer();
        xml::write_declaration(&mut writer)?;

        let mut rss = BytesStart::new("rss");
        rss.push_attribute(("version", "2.0"));
        xml::start(&mut writer, rss)?;
        xml::start(&mut writer, BytesStart::new("channel"))?;

        xml::text_element(&mut writer, BytesStart::new("title"), &self.title)?;
        xml::text_element(&mut writer, BytesStart::new("link"), &self.link)?;
        xml::text_element(&mut writer, BytesStart::new("description"), &self.description)?;
        if let Some(name) = &self.title_override {
            xml::text_element(&mut writer, BytesStart::new("displayName"), name)?;
        }

        for item in &self.items {
            xml::start(&mut writer, BytesStart::new("item"))?;
            xml::text_element(&mut writer, BytesStart::new("title"), &item.title)?;
            xml::text_element(&mut writer, BytesStart::new("link"), &item.link)?;
            xml::text_element(&mut writer, BytesStart::new("description"), &item.description)?;
            if let Some(guid) = &item.guid {
                let mut el = BytesStart::new("guid");
                el.push_attribute(("isPermaLink", "false"));
                xml::text_element(&mut writer, el, guid)?;
            }
            if item.read {
                xml::text_element(&mut writer, BytesStart::new("read"), "true")?;
            }
            xml::end(&mut writer, "item")?;
        }

        xml::end(&mut writer, "channel")?;
        xml::end(&mut writer, "rss")?;
        Ok(writer.into_inner())
    }
}
