use std::fmt;

use url::Url;

use super::atom::AtomFeed;
use super::rss::RssFeed;

/// Read/write capabilities a display layer needs from one feed entry.
///
/// Implemented by [`RssItem`](super::RssItem) and
/// [`AtomEntry`](super::AtomEntry). Text accessors return sanitized plain
/// text and [`link`](FeedItem::link) returns an absolute URL whenever the
/// feed gave an origin-relative one.
pub trait FeedItem: fmt::Debug + Send + Sync {
    /// `scheme://host[:port]` of the feed this item was fetched from.
    fn origin(&self) -> &str;

    fn title(&self) -> &str;

    /// One-line subtitle shown under the title in a list (the item's link).
    fn description(&self) -> String;

    /// Sanitized body text.
    fn content(&self) -> String;

    fn link(&self) -> String;

    fn is_read(&self) -> bool;

    fn set_read(&mut self, read: bool);

    /// Value a list filter matches against.
    fn filter_value(&self) -> &str {
        self.title()
    }

    fn toggle_read(&mut self) {
        let read = self.is_read();
        self.set_read(!read);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Rss => f.write_str("rss"),
            FeedKind::Atom => f.write_str("atom"),
        }
    }
}

/// A decoded feed in one of the two supported wire schemas.
#[derive(Debug, Clone, PartialEq)]
pub enum Feed {
    Rss(RssFeed),
    Atom(AtomFeed),
}

impl Feed {
    pub fn kind(&self) -> FeedKind {
        match self {
            Feed::Rss(_) => FeedKind::Rss,
            Feed::Atom(_) => FeedKind::Atom,
        }
    }

    /// The subscription URL this feed was fetched from.
    pub fn url(&self) -> &str {
        match self {
            Feed::Rss(f) => &f.url,
            Feed::Atom(f) => &f.url,
        }
    }

    /// Display title: the override when one is set, else the feed's own.
    pub fn title(&self) -> &str {
        self.title_override().unwrap_or(match self {
            Feed::Rss(f) => &f.title,
            Feed::Atom(f) => &f.title,
        })
    }

    pub fn title_override(&self) -> Option<&str> {
        match self {
            Feed::Rss(f) => f.title_override.as_deref(),
            Feed::Atom(f) => f.title_override.as_deref(),
        }
    }

    /// Sets or clears the display-name override. An empty name clears it.
    pub fn set_title_override(&mut self, title: Option<String>) {
        let title = title.filter(|t| !t.trim().is_empty());
        match self {
            Feed::Rss(f) => f.title_override = title,
            Feed::Atom(f) => f.title_override = title,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Feed::Rss(f) => &f.description,
            // Atom has no channel description
            Feed::Atom(f) => &f.title,
        }
    }

    pub fn link(&self) -> String {
        match self {
            Feed::Rss(f) => resolve_link(&f.origin, &f.link),
            Feed::Atom(f) => f.link(),
        }
    }

    pub fn filter_value(&self) -> &str {
        self.title()
    }

    /// Items in document order.
    pub fn items(&self) -> Vec<&dyn FeedItem> {
        match self {
            Feed::Rss(f) => f.items.iter().map(|i| i as &dyn FeedItem).collect(),
            Feed::Atom(f) => f.entries.iter().map(|e| e as &dyn FeedItem).collect(),
        }
    }

    pub fn items_mut(&mut self) -> Vec<&mut dyn FeedItem> {
        match self {
            Feed::Rss(f) => f
                .items
                .iter_mut()
                .map(|i| i as &mut dyn FeedItem)
                .collect(),
            Feed::Atom(f) => f
                .entries
                .iter_mut()
                .map(|e| e as &mut dyn FeedItem)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Feed::Rss(f) => f.items.len(),
            Feed::Atom(f) => f.entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread_count(&self) -> usize {
        self.items().iter().filter(|i| !i.is_read()).count()
    }

    pub fn mark_all_read(&mut self) {
        for item in self.items_mut() {
            item.set_read(true);
        }
    }
}

/// Serializes `scheme://host[:port]` for a subscription URL.
///
/// URLs without a network origin (e.g. `file:`) resolve nothing and yield an
/// empty origin.
pub(crate) fn origin_of(url: &str) -> Result<String, url::ParseError> {
    let parsed = Url::parse(url)?;
    let origin = parsed.origin();
    if origin.is_tuple() {
        Ok(origin.ascii_serialization())
    } else {
        Ok(String::new())
    }
}

/// Prefixes origin-relative links (`/path`) with the feed origin.
///
/// Absolute and protocol-relative (`//host/path`) links pass through.
pub(crate) fn resolve_link(origin: &str, link: &str) -> String {
    if !origin.is_empty() && link.len() > 1 && link.starts_with('/') && !link.starts_with("//") {
        format!("{}{}", origin, link)
    } else {
        link.to_string()
    }
}
