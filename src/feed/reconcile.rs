use std::collections::HashSet;

use super::model::{Feed, FeedItem};

/// What makes two items "the same item" across fetches.
///
/// All four displayed fields must match exactly. Feed-supplied identifiers
/// (RSS `guid`, Atom `id`) are not consulted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemIdentity {
    pub title: String,
    pub description: String,
    pub link: String,
    pub content: String,
}

impl ItemIdentity {
    pub fn of(item: &dyn FeedItem) -> Self {
        Self {
            title: item.title().to_string(),
            description: item.description(),
            link: item.link(),
            content: item.content(),
        }
    }
}

/// Carries read flags from a previous snapshot into a fresh fetch.
///
/// An item in `fresh` becomes read when `old` holds a read item with the same
/// [`ItemIdentity`]. Read flags are only ever set, never cleared, and items
/// that exist only in `old` are dropped.
pub fn reconcile(old: Option<&Feed>, mut fresh: Feed) -> Feed {
    let Some(old) = old else {
        return fresh;
    };

    let read: HashSet<ItemIdentity> = old
        .items()
        .into_iter()
        .filter(|item| item.is_read())
        .map(ItemIdentity::of)
        .collect();
    if read.is_empty() {
        return fresh;
    }

    let mut carried = 0usize;
    for item in fresh.items_mut() {
        if !item.is_read() && read.contains(&ItemIdentity::of(&*item)) {
            item.set_read(true);
            carried += 1;
        }
    }

    tracing::debug!(
        url = %fresh.url(),
        carried = carried,
        previously_read = read.len(),
        "Reconciled read state"
    );
    fresh
}
