//! Headless consumer of a fetch run.
//!
//! A [`Session`] keeps one slot per subscription, in subscription order, and
//! fills each slot as its result arrives. Read-state changes happen here; on
//! exit the loaded feeds are written back as snapshots.

use crate::feed::{Feed, FeedItem, FeedJob, FetchError, FetchResult};
use crate::storage::{SaveReport, SnapshotStore};

#[derive(Debug)]
pub enum Slot {
    Pending { url: String },
    Loaded(Feed),
    Failed { url: String, error: FetchError },
}

impl Slot {
    pub fn url(&self) -> &str {
        match self {
            Slot::Pending { url } | Slot::Failed { url, .. } => url.as_str(),
            Slot::Loaded(feed) => feed.url(),
        }
    }

    pub fn feed(&self) -> Option<&Feed> {
        match self {
            Slot::Loaded(feed) => Some(feed),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    slots: Vec<Slot>,
}

impl Session {
    pub fn new(jobs: &[FeedJob]) -> Self {
        Self {
            slots: jobs
                .iter()
                .map(|job| Slot::Pending {
                    url: job.url.clone(),
                })
                .collect(),
        }
    }

    /// Stores a result in the slot of the job it came from.
    pub fn place(&mut self, result: FetchResult) {
        let Some(slot) = self.slots.get_mut(result.index) else {
            tracing::warn!(index = result.index, url = %result.url, "Result for unknown job index, dropping");
            return;
        };
        *slot = match result.outcome {
            Ok(feed) => Slot::Loaded(feed),
            Err(error) => Slot::Failed {
                url: result.url,
                error,
            },
        };
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn feed(&self, index: usize) -> Option<&Feed> {
        self.slots.get(index).and_then(Slot::feed)
    }

    pub fn feed_mut(&mut self, index: usize) -> Option<&mut Feed> {
        match self.slots.get_mut(index) {
            Some(Slot::Loaded(feed)) => Some(feed),
            _ => None,
        }
    }

    /// Loaded feeds in subscription order.
    pub fn feeds(&self) -> impl Iterator<Item = &Feed> {
        self.slots.iter().filter_map(Slot::feed)
    }

    pub fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Pending { .. }))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    pub fn unread_total(&self) -> usize {
        self.feeds().map(Feed::unread_count).sum()
    }

    /// Unread items of one loaded feed, for views that hide read items.
    ///
    /// Each item comes with its position in the full list, which is what
    /// [`Session::set_read`] and [`Session::toggle_read`] take.
    pub fn unread_items(&self, feed: usize) -> Option<Vec<(usize, &dyn FeedItem)>> {
        let feed = self.feed(feed)?;
        Some(
            feed.items()
                .into_iter()
                .enumerate()
                .filter(|(_, item)| !item.is_read())
                .collect(),
        )
    }

    /// Sets the read flag of one item. Returns `false` if there is no such
    /// loaded feed or item.
    pub fn set_read(&mut self, feed: usize, item: usize, read: bool) -> bool {
        let Some(feed) = self.feed_mut(feed) else {
            return false;
        };
        match feed.items_mut().into_iter().nth(item) {
            Some(item) => {
                item.set_read(read);
                true
            }
            None => false,
        }
    }

    /// Flips one item's read flag and returns the new value.
    pub fn toggle_read(&mut self, feed: usize, item: usize) -> Option<bool> {
        let feed = self.feed_mut(feed)?;
        let item = feed.items_mut().into_iter().nth(item)?;
        item.toggle_read();
        Some(item.is_read())
    }

    pub fn mark_all_read(&mut self) {
        for slot in &mut self.slots {
            if let Slot::Loaded(feed) = slot {
                feed.mark_all_read();
            }
        }
    }

    /// Writes a snapshot for every loaded feed.
    ///
    /// Failed and pending slots are skipped, so their previous snapshots stay
    /// as they were.
    pub async fn persist(&self, store: &SnapshotStore) -> SaveReport {
        let report = store.save_all(self.feeds()).await;
        tracing::info!(
            saved = report.saved,
            failed = report.failed.len(),
            dir = %store.dir().display(),
            "Persisted snapshots"
        );
        report
    }
}
