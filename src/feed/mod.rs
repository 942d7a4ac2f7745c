//! Feed ingestion: subscription parsing, fetching, decoding and reconciliation.
//!
//! This module provides the core pipeline for working with RSS and Atom feeds:
//!
//! - **Subscriptions**: Parse the line-oriented subscription file into [`FeedJob`]s
//! - **Fetching**: Concurrent HTTP retrieval with per-feed deadlines and size limits
//! - **Decoding**: Optional filter command, charset detection, RSS then Atom
//! - **Reconciliation**: Carry read flags from the last snapshot into a fresh fetch
//!
//! # Architecture
//!
//! - [`subscription`] - Subscription file grammar
//! - [`decoder`] - Bytes to [`Feed`], via the [`filter`] stage and the element tree in `xml`
//! - `rss` / `atom` - The two concrete feed representations behind [`Feed`]
//! - [`reconcile`](mod@reconcile) - Content-identity matching between fetches
//! - [`fetcher`] - Task fan-out and the tagged result stream
//!
//! # Example
//!
//! ```ignore
//! use gleaner::feed::{load_jobs, Fetcher};
//!
//! let jobs = load_jobs(&urls_path).await?;
//! let mut run = fetcher.spawn_all(jobs);
//! while let Some(result) = run.next().await {
//!     session.place(result);
//! }
//! ```

mod atom;
pub mod decoder;
pub mod fetcher;
pub mod filter;
mod model;
pub mod reconcile;
mod rss;
pub mod subscription;
mod xml;

pub use atom::{AtomEntry, AtomFeed, AtomLink};
pub use decoder::{parse_feed, DecodeError, Decoder, ReadState, SchemaError};
pub use fetcher::{FetchError, FetchResult, FetchRun, Fetcher};
pub use filter::{CommandFilter, FeedFilter, FilterError};
pub use model::{Feed, FeedItem, FeedKind};
pub use reconcile::{reconcile, ItemIdentity};
pub use rss::{RssFeed, RssItem};
pub use subscription::{load_jobs, parse_jobs, parse_line, FeedJob, SubscriptionError};
