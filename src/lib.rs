//! RSS/Atom ingestion with read state that survives re-fetching.
//!
//! Subscriptions are fetched concurrently, decoded behind one [`feed::Feed`]
//! type, and reconciled against the snapshot written at the end of the
//! previous run.

pub mod config;
pub mod feed;
pub mod session;
pub mod storage;
pub mod util;
