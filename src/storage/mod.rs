//! On-disk persistence of whole-feed snapshots.
//!
//! A snapshot is the only state kept between runs: the last fetched copy of a
//! feed together with the read flags and display name the user had.

mod snapshot;

pub use snapshot::{SaveReport, SnapshotError, SnapshotStore};
