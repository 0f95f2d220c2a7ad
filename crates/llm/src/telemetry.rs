//! Request metrics and their persistence.
//!
//! Counters live behind a read-write lock; the history ring is bounded.
//! A background task snapshots the service to a JSON file or Redis with a
//! minimum interval between saves, and flushes once more on shutdown.

pub(crate) mod metrics;
pub(crate) mod persist;
